use refract_protocol::{ChunkKind, CHUNK_CALLSTACK_FLAG};

/// A closed chunk: kind, payload bytes and an optional callstack.
///
/// Chunks are immutable once built. A chunk belongs to exactly one record's
/// chunk list at a time; merging record lists into a file stream clones the
/// chunk rather than sharing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    kind: ChunkKind,
    payload: Vec<u8>,
    callstack: Option<Vec<u64>>,
}

impl Chunk {
    pub fn new(kind: ChunkKind, payload: Vec<u8>, callstack: Option<Vec<u64>>) -> Self {
        Self {
            kind,
            payload,
            callstack,
        }
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn callstack(&self) -> Option<&[u64]> {
        self.callstack.as_deref()
    }

    /// Size of this chunk on the wire, framing included.
    pub fn byte_size(&self) -> u64 {
        let callstack = match &self.callstack {
            Some(stack) => 4 + 8 * stack.len() as u64,
            None => 0,
        };
        8 + self.payload.len() as u64 + callstack
    }

    /// Encode the chunk with its framing into `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut kind_word = self.kind as u32;
        if self.callstack.is_some() {
            kind_word |= CHUNK_CALLSTACK_FLAG;
        }
        out.extend_from_slice(&kind_word.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        if let Some(stack) = &self.callstack {
            out.extend_from_slice(&(stack.len() as u32).to_le_bytes());
            for addr in stack {
                out.extend_from_slice(&addr.to_le_bytes());
            }
        }
    }
}
