use crate::chunk::Chunk;
use crate::format::LogHeader;
use crate::TraceResult;
use refract_protocol::{ChunkKind, ResourceId};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

struct PendingChunk {
    kind: ChunkKind,
    /// Offset of the inline `(kind, length)` header inside `buf` for nested
    /// chunks; the outermost chunk has no inline header.
    header_pos: Option<usize>,
}

/// Writing-mode serializer.
///
/// Appends chunks to an in-memory stream. Each recording thread owns one of
/// these; the frame-capture flush gathers closed chunks from records and
/// [`ChunkWriter::insert`]s them into the file writer in merge order before
/// [`ChunkWriter::flush_to_disk`].
pub struct ChunkWriter {
    buf: Vec<u8>,
    stack: Vec<PendingChunk>,
    chunks: Vec<Chunk>,
    pending_callstack: Option<Vec<u64>>,
    debug_text: bool,
    args: Vec<String>,
}

impl ChunkWriter {
    pub fn new(debug_text: bool) -> Self {
        Self {
            buf: Vec::new(),
            stack: Vec::new(),
            chunks: Vec::new(),
            pending_callstack: None,
            debug_text,
            args: Vec::new(),
        }
    }

    /// Begin a chunk of the given kind. Nestable: a chunk begun while another
    /// is open is framed inline inside the parent payload.
    pub fn begin_chunk(&mut self, kind: ChunkKind) {
        let header_pos = if self.stack.is_empty() {
            debug_assert!(self.buf.is_empty(), "unclosed chunk data left behind");
            self.args.clear();
            None
        } else {
            let pos = self.buf.len();
            self.buf.extend_from_slice(&(kind as u32).to_le_bytes());
            self.buf.extend_from_slice(&0u32.to_le_bytes());
            Some(pos)
        };
        self.stack.push(PendingChunk { kind, header_pos });
    }

    /// Close the current chunk. Returns the finished chunk when the outermost
    /// context closes, `None` while still nested.
    pub fn end_chunk(&mut self, kind: ChunkKind) -> Option<Chunk> {
        let pending = self.stack.pop().expect("end_chunk without begin_chunk");
        debug_assert_eq!(pending.kind, kind, "mismatched chunk context");

        match pending.header_pos {
            Some(pos) => {
                let len = (self.buf.len() - pos - 8) as u32;
                self.buf[pos + 4..pos + 8].copy_from_slice(&len.to_le_bytes());
                None
            }
            None => {
                let payload = std::mem::take(&mut self.buf);
                let callstack = self.pending_callstack.take();
                Some(Chunk::new(kind, payload, callstack))
            }
        }
    }

    /// Attach a callstack to the chunk currently being written. Applies to
    /// the outermost open chunk.
    pub fn attach_callstack(&mut self, stack: Vec<u64>) {
        self.pending_callstack = Some(stack);
    }

    /// Splice a pre-built chunk into the output stream.
    pub fn insert(&mut self, chunk: Chunk) {
        debug_assert!(self.stack.is_empty(), "insert inside an open chunk");
        self.chunks.push(chunk);
    }

    /// Drain every chunk inserted so far, in insertion order.
    pub fn take_chunks(&mut self) -> Vec<Chunk> {
        std::mem::take(&mut self.chunks)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total encoded size of the inserted chunks.
    pub fn byte_size(&self) -> u64 {
        self.chunks.iter().map(Chunk::byte_size).sum()
    }

    /// Human-readable rendering of the chunk most recently written, built
    /// from the annotated field values. Empty unless debug text is enabled.
    pub fn debug_str(&self, kind: ChunkKind) -> String {
        if !self.debug_text {
            return String::new();
        }
        format!("{}({})", kind.name(), self.args.join(", "))
    }

    /// Emit the header and the accumulated chunks to `path`.
    pub fn flush_to_disk(&mut self, path: &Path, header: &LogHeader) -> TraceResult<u64> {
        debug_assert!(self.stack.is_empty(), "flush with an open chunk");

        let mut bytes = Vec::new();
        header.encode_into(&mut bytes);
        for chunk in &self.chunks {
            chunk.encode_into(&mut bytes);
        }

        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(&bytes)?;
        out.flush()?;
        tracing::debug!(
            bytes = bytes.len(),
            chunks = self.chunks.len(),
            path = %path.display(),
            "log flushed to disk"
        );
        Ok(bytes.len() as u64)
    }

    fn note(&mut self, value: impl std::fmt::Display) {
        if self.debug_text {
            self.args.push(value.to_string());
        }
    }

    // Field writers. The `name` is the debug annotation; on the wire only
    // the raw little-endian bytes are emitted.

    pub fn write_u32(&mut self, _name: &str, value: u32) {
        self.note(value);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, _name: &str, value: i32) {
        self.note(value);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, _name: &str, value: u64) {
        self.note(value);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, _name: &str, value: f32) {
        self.note(value);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, _name: &str, value: bool) {
        self.note(value);
        self.buf.push(value as u8);
    }

    pub fn write_id(&mut self, _name: &str, id: ResourceId) {
        self.note(id);
        self.buf.extend_from_slice(&id.raw().to_le_bytes());
    }

    pub fn write_str(&mut self, _name: &str, value: &str) {
        if self.debug_text {
            self.args.push(format!("\"{value}\""));
        }
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Length-prefixed opaque blob.
    pub fn write_bytes(&mut self, _name: &str, value: &[u8]) {
        if self.debug_text {
            self.args.push(format!("<{} bytes>", value.len()));
        }
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
    }

    pub fn write_u32_array(&mut self, _name: &str, values: &[u32]) {
        if self.debug_text {
            self.args.push(format!("[{}]", values.len()));
        }
        self.buf
            .extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn write_u64_array(&mut self, _name: &str, values: &[u64]) {
        if self.debug_text {
            self.args.push(format!("[{}]", values.len()));
        }
        self.buf
            .extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn write_id_array(&mut self, _name: &str, values: &[ResourceId]) {
        if self.debug_text {
            self.args.push(format!("[{}]", values.len()));
        }
        self.buf
            .extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            self.buf.extend_from_slice(&v.raw().to_le_bytes());
        }
    }

    pub fn write_f32_array(&mut self, _name: &str, values: &[f32]) {
        if self.debug_text {
            self.args.push(format!("[{}]", values.len()));
        }
        self.buf
            .extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outermost_chunk_closes_to_a_chunk() {
        let mut w = ChunkWriter::new(true);
        w.begin_chunk(ChunkKind::Draw);
        w.write_u32("vertexCount", 3);
        w.write_u32("instanceCount", 1);
        let chunk = w.end_chunk(ChunkKind::Draw).unwrap();
        assert_eq!(chunk.kind(), ChunkKind::Draw);
        assert_eq!(chunk.payload(), &[3, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(w.debug_str(ChunkKind::Draw), "CmdDraw(3, 1)");
    }

    #[test]
    fn nested_chunks_frame_inline() {
        let mut w = ChunkWriter::new(false);
        w.begin_chunk(ChunkKind::CaptureScope);
        w.write_u32("frame", 7);
        w.begin_chunk(ChunkKind::DeviceInit);
        w.write_u32("inner", 9);
        assert!(w.end_chunk(ChunkKind::DeviceInit).is_none());
        let chunk = w.end_chunk(ChunkKind::CaptureScope).unwrap();

        // outer field, then inner header (kind, len = 4), then inner field
        let payload = chunk.payload();
        assert_eq!(&payload[0..4], &7u32.to_le_bytes());
        assert_eq!(
            &payload[4..8],
            &(ChunkKind::DeviceInit as u32).to_le_bytes()
        );
        assert_eq!(&payload[8..12], &4u32.to_le_bytes());
        assert_eq!(&payload[12..16], &9u32.to_le_bytes());
    }

    #[test]
    fn callstack_attaches_to_outermost_chunk() {
        let mut w = ChunkWriter::new(false);
        w.begin_chunk(ChunkKind::CaptureEnd);
        w.attach_callstack(vec![0xdead, 0xbeef]);
        let chunk = w.end_chunk(ChunkKind::CaptureEnd).unwrap();
        assert_eq!(chunk.callstack(), Some(&[0xdead, 0xbeef][..]));
    }
}
