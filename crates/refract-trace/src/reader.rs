use crate::format::{LogHeader, MAX_CALLSTACK_DEPTH};
use crate::{TraceError, TraceResult};
use refract_protocol::{ChunkKind, ResourceId, CHUNK_CALLSTACK_FLAG, CHUNK_KIND_MASK};
use std::fs;
use std::path::Path;

#[derive(Debug)]
struct OpenChunk {
    kind: u32,
    payload_end: usize,
    /// End of payload plus callstack block, where the next chunk starts.
    chunk_end: usize,
}

/// Reading-mode serializer: bounds-validated random access over a loaded log.
///
/// The whole file is held resident, so [`ChunkReader::set_persistent_block`]
/// is pure bookkeeping here: it marks the replay window (the offset of the
/// first capture scope) that a paging-backed serializer would need to keep
/// cached. Every length field is validated against the file size before use;
/// logs come from disk and are treated as untrusted input.
#[derive(Debug)]
pub struct ChunkReader {
    data: Vec<u8>,
    header: LogHeader,
    body_start: usize,
    offset: usize,
    stack: Vec<OpenChunk>,
    persistent_block: Option<u64>,
    last_callstack: Option<Vec<u64>>,
    debug_text: bool,
    args: Vec<String>,
}

impl ChunkReader {
    pub fn open(path: &Path) -> TraceResult<Self> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> TraceResult<Self> {
        let (header, body_start) = LogHeader::decode(&data)?;
        Ok(Self {
            data,
            header,
            body_start,
            offset: body_start,
            stack: Vec::new(),
            persistent_block: None,
            last_callstack: None,
            debug_text: false,
            args: Vec::new(),
        })
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Enable field-annotation capture; [`ChunkReader::debug_str`] renders
    /// the values read from the current chunk into an event description.
    pub fn set_debug_text(&mut self, enabled: bool) {
        self.debug_text = enabled;
    }

    pub fn debug_str(&self, kind: ChunkKind) -> String {
        if !self.debug_text {
            return String::new();
        }
        format!("{}({})", kind.name(), self.args.join(", "))
    }

    /// Parse the next chunk header and enter its context. Returns the raw
    /// kind value, which may be outside the known set.
    pub fn begin_chunk(&mut self) -> TraceResult<u32> {
        if self.offset + 8 > self.data.len() {
            return Err(TraceError::Corrupt("truncated chunk header"));
        }
        let kind_word = self.peek_u32(self.offset);
        let len = self.peek_u32(self.offset + 4) as usize;

        let payload_end = self
            .offset
            .checked_add(8 + len)
            .ok_or(TraceError::Corrupt("chunk length overflow"))?;
        if payload_end > self.data.len() {
            return Err(TraceError::Corrupt("truncated chunk payload"));
        }

        self.offset += 8;
        if self.stack.is_empty() {
            self.args.clear();
        }

        // Parse the trailing callstack block eagerly: events built while the
        // chunk is still open need it.
        let has_callstack = kind_word & CHUNK_CALLSTACK_FLAG != 0;
        let mut chunk_end = payload_end;
        if has_callstack {
            if payload_end + 4 > self.data.len() {
                return Err(TraceError::Corrupt("truncated callstack block"));
            }
            let count = self.peek_u32(payload_end);
            if count > MAX_CALLSTACK_DEPTH {
                return Err(TraceError::Corrupt("callstack depth out of bounds"));
            }
            chunk_end = payload_end + 4 + count as usize * 8;
            if chunk_end > self.data.len() {
                return Err(TraceError::Corrupt("truncated callstack block"));
            }
            let mut stack = Vec::with_capacity(count as usize);
            for i in 0..count as usize {
                let at = payload_end + 4 + i * 8;
                stack.push(u64::from_le_bytes(
                    self.data[at..at + 8].try_into().unwrap(),
                ));
            }
            self.last_callstack = Some(stack);
        } else if self.stack.is_empty() {
            self.last_callstack = None;
        }

        self.stack.push(OpenChunk {
            kind: kind_word & CHUNK_KIND_MASK,
            payload_end,
            chunk_end,
        });
        Ok(kind_word & CHUNK_KIND_MASK)
    }

    /// Leave the current chunk context, seeking past any unread payload and
    /// the callstack block if present.
    pub fn end_chunk(&mut self, kind: u32) -> TraceResult<()> {
        let open = self
            .stack
            .pop()
            .ok_or(TraceError::Corrupt("end_chunk without begin_chunk"))?;
        if open.kind != kind {
            return Err(TraceError::ContextMismatch {
                expected: open.kind,
                got: kind,
            });
        }
        self.offset = open.chunk_end;
        Ok(())
    }

    /// Advance past the remaining payload of the current chunk without
    /// decoding it. The context stays open; `end_chunk` still applies.
    pub fn skip_current_chunk(&mut self) {
        if let Some(open) = self.stack.last() {
            self.offset = open.payload_end;
        }
    }

    /// Scan forward from the current position until a chunk of `kind` is
    /// found. Leaves the reader positioned at that chunk's header and
    /// returns its offset; returns `None` at end of log.
    pub fn skip_to_chunk(&mut self, kind: ChunkKind) -> TraceResult<Option<u64>> {
        debug_assert!(self.stack.is_empty(), "skip_to_chunk inside a chunk");
        loop {
            if self.at_end() {
                return Ok(None);
            }
            if self.offset + 8 > self.data.len() {
                return Err(TraceError::Corrupt("truncated chunk header"));
            }
            let kind_word = self.peek_u32(self.offset);
            if kind_word & CHUNK_KIND_MASK == kind as u32 {
                return Ok(Some(self.offset as u64));
            }
            self.skip_whole_chunk()?;
        }
    }

    fn skip_whole_chunk(&mut self) -> TraceResult<()> {
        let kind_word = self.peek_u32(self.offset);
        let len = self.peek_u32(self.offset + 4) as usize;
        let mut next = self
            .offset
            .checked_add(8 + len)
            .ok_or(TraceError::Corrupt("chunk length overflow"))?;
        if kind_word & CHUNK_CALLSTACK_FLAG != 0 {
            if next + 4 > self.data.len() {
                return Err(TraceError::Corrupt("truncated callstack block"));
            }
            let count = self.peek_u32(next) as usize;
            next = next
                .checked_add(4 + count * 8)
                .ok_or(TraceError::Corrupt("chunk length overflow"))?;
        }
        if next > self.data.len() {
            return Err(TraceError::Corrupt("truncated chunk payload"));
        }
        self.offset = next;
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.offset = self.body_start;
        self.stack.clear();
    }

    pub fn at_end(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    pub fn set_offset(&mut self, offset: u64) -> TraceResult<()> {
        if offset as usize > self.data.len() {
            return Err(TraceError::Corrupt("seek out of bounds"));
        }
        self.offset = offset as usize;
        self.stack.clear();
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Mark the suffix of the log from `offset` as the replay window.
    pub fn set_persistent_block(&mut self, offset: u64) {
        self.persistent_block = Some(offset);
    }

    pub fn persistent_block(&self) -> Option<u64> {
        self.persistent_block
    }

    /// The callstack attached to the most recently closed chunk, if any.
    pub fn take_last_callstack(&mut self) -> Option<Vec<u64>> {
        self.last_callstack.take()
    }

    fn peek_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap())
    }

    fn note(&mut self, value: impl std::fmt::Display) {
        if self.debug_text {
            self.args.push(value.to_string());
        }
    }

    fn take(&mut self, len: usize) -> TraceResult<&[u8]> {
        let payload_end = self
            .stack
            .last()
            .map(|open| open.payload_end)
            .ok_or(TraceError::Corrupt("field read outside a chunk"))?;
        let end = self
            .offset
            .checked_add(len)
            .ok_or(TraceError::Corrupt("chunk length overflow"))?;
        if end > payload_end {
            return Err(TraceError::Corrupt("read past end of chunk payload"));
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    // Field readers, symmetric with the writer's field writers.

    pub fn read_u32(&mut self, _name: &str) -> TraceResult<u32> {
        let v = u32::from_le_bytes(self.take(4)?.try_into().unwrap());
        self.note(v);
        Ok(v)
    }

    pub fn read_i32(&mut self, _name: &str) -> TraceResult<i32> {
        let v = i32::from_le_bytes(self.take(4)?.try_into().unwrap());
        self.note(v);
        Ok(v)
    }

    pub fn read_u64(&mut self, _name: &str) -> TraceResult<u64> {
        let v = u64::from_le_bytes(self.take(8)?.try_into().unwrap());
        self.note(v);
        Ok(v)
    }

    pub fn read_f32(&mut self, _name: &str) -> TraceResult<f32> {
        let v = f32::from_le_bytes(self.take(4)?.try_into().unwrap());
        self.note(v);
        Ok(v)
    }

    pub fn read_bool(&mut self, _name: &str) -> TraceResult<bool> {
        let v = self.take(1)?[0] != 0;
        self.note(v);
        Ok(v)
    }

    pub fn read_id(&mut self, _name: &str) -> TraceResult<ResourceId> {
        let v = ResourceId::from_raw(u64::from_le_bytes(self.take(8)?.try_into().unwrap()));
        self.note(v);
        Ok(v)
    }

    pub fn read_str(&mut self, _name: &str) -> TraceResult<String> {
        let len = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| TraceError::Corrupt("chunk string not utf-8"))?
            .to_owned();
        if self.debug_text {
            self.args.push(format!("\"{s}\""));
        }
        Ok(s)
    }

    pub fn read_bytes(&mut self, _name: &str) -> TraceResult<Vec<u8>> {
        let len = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        let bytes = self.take(len)?.to_vec();
        if self.debug_text {
            self.args.push(format!("<{} bytes>", bytes.len()));
        }
        Ok(bytes)
    }

    pub fn read_u32_array(&mut self, name: &str) -> TraceResult<Vec<u32>> {
        let count = self.array_count(4)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(u32::from_le_bytes(self.take(4)?.try_into().unwrap()));
        }
        self.note_array(name, count);
        Ok(out)
    }

    pub fn read_u64_array(&mut self, name: &str) -> TraceResult<Vec<u64>> {
        let count = self.array_count(8)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(u64::from_le_bytes(self.take(8)?.try_into().unwrap()));
        }
        self.note_array(name, count);
        Ok(out)
    }

    pub fn read_id_array(&mut self, name: &str) -> TraceResult<Vec<ResourceId>> {
        let count = self.array_count(8)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(ResourceId::from_raw(u64::from_le_bytes(
                self.take(8)?.try_into().unwrap(),
            )));
        }
        self.note_array(name, count);
        Ok(out)
    }

    pub fn read_f32_array(&mut self, name: &str) -> TraceResult<Vec<f32>> {
        let count = self.array_count(4)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(f32::from_le_bytes(self.take(4)?.try_into().unwrap()));
        }
        self.note_array(name, count);
        Ok(out)
    }

    fn array_count(&mut self, elem_size: usize) -> TraceResult<usize> {
        let count = u32::from_le_bytes(self.take(4)?.try_into().unwrap()) as usize;
        let payload_end = self
            .stack
            .last()
            .map(|open| open.payload_end)
            .unwrap_or(self.offset);
        // Validate before allocating: the count is untrusted.
        let remaining = payload_end.saturating_sub(self.offset);
        if count.checked_mul(elem_size).map_or(true, |b| b > remaining) {
            return Err(TraceError::Corrupt("array count out of bounds"));
        }
        Ok(count)
    }

    fn note_array(&mut self, _name: &str, count: usize) {
        if self.debug_text {
            self.args.push(format!("[{count}]"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ChunkWriter;
    use crate::LogHeader;

    fn log_with(chunks: impl FnOnce(&mut ChunkWriter)) -> Vec<u8> {
        let mut w = ChunkWriter::new(false);
        chunks(&mut w);
        let mut bytes = Vec::new();
        LogHeader::default().encode_into(&mut bytes);
        for chunk in w.take_chunks() {
            chunk.encode_into(&mut bytes);
        }
        bytes
    }

    #[test]
    fn chunk_round_trip() {
        let bytes = log_with(|w| {
            w.begin_chunk(ChunkKind::Draw);
            w.write_u32("vertexCount", 3);
            w.write_u32("instanceCount", 1);
            w.write_u32("firstVertex", 0);
            w.write_u32("firstInstance", 0);
            let chunk = w.end_chunk(ChunkKind::Draw).unwrap();
            w.insert(chunk);
        });

        let mut r = ChunkReader::from_bytes(bytes).unwrap();
        r.set_debug_text(true);
        let kind = r.begin_chunk().unwrap();
        assert_eq!(kind, ChunkKind::Draw as u32);
        assert_eq!(r.read_u32("vertexCount").unwrap(), 3);
        assert_eq!(r.read_u32("instanceCount").unwrap(), 1);
        assert_eq!(r.read_u32("firstVertex").unwrap(), 0);
        assert_eq!(r.read_u32("firstInstance").unwrap(), 0);
        assert_eq!(r.debug_str(ChunkKind::Draw), "CmdDraw(3, 1, 0, 0)");
        r.end_chunk(kind).unwrap();
        assert!(r.at_end());
    }

    #[test]
    fn skip_to_chunk_finds_later_kinds() {
        let bytes = log_with(|w| {
            for kind in [ChunkKind::DeviceInit, ChunkKind::CreateBuffer, ChunkKind::CaptureScope] {
                w.begin_chunk(kind);
                w.write_u32("x", 1);
                let chunk = w.end_chunk(kind).unwrap();
                w.insert(chunk);
            }
        });

        let mut r = ChunkReader::from_bytes(bytes).unwrap();
        let found = r.skip_to_chunk(ChunkKind::CaptureScope).unwrap();
        assert!(found.is_some());
        let kind = r.begin_chunk().unwrap();
        assert_eq!(kind, ChunkKind::CaptureScope as u32);

        // scanning again from here for a kind that's behind us finds nothing
        r.skip_current_chunk();
        r.end_chunk(kind).unwrap();
        assert_eq!(r.skip_to_chunk(ChunkKind::DeviceInit).unwrap(), None);
    }

    #[test]
    fn callstack_block_round_trips() {
        let bytes = log_with(|w| {
            w.begin_chunk(ChunkKind::CaptureEnd);
            w.write_id("backbuffer", ResourceId::from_raw(42));
            w.attach_callstack(vec![1, 2, 3]);
            let chunk = w.end_chunk(ChunkKind::CaptureEnd).unwrap();
            w.insert(chunk);
        });

        let mut r = ChunkReader::from_bytes(bytes).unwrap();
        let kind = r.begin_chunk().unwrap();
        r.skip_current_chunk();
        r.end_chunk(kind).unwrap();
        assert_eq!(r.take_last_callstack(), Some(vec![1, 2, 3]));
        assert_eq!(r.take_last_callstack(), None);
        assert!(r.at_end());
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let mut bytes = log_with(|w| {
            w.begin_chunk(ChunkKind::Draw);
            w.write_u32("vertexCount", 3);
            let chunk = w.end_chunk(ChunkKind::Draw).unwrap();
            w.insert(chunk);
        });
        bytes.truncate(bytes.len() - 2);

        let mut r = ChunkReader::from_bytes(bytes).unwrap();
        assert!(matches!(r.begin_chunk(), Err(TraceError::Corrupt(_))));
    }

    #[test]
    fn reading_past_payload_is_corrupt() {
        let bytes = log_with(|w| {
            w.begin_chunk(ChunkKind::Draw);
            w.write_u32("vertexCount", 3);
            let chunk = w.end_chunk(ChunkKind::Draw).unwrap();
            w.insert(chunk);
        });

        let mut r = ChunkReader::from_bytes(bytes).unwrap();
        r.begin_chunk().unwrap();
        r.read_u32("vertexCount").unwrap();
        assert!(matches!(
            r.read_u32("extra"),
            Err(TraceError::Corrupt(_))
        ));
    }
}
