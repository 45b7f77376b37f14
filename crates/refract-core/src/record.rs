use crate::resource::FrameRefKind;
use refract_protocol::{ImageFormat, ResourceId};
use refract_trace::Chunk;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

// Shared ordinal for every chunk appended to any record. Merging record
// lists for the file flush sorts by this key, which is what preserves the
// original cross-thread recording order between command buffers, descriptor
// updates and queue submits.
static RECORD_ORDINAL: AtomicU64 = AtomicU64::new(1);

fn next_ordinal() -> u64 {
    RECORD_ORDINAL.fetch_add(1, Ordering::Relaxed)
}

/// Swapchain bookkeeping attached to a swapchain's record.
#[derive(Clone, Debug)]
pub struct SwapchainInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub images: Vec<ResourceId>,
    /// Index into `images` of the most recently presented backbuffer.
    pub last_present: usize,
}

/// Live mapping watcher for a host-coherent buffer.
///
/// While a coherent buffer is mapped the application can write it at any
/// time without an unmap; the capture layer keeps a shadow copy and emits
/// the diff as a flush chunk at the capture boundary.
#[derive(Clone, Debug, Default)]
pub struct MemMapState {
    pub size: u64,
    pub mapped: bool,
    pub ref_data: Option<Vec<u8>>,
}

/// Per-resource metadata: the chunk list that recreates the resource plus
/// reference bookkeeping.
///
/// Records own their chunks; anything else refers to the resource by id.
/// The chunk list is ordered by the global recording ordinal.
#[derive(Debug, Default)]
pub struct ResourceRecord {
    pub parent: ResourceId,
    chunks: Vec<(u64, Chunk)>,
    pub length: u64,
    pub ref_count: u32,
    /// Set once the creation chunks have been written into a log, after
    /// which the record no longer needs to keep them for future captures.
    pub data_in_serialiser: bool,
    /// Internal records (the frame capture record) that correspond to no
    /// application resource.
    pub special_resource: bool,
    pub sub_resources: Vec<ResourceId>,
    pub swap_info: Option<SwapchainInfo>,
    pub mem_map: Option<MemMapState>,
    /// Resources this record's chunks touch, accumulated while recording.
    /// Folded into the frame's reference set when the record is submitted
    /// inside a capture frame.
    pub frame_refs: Vec<(ResourceId, FrameRefKind)>,
}

impl ResourceRecord {
    pub fn new(parent: ResourceId) -> Self {
        Self {
            parent,
            ref_count: 1,
            ..Self::default()
        }
    }

    /// Append a closed chunk, stamping it with the next global ordinal.
    pub fn add_chunk(&mut self, chunk: Chunk) {
        self.chunks.push((next_ordinal(), chunk));
    }

    pub fn has_chunks(&self) -> bool {
        !self.chunks.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Drop every chunk (the stale-capture wipe).
    pub fn wipe_chunks(&mut self) {
        self.chunks.clear();
    }

    /// Merge this record's chunks into an ordinal-keyed map. Chunks are
    /// cloned; the record keeps its list.
    pub fn insert_into(&self, out: &mut BTreeMap<u64, Chunk>) {
        for (ordinal, chunk) in &self.chunks {
            out.insert(*ordinal, chunk.clone());
        }
    }

    /// Iterate chunks in recording order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().map(|(_, c)| c)
    }
}

/// Capture-side metadata for one recorded frame.
#[derive(Clone, Debug, Default)]
pub struct FrameRecord {
    pub frame_number: u32,
    pub capture_time_ms: u64,
    /// Offset of the frame's capture-scope chunk in the log (replay side).
    pub file_offset: u64,
    pub first_event: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_protocol::ChunkKind;

    fn chunk(tag: u8) -> Chunk {
        Chunk::new(ChunkKind::Draw, vec![tag], None)
    }

    #[test]
    fn merge_preserves_cross_record_recording_order() {
        let mut a = ResourceRecord::new(ResourceId::NULL);
        let mut b = ResourceRecord::new(ResourceId::NULL);

        a.add_chunk(chunk(1));
        b.add_chunk(chunk(2));
        a.add_chunk(chunk(3));

        let mut merged = BTreeMap::new();
        a.insert_into(&mut merged);
        b.insert_into(&mut merged);

        let tags: Vec<u8> = merged.values().map(|c| c.payload()[0]).collect();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn wipe_drops_everything() {
        let mut rec = ResourceRecord::new(ResourceId::NULL);
        rec.add_chunk(chunk(1));
        assert!(rec.has_chunks());
        rec.wipe_chunks();
        assert!(!rec.has_chunks());
    }
}
