use crate::record::ResourceRecord;
use refract_driver::{Driver, DriverHandle};
use refract_protocol::{ChunkKind, ResourceId};
use refract_trace::ChunkWriter;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::{debug, warn};

/// How a frame referenced a resource. Upgrades are monotonic: once a
/// resource is known to need its pre-frame contents captured, a weaker
/// reference cannot downgrade it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameRefKind {
    Read,
    Write,
    PartialWrite,
    ReadBeforeWrite,
}

impl FrameRefKind {
    fn rank(self) -> u32 {
        match self {
            FrameRefKind::Read => 0,
            FrameRefKind::Write => 1,
            FrameRefKind::PartialWrite => 2,
            FrameRefKind::ReadBeforeWrite => 3,
        }
    }

}

/// What a resource fundamentally is, as far as initial-contents capture is
/// concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ResourceKind {
    Buffer = 0,
    Image = 1,
    Other = 2,
}

impl ResourceKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Buffer),
            1 => Some(Self::Image),
            2 => Some(Self::Other),
            _ => None,
        }
    }
}

/// Snapshot of a resource's contents at the capture boundary.
#[derive(Clone, Debug)]
pub struct InitialContents {
    pub kind: ResourceKind,
    pub data: Vec<u8>,
}

/// Identity map between live driver handles and stable [`ResourceId`]s,
/// plus per-resource records, frame references, dirty tracking and
/// initial-contents storage.
#[derive(Default)]
pub struct ResourceManager {
    live_to_id: HashMap<DriverHandle, ResourceId>,
    id_to_live: HashMap<ResourceId, DriverHandle>,
    kinds: HashMap<ResourceId, ResourceKind>,
    records: HashMap<ResourceId, ResourceRecord>,
    frame_refs: HashMap<ResourceId, FrameRefKind>,
    initial_contents: HashMap<ResourceId, InitialContents>,
    dirty: HashSet<ResourceId>,
    pending_dirty: HashSet<ResourceId>,
    /// Resources created while replaying inside the frame; released before
    /// a non-partial re-execution.
    in_frame: Vec<ResourceId>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- identity -------------------------------------------------------

    pub fn register_live(&mut self, id: ResourceId, live: DriverHandle, kind: ResourceKind) {
        self.live_to_id.insert(live, id);
        self.id_to_live.insert(id, live);
        self.kinds.insert(id, kind);
    }

    /// Register a resource created during in-frame replay so it can be
    /// released before the next full re-execution.
    pub fn register_in_frame(&mut self, id: ResourceId, live: DriverHandle, kind: ResourceKind) {
        self.register_live(id, live, kind);
        self.in_frame.push(id);
    }

    pub fn unregister(&mut self, id: ResourceId) {
        if let Some(live) = self.id_to_live.remove(&id) {
            self.live_to_id.remove(&live);
        }
        self.kinds.remove(&id);
    }

    pub fn live_handle(&self, id: ResourceId) -> Option<DriverHandle> {
        self.id_to_live.get(&id).copied()
    }

    pub fn id_for_live(&self, live: DriverHandle) -> Option<ResourceId> {
        self.live_to_id.get(&live).copied()
    }

    pub fn kind_of(&self, id: ResourceId) -> Option<ResourceKind> {
        self.kinds.get(&id).copied()
    }

    // ---- records --------------------------------------------------------

    pub fn add_record(&mut self, id: ResourceId) -> &mut ResourceRecord {
        self.records.entry(id).or_insert_with(ResourceRecord::default)
    }

    pub fn record(&self, id: ResourceId) -> Option<&ResourceRecord> {
        self.records.get(&id)
    }

    pub fn record_mut(&mut self, id: ResourceId) -> Option<&mut ResourceRecord> {
        self.records.get_mut(&id)
    }

    pub fn destroy_record(&mut self, id: ResourceId) {
        self.records.remove(&id);
    }

    // ---- frame references ----------------------------------------------

    /// Record that the frame touched `id`. The strongest reference wins.
    /// The record's parent and the resources its own chunks depend on are
    /// pulled in as reads, so creation chunks are emitted in dependency
    /// order with nothing missing.
    pub fn mark_frame_referenced(&mut self, id: ResourceId, kind: FrameRefKind) {
        if id.is_null() {
            return;
        }
        let entry = self.frame_refs.entry(id).or_insert(kind);
        if kind.rank() > entry.rank() {
            *entry = kind;
        }

        let mut deps: Vec<ResourceId> = Vec::new();
        if let Some(record) = self.records.get(&id) {
            if !record.parent.is_null() {
                deps.push(record.parent);
            }
            deps.extend(record.frame_refs.iter().map(|&(dep, _)| dep));
        }
        for dep in deps {
            if dep != id && !self.frame_refs.contains_key(&dep) {
                self.mark_frame_referenced(dep, FrameRefKind::Read);
            }
        }
    }

    pub fn is_frame_referenced(&self, id: ResourceId) -> bool {
        self.frame_refs.contains_key(&id)
    }

    pub fn clear_referenced(&mut self) {
        self.frame_refs.clear();
    }

    /// Referenced ids in ascending id order. Ids allocate monotonically and
    /// parents exist before children, so this order is topological.
    pub fn referenced_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.frame_refs.keys().copied().collect();
        ids.sort();
        ids
    }

    // ---- dirty tracking -------------------------------------------------

    pub fn mark_dirty(&mut self, id: ResourceId) {
        self.dirty.insert(id);
    }

    /// Dirty-marking that arrives while a capture transition is in flight
    /// is parked and folded in afterwards.
    pub fn mark_pending_dirty(&mut self, id: ResourceId) {
        self.pending_dirty.insert(id);
    }

    pub fn flush_pending_dirty(&mut self) {
        for id in self.pending_dirty.drain() {
            self.dirty.insert(id);
        }
    }

    pub fn is_dirty(&self, id: ResourceId) -> bool {
        self.dirty.contains(&id)
    }

    // ---- initial contents ----------------------------------------------

    /// Snapshot the pre-frame contents of every resource that may need
    /// them: everything written since its creation (the dirty set) plus
    /// every live coherent mapping. Which snapshots actually reach the log
    /// is decided at flush time, once the frame's reference set is known.
    pub fn prepare_initial_contents<D: Driver>(&mut self, driver: &mut D) {
        let mut wanted: Vec<ResourceId> = self.dirty.iter().copied().collect();
        for (&id, record) in &self.records {
            if record.mem_map.as_ref().is_some_and(|m| m.mapped) {
                wanted.push(id);
            }
        }
        wanted.sort();
        wanted.dedup();

        for id in wanted {
            match self.snapshot(driver, id) {
                Some(contents) => {
                    self.initial_contents.insert(id, contents);
                }
                None => {
                    debug!(id = %id, "no snapshot path for dirty resource");
                }
            }
        }
    }

    /// Snapshots that must be written into the capture: the resource was
    /// referenced by the frame with anything other than a plain overwrite.
    pub fn needed_initial_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .initial_contents
            .keys()
            .copied()
            .filter(|id| {
                self.frame_refs
                    .get(id)
                    .map(|&kind| kind != FrameRefKind::Write)
                    .unwrap_or(false)
            })
            .collect();
        ids.sort();
        ids
    }

    fn snapshot<D: Driver>(&self, driver: &mut D, id: ResourceId) -> Option<InitialContents> {
        let live = self.live_handle(id)?;
        match self.kind_of(id)? {
            ResourceKind::Buffer => {
                let len = self.records.get(&id).map(|r| r.length).unwrap_or(0);
                match driver.read_buffer(live, 0, len) {
                    Ok(data) => Some(InitialContents {
                        kind: ResourceKind::Buffer,
                        data,
                    }),
                    Err(err) => {
                        warn!(id = %id, error = %err, "buffer snapshot failed");
                        None
                    }
                }
            }
            ResourceKind::Image => match driver.read_image(live) {
                Ok(rb) => {
                    // repack to tight rows; readbacks may pad
                    let tight = (rb.width * rb.format.bytes_per_pixel()) as usize;
                    let mut data = Vec::with_capacity(tight * rb.height as usize);
                    for y in 0..rb.height as usize {
                        let row = y * rb.row_pitch as usize;
                        data.extend_from_slice(&rb.data[row..row + tight]);
                    }
                    Some(InitialContents {
                        kind: ResourceKind::Image,
                        data,
                    })
                }
                Err(err) => {
                    warn!(id = %id, error = %err, "image snapshot failed");
                    None
                }
            },
            ResourceKind::Other => None,
        }
    }

    /// Replay side: store a snapshot decoded from an initial-contents chunk.
    pub fn store_initial_contents(&mut self, id: ResourceId, contents: InitialContents) {
        self.initial_contents.insert(id, contents);
    }

    pub fn initial_contents_of(&self, id: ResourceId) -> Option<&InitialContents> {
        self.initial_contents.get(&id)
    }

    pub fn initial_contents_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.initial_contents.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Write every stored snapshot back to the live resources, restoring
    /// the capture-boundary state. Missing live resources are logged and
    /// skipped: the resource was leaked at capture time or the log is
    /// truncated, and dependent chunks will skip the same way.
    pub fn apply_initial_contents<D: Driver>(&mut self, driver: &mut D) {
        let ids = self.initial_contents_ids();
        for id in ids {
            let contents = &self.initial_contents[&id];
            let Some(live) = self.live_handle(id) else {
                warn!(id = %id, "initial contents for unknown resource, skipping");
                continue;
            };
            let result = match contents.kind {
                ResourceKind::Buffer => driver.write_buffer(live, 0, &contents.data),
                ResourceKind::Image => driver.write_image(live, &contents.data),
                ResourceKind::Other => Ok(()),
            };
            if let Err(err) = result {
                warn!(id = %id, error = %err, "applying initial contents failed");
            }
        }
    }

    pub fn free_initial_contents(&mut self) {
        self.initial_contents.clear();
    }

    /// Splice the creation chunks of every frame-referenced resource into
    /// the file stream, dependencies first: a record's chunks may name any
    /// resource in its parent chain or dependency list, so those are
    /// emitted before it.
    pub fn insert_referenced_chunks(&self, file: &mut ChunkWriter) {
        let mut emitted = HashSet::new();
        for id in self.referenced_ids() {
            self.insert_record_chunks(id, file, &mut emitted);
        }
    }

    fn insert_record_chunks(
        &self,
        id: ResourceId,
        file: &mut ChunkWriter,
        emitted: &mut HashSet<ResourceId>,
    ) {
        if !emitted.insert(id) {
            return;
        }
        let Some(record) = self.records.get(&id) else {
            return;
        };
        if record.special_resource {
            return;
        }
        if !record.parent.is_null() {
            self.insert_record_chunks(record.parent, file, emitted);
        }
        for &(dep, _) in &record.frame_refs {
            if dep != id {
                self.insert_record_chunks(dep, file, emitted);
            }
        }
        for chunk in record.chunks() {
            file.insert(chunk.clone());
        }
    }

    /// Serialize the needed snapshots as initial-contents chunks.
    pub fn insert_initial_contents_chunks(&self, file: &mut ChunkWriter) {
        let mut writer = ChunkWriter::new(false);
        for id in self.needed_initial_ids() {
            let contents = &self.initial_contents[&id];
            writer.begin_chunk(ChunkKind::InitialContents);
            writer.write_id("resource", id);
            writer.write_u32("resourceKind", contents.kind as u32);
            writer.write_bytes("contents", &contents.data);
            if let Some(chunk) = writer.end_chunk(ChunkKind::InitialContents) {
                file.insert(chunk);
            }
        }
    }

    // ---- lifecycle ------------------------------------------------------

    /// Destroy resources created during in-frame replay.
    pub fn release_in_frame_resources<D: Driver>(&mut self, driver: &mut D) {
        let ids = std::mem::take(&mut self.in_frame);
        for id in ids {
            if let Some(live) = self.live_handle(id) {
                driver.destroy(live);
            }
            self.unregister(id);
            self.records.remove(&id);
        }
    }

    /// After a capture is flushed, records are marked as needing their
    /// creation chunks re-emitted for any future capture.
    pub fn mark_unwritten_resources(&mut self) {
        for record in self.records.values_mut() {
            record.data_in_serialiser = false;
        }
    }

    /// Shutdown safety path: forget everything without touching the driver,
    /// tolerating handles the application leaked.
    pub fn clear_without_releasing(&mut self) {
        let leaked = self.records.len();
        if leaked > 0 {
            debug!(records = leaked, "clearing resource manager without releasing");
        }
        self.live_to_id.clear();
        self.id_to_live.clear();
        self.kinds.clear();
        self.records.clear();
        self.frame_refs.clear();
        self.initial_contents.clear();
        self.dirty.clear();
        self.pending_dirty.clear();
        self.in_frame.clear();
    }
}

/// Smallest byte range where `new` and `old` differ, or `None` if equal.
/// Used to turn a coherent mapping's shadow comparison into a flush chunk.
pub fn find_diff_range(new: &[u8], old: &[u8]) -> Option<Range<usize>> {
    if new.len() != old.len() {
        return Some(0..new.len().max(old.len()));
    }
    let start = new.iter().zip(old).position(|(a, b)| a != b)?;
    let end = new
        .iter()
        .zip(old)
        .rposition(|(a, b)| a != b)
        .map(|i| i + 1)
        .unwrap_or(new.len());
    Some(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_protocol::ResourceIdGen;

    #[test]
    fn frame_references_upgrade_monotonically() {
        let mut rm = ResourceManager::new();
        let id = ResourceIdGen::next();
        rm.mark_frame_referenced(id, FrameRefKind::ReadBeforeWrite);
        rm.mark_frame_referenced(id, FrameRefKind::Read);
        assert_eq!(rm.frame_refs[&id], FrameRefKind::ReadBeforeWrite);

        rm.clear_referenced();
        rm.mark_frame_referenced(id, FrameRefKind::Read);
        rm.mark_frame_referenced(id, FrameRefKind::Write);
        assert_eq!(rm.frame_refs[&id], FrameRefKind::Write);
    }

    #[test]
    fn referencing_a_child_pulls_in_the_parent() {
        let mut rm = ResourceManager::new();
        let parent = ResourceIdGen::next();
        let child = ResourceIdGen::next();
        rm.add_record(parent);
        rm.add_record(child).parent = parent;

        rm.mark_frame_referenced(child, FrameRefKind::Write);
        assert!(rm.is_frame_referenced(parent));
        assert_eq!(rm.referenced_ids(), vec![parent, child]);
    }

    #[test]
    fn pending_dirty_folds_in_after_transition() {
        let mut rm = ResourceManager::new();
        let id = ResourceIdGen::next();
        rm.mark_pending_dirty(id);
        assert!(!rm.is_dirty(id));
        rm.flush_pending_dirty();
        assert!(rm.is_dirty(id));
    }

    #[test]
    fn diff_range_finds_the_tight_window() {
        assert_eq!(find_diff_range(b"hello", b"hello"), None);
        assert_eq!(find_diff_range(b"hxllo", b"hello"), Some(1..2));
        assert_eq!(find_diff_range(b"hxlxo", b"hello"), Some(1..4));
        assert_eq!(find_diff_range(b"", b""), None);
        assert_eq!(find_diff_range(b"abc", b"ab"), Some(0..3));
    }
}
