//! Capture-and-replay core of the refract GPU debugger.
//!
//! [`WrappedDevice`] interposes between an application and a [`Driver`].
//! While writing it records every call into per-resource chunk lists and,
//! when a frame capture is active, assembles a complete log file at the next
//! frame boundary. While reading it re-executes a log against the driver,
//! builds the frame's event and drawcall trees, and supports replaying any
//! prefix of the frame up to a single event, rebuilding the pipeline state
//! that event depends on.
//!
//! Capture entry points take `&self` and are safe to call from many
//! application threads; recording is lock-free per thread with coarse locks
//! only around the capture transition. Replay drives the device from a
//! single thread and takes `&mut self`.

mod calls;
mod capture;
mod commands;
mod creation;
mod events;
mod record;
mod replay;
mod resource;
mod threading;
mod thumbnail;
mod wire;

pub use events::{ApiEvent, Drawcall, DrawcallTreeNode, EventIndex};
pub use record::{FrameRecord, MemMapState, ResourceRecord, SwapchainInfo};
pub use replay::{ChunkStats, ReplayMode};
pub use resource::{find_diff_range, FrameRefKind, InitialContents, ResourceKind, ResourceManager};

use commands::InternalCmdBuffers;
use refract_driver::{Driver, DriverError};
use refract_protocol::{ImageLayout, ResourceId, ResourceIdGen, SubresourceRange};
use refract_trace::{AppInitParams, Chunk, ChunkReader, TraceError};
use replay::ReplayState;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use threading::{ThreadScratch, ThreadWriters};

/// Errors from the capture half of the device.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// A capture operation was issued in the wrong state, e.g. ending a
    /// capture while idle.
    #[error("invalid capture state: {0}")]
    InvalidState(&'static str),

    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Errors from the replay half of the device.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// A chunk kind at or above the API range that this build does not know.
    #[error("unknown chunk kind {0}")]
    UnknownChunk(u32),

    #[error("missing resource {0} referenced by the log")]
    MissingResource(ResourceId),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("invalid replay state: {0}")]
    InvalidState(&'static str),

    #[error("malformed log: {0}")]
    MalformedLog(&'static str),
}

pub type ReplayResult<T> = Result<T, ReplayError>;

/// The device state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum CaptureState {
    WritingIdle = 0,
    WritingCapframe = 1,
    Reading = 2,
    Executing = 3,
}

impl CaptureState {
    fn from_u32(value: u32) -> CaptureState {
        match value {
            1 => CaptureState::WritingCapframe,
            2 => CaptureState::Reading,
            3 => CaptureState::Executing,
            _ => CaptureState::WritingIdle,
        }
    }

    pub fn is_writing(self) -> bool {
        matches!(self, CaptureState::WritingIdle | CaptureState::WritingCapframe)
    }
}

/// Tracked layouts of one image, one entry per subresource range.
pub type ImageLayouts = Vec<(SubresourceRange, ImageLayout)>;

/// Frame-time accounting while idle-recording.
#[derive(Debug, Default)]
pub(crate) struct FrameTimes {
    pub last_present: Option<std::time::Instant>,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub count: u32,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The interposer: owns the driver, the resource manager and the capture /
/// replay machinery.
pub struct WrappedDevice<D: Driver> {
    pub(crate) driver: Mutex<D>,
    state: AtomicU32,
    pub(crate) frame_counter: AtomicU32,
    pub(crate) app_controlled_capture: AtomicBool,
    pub(crate) app_params: AppInitParams,
    pub(crate) instance_id: ResourceId,
    pub(crate) capture_dir: PathBuf,
    pub(crate) last_capture_path: Mutex<Option<PathBuf>>,

    /// Outermost lock: every state transition and any dirty-marking that
    /// must be atomic with respect to it happens inside this.
    pub(crate) cap_transition: Mutex<()>,
    pub(crate) resources: Mutex<ResourceManager>,
    pub(crate) image_layouts: Mutex<HashMap<ResourceId, ImageLayouts>>,
    pub(crate) coherent_maps: Mutex<Vec<ResourceId>>,
    pub(crate) swap_lookup: Mutex<HashMap<u64, ResourceId>>,
    pub(crate) cmd_buffer_records: Mutex<Vec<ResourceId>>,
    pub(crate) frame_capture_record: ResourceId,
    pub(crate) header_chunk: Mutex<Option<Chunk>>,
    pub(crate) frame_records: Mutex<Vec<FrameRecord>>,
    pub(crate) thread_writers: ThreadWriters,
    pub(crate) thread_scratch: ThreadScratch,
    pub(crate) internal_cmds: Mutex<InternalCmdBuffers>,
    pub(crate) frame_times: Mutex<FrameTimes>,

    pub(crate) reader: Option<ChunkReader>,
    pub(crate) replay: ReplayState,
}

impl<D: Driver> WrappedDevice<D> {
    /// Build a capture-side device. Captured frames are written into
    /// `capture_dir`.
    pub fn new_capture(driver: D, mut params: AppInitParams, capture_dir: PathBuf) -> Self {
        if params.instance_id.is_null() {
            params.instance_id = ResourceIdGen::next();
        }
        let instance_id = params.instance_id;

        let frame_capture_record = ResourceIdGen::next();
        let mut resources = ResourceManager::new();
        let record = resources.add_record(frame_capture_record);
        record.special_resource = true;

        Self {
            driver: Mutex::new(driver),
            state: AtomicU32::new(CaptureState::WritingIdle as u32),
            frame_counter: AtomicU32::new(0),
            app_controlled_capture: AtomicBool::new(false),
            app_params: params,
            instance_id,
            capture_dir,
            last_capture_path: Mutex::new(None),
            cap_transition: Mutex::new(()),
            resources: Mutex::new(resources),
            image_layouts: Mutex::new(HashMap::new()),
            coherent_maps: Mutex::new(Vec::new()),
            swap_lookup: Mutex::new(HashMap::new()),
            cmd_buffer_records: Mutex::new(Vec::new()),
            frame_capture_record,
            header_chunk: Mutex::new(None),
            frame_records: Mutex::new(Vec::new()),
            thread_writers: ThreadWriters::new(true),
            thread_scratch: ThreadScratch::new(),
            internal_cmds: Mutex::new(InternalCmdBuffers::default()),
            frame_times: Mutex::new(FrameTimes::default()),
            reader: None,
            replay: ReplayState::default(),
        }
    }

    /// Build a replay-side device over a log file. Fails without leaving
    /// partial state behind if the log cannot be opened or its serialise
    /// version does not match.
    pub fn new_replay(driver: D, log_path: &Path) -> ReplayResult<Self> {
        let mut reader = ChunkReader::open(log_path)?;
        reader.set_debug_text(true);
        ResourceIdGen::set_replay_ids();
        let app_params = reader.header().params.clone();
        let instance_id = app_params.instance_id;

        Ok(Self {
            driver: Mutex::new(driver),
            state: AtomicU32::new(CaptureState::Reading as u32),
            frame_counter: AtomicU32::new(0),
            app_controlled_capture: AtomicBool::new(false),
            app_params,
            instance_id,
            capture_dir: PathBuf::new(),
            last_capture_path: Mutex::new(None),
            cap_transition: Mutex::new(()),
            resources: Mutex::new(ResourceManager::new()),
            image_layouts: Mutex::new(HashMap::new()),
            coherent_maps: Mutex::new(Vec::new()),
            swap_lookup: Mutex::new(HashMap::new()),
            cmd_buffer_records: Mutex::new(Vec::new()),
            frame_capture_record: ResourceId::NULL,
            header_chunk: Mutex::new(None),
            frame_records: Mutex::new(Vec::new()),
            thread_writers: ThreadWriters::new(true),
            thread_scratch: ThreadScratch::new(),
            internal_cmds: Mutex::new(InternalCmdBuffers::default()),
            frame_times: Mutex::new(FrameTimes::default()),
            reader: Some(reader),
            replay: ReplayState::default(),
        })
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u32(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: CaptureState) {
        self.state.store(state as u32, Ordering::Release);
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    pub fn instance_id(&self) -> ResourceId {
        self.instance_id
    }

    pub fn app_params(&self) -> &AppInitParams {
        &self.app_params
    }

    /// Direct access to the driver; for replay-side inspection and tests.
    pub fn driver_mut(&mut self) -> &mut D {
        self.driver.get_mut().unwrap_or_else(|p| p.into_inner())
    }

    /// Path of the most recently written capture, if any.
    pub fn last_capture_path(&self) -> Option<PathBuf> {
        lock(&self.last_capture_path).clone()
    }

    /// Frame records known to this device (captured or loaded).
    pub fn frame_records(&self) -> Vec<FrameRecord> {
        lock(&self.frame_records).clone()
    }

    /// The stable id of a live driver handle, if the resource is known.
    pub fn id_for_live(&self, live: refract_driver::DriverHandle) -> Option<ResourceId> {
        lock(&self.resources).id_for_live(live)
    }

    /// The live driver handle a stable id currently maps to, if any.
    pub fn live_handle_of(&self, id: ResourceId) -> Option<refract_driver::DriverHandle> {
        lock(&self.resources).live_handle(id)
    }

    /// Shut the device down, tolerating application-leaked handles.
    pub fn shutdown(&mut self) {
        let writers = self.thread_writers.registered();
        let scratch = self.thread_scratch.registered();
        tracing::debug!(
            thread_writers = writers,
            thread_scratch = scratch,
            "shutting down wrapped device"
        );
        self.resources
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .clear_without_releasing();
    }
}
