//! Shared protocol definitions for the refract capture/replay core.
//!
//! This crate holds everything both sides of the log agree on:
//! - stable resource identifiers and their process-wide generator,
//! - the closed set of chunk kinds with their registered names,
//! - wire-format constants for the log container,
//! - the backend-agnostic GPU state vocabulary used in chunk payloads,
//! - the process-wide capture configuration singletons.
//!
//! Nothing here touches a driver or the filesystem; the serializer lives in
//! `refract-trace` and the interposer in `refract-core`.

mod chunk;
mod id;
mod options;
mod state;

pub use chunk::{ChunkKind, CHUNK_CALLSTACK_FLAG, CHUNK_KIND_MASK, FIRST_CHUNK_ID, NUM_CHUNKS};
pub use id::{ResourceId, ResourceIdGen, REPLAY_ID_BASE};
pub use options::{
    capture_options, collect_callstack, current_api, set_callstack_collector, set_capture_options,
    set_current_api, ApiKind, CaptureOptions, CallstackFn,
};
pub use state::{
    AttachmentDesc, ClearValue, DepthBias, DrawFlags, ImageFormat, ImageLayout, IndexType,
    LoadOp, PipelineBindPoint, RenderArea, StencilFace, StencilFaceSelect, StoreOp,
    SubresourceRange, Topology, Viewport,
};

/// Log container magic, first eight bytes of every capture file.
pub const LOG_MAGIC: [u8; 8] = *b"RFRCLOG\0";

/// Serialization version of the log format. Bumped on any wire change; logs
/// written with a different version are rejected at open.
pub const SERIALISE_VERSION: u32 = 3;
