//! Replay-side shadow of creation parameters.
//!
//! The replay engine needs more than live handles: partial replay rebinds
//! pipelines and descriptor sets, which requires knowing each pipeline's
//! layout, each layout's set layouts and their dynamic-descriptor counts,
//! and each render pass's attachments. Render passes also get a second,
//! load-op-preserving driver variant created up front for partial replays
//! that re-enter a pass whose targets are already partially written.

use refract_driver::{DriverHandle, RenderPassDesc};
use refract_protocol::{ResourceId, Topology};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub(crate) struct RenderPassInfo {
    pub desc: RenderPassDesc,
    /// Same pass with every attachment's load op forced to `Load`.
    pub load_rp: DriverHandle,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PipelineInfo {
    pub layout: ResourceId,
    pub topology: Topology,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PipelineLayoutInfo {
    pub set_layouts: Vec<ResourceId>,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SetLayoutInfo {
    pub dynamic_count: u32,
}

#[derive(Default)]
pub(crate) struct CreationInfo {
    pub render_passes: HashMap<ResourceId, RenderPassInfo>,
    pub pipelines: HashMap<ResourceId, PipelineInfo>,
    pub pipeline_layouts: HashMap<ResourceId, PipelineLayoutInfo>,
    pub set_layouts: HashMap<ResourceId, SetLayoutInfo>,
}
