//! The replay engine.
//!
//! `read_log_initialisation` walks the whole log once: creation chunks
//! recreate resources against the live driver, the capture scope applies
//! initial contents, and the frame itself is walked in `Reading` state,
//! executing every call while building the event list and drawcall tree.
//!
//! `replay_log` re-executes the frame (or a window of it) in `Executing`
//! state. A non-partial replay restores initial contents and re-records
//! everything; a partial replay jumps to the start event's file offset and
//! re-records only the command buffer containing the target window into a
//! fresh buffer. `OnlyDraw` builds a single command buffer holding just the
//! target event, with the surrounding pipeline/descriptor/dynamic state
//! rebuilt from the partial state vector and, if a render pass was active
//! at the boundary, a load-op-preserving variant of that pass so partially
//! written targets are not re-cleared.

use crate::creation::{
    CreationInfo, PipelineInfo, PipelineLayoutInfo, RenderPassInfo, SetLayoutInfo,
};
use crate::events::{ApiEvent, BakedCmdBufferInfo, DrawTreeBuilder, Drawcall, DrawcallTreeNode, EventIndex};
use crate::resource::{InitialContents, ResourceKind};
use crate::wire;
use crate::{lock, CaptureState, FrameRecord, ReplayError, ReplayResult, WrappedDevice};
use refract_driver::{
    BufferDesc, BufferUsage, ComputePipelineDesc, DescriptorBinding, DescriptorKind,
    DescriptorSetLayoutDesc, Driver, DriverHandle, FramebufferDesc, GraphicsPipelineDesc,
    ImageBarrier, ImageDesc, ImageUsage, PipelineLayoutDesc, RenderPassDesc, SamplerDesc,
    SwapchainDesc,
};
use refract_protocol::{
    AttachmentDesc, ChunkKind, DepthBias, DrawFlags, ImageFormat, ImageLayout, IndexType, LoadOp,
    PipelineBindPoint, RenderArea, ResourceId, StencilFace, StencilFaceSelect, StoreOp, Topology,
    Viewport, FIRST_CHUNK_ID,
};
use refract_trace::ChunkReader;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, error, warn};

/// The three replay modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayMode {
    Full,
    WithoutDraw,
    OnlyDraw,
}

/// Per-kind totals tallied while reading a log.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkStats {
    pub count: u32,
    pub total_bytes: u64,
    pub total_ms: f64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PipelineBinding {
    pub pipeline: ResourceId,
    pub desc_sets: Vec<ResourceId>,
    pub dynamic_offsets: Vec<Vec<u32>>,
}

impl PipelineBinding {
    fn bind_set(&mut self, index: usize, set: ResourceId, offsets: Vec<u32>) {
        if self.desc_sets.len() <= index {
            self.desc_sets.resize(index + 1, ResourceId::NULL);
            self.dynamic_offsets.resize(index + 1, Vec::new());
        }
        self.desc_sets[index] = set;
        self.dynamic_offsets[index] = offsets;
    }
}

/// The state vector rebuilt before a single-draw replay.
#[derive(Clone, Debug, Default)]
pub(crate) struct StateVector {
    pub graphics: PipelineBinding,
    pub compute: PipelineBinding,
    pub viewports: Vec<Viewport>,
    pub scissors: Vec<RenderArea>,
    pub blend_constants: [f32; 4],
    pub min_depth_bound: f32,
    pub max_depth_bound: f32,
    pub line_width: f32,
    pub depth_bias: DepthBias,
    pub front: StencilFace,
    pub back: StencilFace,
    pub index_buffer: (ResourceId, u64, u32),
    pub vertex_buffers: Vec<(ResourceId, u64)>,
    pub render_pass: ResourceId,
    pub framebuffer: ResourceId,
    pub render_area: RenderArea,
}

#[derive(Debug, Default)]
pub(crate) struct PartialReplay {
    pub parent: ResourceId,
    pub base_event: u32,
    pub result_cmd: Option<DriverHandle>,
    pub single_draw_cmd: Option<DriverHandle>,
    pub render_pass_active: bool,
    pub state: StateVector,
}

#[derive(Default)]
pub(crate) struct ReplayState {
    pub root_event_id: u32,
    pub root_drawcall_id: u32,
    pub first_event: u32,
    pub last_event: u32,
    pub last_cmd_buffer: ResourceId,
    pub cur_chunk_offset: u64,
    pub added_drawcall: bool,
    pub in_capture_frame: bool,
    pub root_events: Vec<ApiEvent>,
    pub events: EventIndex,
    pub tree: DrawTreeBuilder,
    pub baked: HashMap<ResourceId, BakedCmdBufferInfo>,
    pub partial: PartialReplay,
    pub creation: CreationInfo,
    pub chunk_stats: BTreeMap<u32, ChunkStats>,
    pub first_frame_offset: u64,
    pub last_frame_offset: u64,
    pub drawcall_tree: Option<DrawcallTreeNode>,
}

impl<D: Driver> WrappedDevice<D> {
    fn rdr(&mut self) -> &mut ChunkReader {
        self.reader.as_mut().expect("replay device has a reader")
    }

    fn res(&mut self) -> &mut crate::ResourceManager {
        self.resources.get_mut().unwrap_or_else(|p| p.into_inner())
    }

    fn drv(&mut self) -> &mut D {
        self.driver.get_mut().unwrap_or_else(|p| p.into_inner())
    }

    /// Replay-visible events of the frame, sorted by event id.
    pub fn events(&self) -> &[ApiEvent] {
        self.replay.events.events()
    }

    /// The baked drawcall tree of the frame.
    pub fn drawcall_tree(&self) -> Option<&DrawcallTreeNode> {
        self.replay.drawcall_tree.as_ref()
    }

    pub fn chunk_stats(&self) -> impl Iterator<Item = (u32, ChunkStats)> + '_ {
        self.replay.chunk_stats.iter().map(|(&k, &v)| (k, v))
    }

    /// Tracked layouts of an image, as last established by capture or
    /// replay of the capture-begin header.
    pub fn image_layouts_of(&self, id: ResourceId) -> Option<crate::ImageLayouts> {
        lock(&self.image_layouts).get(&id).cloned()
    }

    fn live_replay(&mut self, id: ResourceId) -> Option<DriverHandle> {
        let live = self.res().live_handle(id);
        if live.is_none() && !id.is_null() {
            warn!(id = %id, "resource missing at replay, skipping dependent call");
        }
        live
    }

    // ---- log scan -------------------------------------------------------

    /// Scan and execute the log up to and including the captured frame,
    /// building the event and drawcall trees.
    pub fn read_log_initialisation(&mut self) -> ReplayResult<()> {
        if self.reader.is_none() {
            return Err(ReplayError::InvalidState("no log loaded"));
        }

        // One pass to locate every capture scope.
        let (first, last) = {
            let reader = self.rdr();
            reader.rewind();
            let mut first = 0u64;
            let mut last = 0u64;
            while let Some(offset) = reader.skip_to_chunk(ChunkKind::CaptureScope)? {
                last = offset;
                if first == 0 {
                    first = offset;
                }
                let kind = reader.begin_chunk()?;
                reader.skip_current_chunk();
                reader.end_chunk(kind)?;
            }
            reader.rewind();
            (first, last)
        };
        self.replay.first_frame_offset = first;
        self.replay.last_frame_offset = last;

        loop {
            if self.rdr().at_end() {
                break;
            }
            let timer = Instant::now();
            let offset = self.rdr().offset();
            let kind_raw = self.rdr().begin_chunk()?;

            if kind_raw == ChunkKind::CaptureScope as u32 {
                // keep the rest of the log resident for replays
                self.rdr().set_persistent_block(offset);
            }

            self.process_chunk(offset, kind_raw)?;
            self.rdr().end_chunk(kind_raw)?;

            let end_offset = self.rdr().offset();
            let stats = self.replay.chunk_stats.entry(kind_raw).or_default();
            stats.count += 1;
            stats.total_bytes += end_offset - offset;
            stats.total_ms += timer.elapsed().as_secs_f64() * 1e3;

            if kind_raw == ChunkKind::CaptureScope as u32 {
                {
                    let mut driver = lock(&self.driver);
                    let mut res = lock(&self.resources);
                    res.apply_initial_contents(&mut *driver);
                }
                {
                    let mut driver = lock(&self.driver);
                    let mut cmds = lock(&self.internal_cmds);
                    cmds.submit_cmds(&mut *driver)?;
                    cmds.flush_q(&mut *driver)?;
                }
                self.context_replay_log(CaptureState::Reading, 0, u32::MAX, false)?;

                if self.rdr().offset() > self.replay.last_frame_offset {
                    break;
                }
            }
        }

        for (&kind, stats) in &self.replay.chunk_stats {
            debug!(
                count = stats.count,
                total_ms = format_args!("{:.3}", stats.total_ms),
                total_bytes = stats.total_bytes,
                kind = ChunkKind::name_for(kind),
                raw = kind,
                "chunk totals"
            );
        }
        debug!(
            persistent_bytes = self.rdr().len() - self.replay.first_frame_offset,
            "log initialisation done"
        );
        Ok(())
    }

    // ---- frame replay ---------------------------------------------------

    /// Re-execute a window of the captured frame.
    ///
    /// `OnlyDraw` (and any partial window) assumes the partial state vector
    /// reflects the state at the window boundary, i.e. the caller replayed
    /// up to `start_event` first; full and from-zero replays rebuild state
    /// themselves.
    pub fn replay_log(
        &mut self,
        frame_id: u32,
        start_event: u32,
        end_event: u32,
        mode: ReplayMode,
    ) -> ReplayResult<()> {
        let frame = lock(&self.frame_records)
            .get(frame_id as usize)
            .cloned()
            .ok_or(ReplayError::InvalidState("unknown frame"))?;

        self.rdr().set_offset(frame.file_offset)?;

        let mut start_event = start_event;
        let mut partial = true;
        if start_event == 0 && matches!(mode, ReplayMode::Full | ReplayMode::WithoutDraw) {
            start_event = frame.first_event;
            partial = false;
        }

        // skip the capture scope chunk itself
        let kind = self.rdr().begin_chunk()?;
        if kind != ChunkKind::CaptureScope as u32 {
            return Err(ReplayError::MalformedLog("frame offset is not a capture scope"));
        }
        self.rdr().skip_current_chunk();
        self.rdr().end_chunk(kind)?;

        if !partial {
            {
                let mut driver = lock(&self.driver);
                let mut res = lock(&self.resources);
                res.apply_initial_contents(&mut *driver);
            }
            {
                let mut driver = lock(&self.driver);
                let mut cmds = lock(&self.internal_cmds);
                cmds.submit_cmds(&mut *driver)?;
                cmds.flush_q(&mut *driver)?;
            }
            {
                let mut driver = lock(&self.driver);
                let mut res = lock(&self.resources);
                res.release_in_frame_resources(&mut *driver);
            }

            self.replay.partial.render_pass_active = false;
            self.replay.partial.parent = ResourceId::NULL;
            self.replay.partial.base_event = 0;
            self.replay.partial.state = StateVector::default();
            debug_assert!(self.replay.partial.result_cmd.is_none());
        }

        match mode {
            ReplayMode::Full => {
                self.context_replay_log(CaptureState::Executing, start_event, end_event, partial)
            }
            ReplayMode::WithoutDraw => self.context_replay_log(
                CaptureState::Executing,
                start_event,
                end_event.max(1) - 1,
                partial,
            ),
            ReplayMode::OnlyDraw => {
                let cmd = {
                    let mut driver = lock(&self.driver);
                    let mut cmds = lock(&self.internal_cmds);
                    cmds.get_next_cmd(&mut *driver)?
                };
                self.replay.partial.single_draw_cmd = Some(cmd);
                self.drv().begin_command_buffer(cmd)?;

                let rp_active = self.replay.partial.render_pass_active;
                self.replay_state_vector(cmd)?;

                self.context_replay_log(CaptureState::Executing, end_event, end_event, true)?;

                if rp_active {
                    self.drv().cmd_end_render_pass(cmd)?;
                }
                self.drv().end_command_buffer(cmd)?;
                {
                    let mut driver = lock(&self.driver);
                    let mut cmds = lock(&self.internal_cmds);
                    cmds.submit_cmds(&mut *driver)?;
                }
                self.replay.partial.single_draw_cmd = None;
                Ok(())
            }
        }
    }

    /// Rebuild the captured pipeline state into `cmd`. If a render pass was
    /// active at the boundary it is restarted with the load-op variant (no
    /// clears: the targets may be partially written already).
    fn replay_state_vector(&mut self, cmd: DriverHandle) -> ReplayResult<()> {
        let state = self.replay.partial.state.clone();

        if self.replay.partial.render_pass_active {
            if state.render_pass.is_null() {
                return Err(ReplayError::InvalidState(
                    "render pass marked active but none bound",
                ));
            }
            let load_rp = self
                .replay
                .creation
                .render_passes
                .get(&state.render_pass)
                .map(|info| info.load_rp)
                .ok_or(ReplayError::MissingResource(state.render_pass))?;
            let framebuffer = self
                .live_replay(state.framebuffer)
                .ok_or(ReplayError::MissingResource(state.framebuffer))?;

            // clear values are irrelevant: the load pass loads every target
            self.drv()
                .cmd_begin_render_pass(cmd, load_rp, framebuffer, state.render_area, &[])?;

            if !state.graphics.pipeline.is_null() {
                self.bind_pipeline_state(
                    cmd,
                    PipelineBindPoint::Graphics,
                    &state.graphics,
                )?;
            }

            if !state.viewports.is_empty() {
                self.drv().cmd_set_viewports(cmd, &state.viewports)?;
            }
            if !state.scissors.is_empty() {
                self.drv().cmd_set_scissors(cmd, &state.scissors)?;
            }
            self.drv()
                .cmd_set_blend_constants(cmd, state.blend_constants)?;
            self.drv()
                .cmd_set_depth_bounds(cmd, state.min_depth_bound, state.max_depth_bound)?;
            self.drv().cmd_set_line_width(cmd, state.line_width)?;
            self.drv().cmd_set_depth_bias(cmd, state.depth_bias)?;

            for (face, stencil) in [
                (StencilFaceSelect::Back, state.back),
                (StencilFaceSelect::Front, state.front),
            ] {
                self.drv()
                    .cmd_set_stencil_reference(cmd, face, stencil.reference)?;
                self.drv()
                    .cmd_set_stencil_compare_mask(cmd, face, stencil.compare_mask)?;
                self.drv()
                    .cmd_set_stencil_write_mask(cmd, face, stencil.write_mask)?;
            }

            let (ibuf, ioffset, bytewidth) = state.index_buffer;
            if !ibuf.is_null() {
                if let Some(live) = self.live_replay(ibuf) {
                    let index_type = if bytewidth == 4 {
                        IndexType::U32
                    } else {
                        IndexType::U16
                    };
                    self.drv()
                        .cmd_bind_index_buffer(cmd, live, ioffset, index_type)?;
                }
            }
            for (slot, &(vbuf, voffset)) in state.vertex_buffers.iter().enumerate() {
                if vbuf.is_null() {
                    continue;
                }
                if let Some(live) = self.live_replay(vbuf) {
                    self.drv()
                        .cmd_bind_vertex_buffers(cmd, slot as u32, &[live], &[voffset])?;
                }
            }
        }

        if !state.compute.pipeline.is_null() {
            self.bind_pipeline_state(cmd, PipelineBindPoint::Compute, &state.compute)?;
        }

        Ok(())
    }

    /// Bind a pipeline plus the descriptor sets its layout expects, passing
    /// dynamic offsets only where the set layout declares dynamic
    /// descriptors.
    fn bind_pipeline_state(
        &mut self,
        cmd: DriverHandle,
        bind_point: PipelineBindPoint,
        binding: &PipelineBinding,
    ) -> ReplayResult<()> {
        let pipeline = self
            .live_replay(binding.pipeline)
            .ok_or(ReplayError::MissingResource(binding.pipeline))?;
        self.drv().cmd_bind_pipeline(cmd, bind_point, pipeline)?;

        let layout_id = self
            .replay
            .creation
            .pipelines
            .get(&binding.pipeline)
            .map(|p| p.layout)
            .unwrap_or_default();
        let layout_live = match self.live_replay(layout_id) {
            Some(live) => live,
            None => return Ok(()),
        };
        let set_layouts = self
            .replay
            .creation
            .pipeline_layouts
            .get(&layout_id)
            .map(|l| l.set_layouts.clone())
            .unwrap_or_default();

        // iterate only over the sets the layout actually uses
        for (i, set_layout) in set_layouts.iter().enumerate() {
            let bound = binding.desc_sets.get(i).copied().unwrap_or_default();
            if bound.is_null() {
                warn!(set = i, "descriptor set not bound but pipeline layout expects one");
                continue;
            }
            let Some(set_live) = self.live_replay(bound) else {
                continue;
            };
            let dynamic_count = self
                .replay
                .creation
                .set_layouts
                .get(set_layout)
                .map(|s| s.dynamic_count)
                .unwrap_or(0);
            let offsets = if dynamic_count == 0 {
                &[][..]
            } else {
                binding
                    .dynamic_offsets
                    .get(i)
                    .map(|v| v.as_slice())
                    .unwrap_or(&[])
            };
            self.drv()
                .cmd_bind_descriptor_set(cmd, bind_point, layout_live, i as u32, set_live, offsets)?;
        }
        Ok(())
    }

    // ---- the walk -------------------------------------------------------

    fn context_replay_log(
        &mut self,
        read_type: CaptureState,
        start_event: u32,
        end_event: u32,
        partial: bool,
    ) -> ReplayResult<()> {
        self.set_state(read_type);

        let header = self.rdr().begin_chunk()?;
        if header != ChunkKind::CaptureBegin as u32 {
            return Err(ReplayError::MalformedLog("expected capture-begin header"));
        }
        self.replay_capture_begin(!partial)?;
        self.rdr().end_chunk(header)?;
        self.drv().device_wait_idle()?;

        self.replay.root_events.clear();

        if self.state() == CaptureState::Executing {
            let ev = self
                .replay
                .events
                .event_for(start_event)
                .cloned()
                .ok_or(ReplayError::MalformedLog("empty event index"))?;
            self.replay.root_event_id = ev.event_id;

            // a partial replay can jump straight to the start event; a full
            // one must walk past the command-buffer records first
            if partial {
                self.rdr().set_offset(ev.file_offset)?;
                if self.replay.partial.single_draw_cmd.is_none() {
                    self.setup_partial_parent(start_event, end_event)?;
                }
            }

            self.replay.first_event = start_event;
            self.replay.last_event = end_event;
        } else {
            self.replay.root_event_id = 1;
            self.replay.root_drawcall_id = 1;
            self.replay.first_event = 0;
            self.replay.last_event = u32::MAX;
            self.replay.events.clear();
            self.replay.tree = DrawTreeBuilder::new();
            self.replay.baked.clear();
        }

        loop {
            if self.state() == CaptureState::Executing && self.replay.root_event_id > end_event {
                // all requested events done; command-buffer events are not
                // 'real' root events and are blazed through above
                break;
            }
            if self.rdr().at_end() {
                warn!("log ended before the capture footer");
                break;
            }

            let offset = self.rdr().offset();
            let kind_raw = self.rdr().begin_chunk()?;

            self.replay.last_cmd_buffer = ResourceId::NULL;
            self.context_process_chunk(offset, kind_raw)?;

            if kind_raw == ChunkKind::CaptureEnd as u32 {
                break;
            }
            if self.state() == CaptureState::Executing && start_event == end_event {
                break;
            }

            // Event accounting: chunks inside a command buffer tick that
            // buffer's counter (begin/end are synthesized at submit instead);
            // root chunks tick the root counter.
            let cmd = self.replay.last_cmd_buffer;
            if !cmd.is_null() {
                if kind_raw != ChunkKind::BeginCmdBuffer as u32
                    && kind_raw != ChunkKind::EndCmdBuffer as u32
                {
                    if let Some(baked) = self.replay.baked.get_mut(&cmd) {
                        baked.cur_event_id += 1;
                    }
                }
            } else {
                self.replay.root_event_id += 1;
            }
        }

        if self.state() == CaptureState::Reading {
            let root = self.replay.tree.bake();
            self.replay.drawcall_tree = Some(root);
            self.replay.events.sort();
            if let Some(frame) = lock(&self.frame_records).last_mut() {
                frame.first_event = 1;
            }
        }

        if let Some(result) = self.replay.partial.result_cmd.take() {
            self.drv().device_wait_idle()?;
            self.drv().destroy(result);
            self.replay.partial.parent = ResourceId::NULL;
        }

        self.set_state(CaptureState::Reading);
        Ok(())
    }

    /// Find the command buffer whose spliced event range contains the
    /// window and open a fresh buffer to re-record its prefix into.
    fn setup_partial_parent(&mut self, start_event: u32, end_event: u32) -> ReplayResult<()> {
        let parent = self
            .replay
            .baked
            .iter()
            .find(|(_, b)| b.base_event < end_event && end_event <= b.base_event + b.event_count)
            .map(|(&id, b)| (id, b.base_event));
        let Some((parent, base_event)) = parent else {
            return Ok(());
        };

        self.replay.partial.parent = parent;
        self.replay.partial.base_event = base_event;
        if let Some(baked) = self.replay.baked.get_mut(&parent) {
            // local 1-based index of the start event within the buffer
            baked.cur_event_id = start_event.saturating_sub(base_event).max(1);
        }

        let cmd = self.drv().create_command_buffer()?;
        self.drv().begin_command_buffer(cmd)?;
        self.replay.partial.result_cmd = Some(cmd);
        self.replay_state_vector(cmd)?;
        Ok(())
    }

    /// Where a command recorded into `cmd_id` should be re-issued, if
    /// anywhere.
    fn rerecord_target(&mut self, cmd_id: ResourceId) -> Option<DriverHandle> {
        match self.state() {
            CaptureState::Reading => self.res().live_handle(cmd_id),
            CaptureState::Executing => {
                if let Some(single) = self.replay.partial.single_draw_cmd {
                    return Some(single);
                }
                if self.replay.partial.parent == cmd_id {
                    let in_range = self
                        .replay
                        .baked
                        .get(&cmd_id)
                        .map(|b| {
                            b.cur_event_id + self.replay.partial.base_event
                                <= self.replay.last_event
                        })
                        .unwrap_or(false);
                    return in_range.then_some(self.replay.partial.result_cmd).flatten();
                }
                if self.replay.partial.parent.is_null() {
                    return self.res().live_handle(cmd_id);
                }
                None
            }
            _ => None,
        }
    }

    fn context_process_chunk(&mut self, offset: u64, kind_raw: u32) -> ReplayResult<()> {
        self.replay.cur_chunk_offset = offset;
        self.replay.added_drawcall = false;

        self.process_chunk(offset, kind_raw)?;
        self.rdr().end_chunk(kind_raw)?;

        if self.state() == CaptureState::Reading {
            let is_marker = kind_raw == ChunkKind::MarkerBegin as u32
                || kind_raw == ChunkKind::MarkerEnd as u32
                || kind_raw == ChunkKind::SetMarker as u32;
            let is_cmd_boundary = kind_raw == ChunkKind::BeginCmdBuffer as u32
                || kind_raw == ChunkKind::EndCmdBuffer as u32;
            if !is_marker && !is_cmd_boundary && !self.replay.added_drawcall {
                let kind = ChunkKind::from_u32(kind_raw);
                let desc = kind
                    .map(|k| self.rdr().debug_str(k))
                    .unwrap_or_else(|| format!("<unknown {kind_raw}>"));
                self.add_event(kind_raw, desc);
            }
        }
        self.replay.added_drawcall = false;
        Ok(())
    }

    fn add_event(&mut self, kind_raw: u32, description: String) {
        let cmd = self.replay.last_cmd_buffer;
        let callstack = self.rdr().take_last_callstack().unwrap_or_default();
        let event_id = if cmd.is_null() {
            self.replay.root_event_id
        } else {
            self.replay
                .baked
                .get(&cmd)
                .map(|b| b.cur_event_id)
                .unwrap_or(0)
        };
        let event = ApiEvent {
            event_id,
            chunk_kind: kind_raw,
            file_offset: self.replay.cur_chunk_offset,
            description,
            callstack,
        };
        if cmd.is_null() {
            self.replay.root_events.push(event.clone());
            self.replay.events.push(event);
        } else if let Some(baked) = self.replay.baked.get_mut(&cmd) {
            baked.cur_events.push(event.clone());
            baked.events.push(event);
        }
    }

    fn add_drawcall(&mut self, mut draw: Drawcall, has_events: bool) {
        self.replay.added_drawcall = true;

        let cmd = self.replay.last_cmd_buffer;
        let state = &self.replay.partial.state;
        draw.topology = self
            .replay
            .creation
            .pipelines
            .get(&state.graphics.pipeline)
            .map(|p| p.topology)
            .unwrap_or(Topology::Unknown);
        draw.index_byte_width = state.index_buffer.2;
        draw.outputs = [ResourceId::NULL; 8];
        draw.depth_out = ResourceId::NULL;

        if cmd.is_null() {
            draw.event_id = self.replay.root_event_id;
            draw.drawcall_id = self.replay.root_drawcall_id;
            self.replay.root_drawcall_id += 1;
            if has_events {
                draw.events = std::mem::take(&mut self.replay.root_events);
            }
            let push = draw.flags.contains(DrawFlags::PUSH_MARKER);
            if push {
                self.replay.tree.push_marker(draw);
            } else {
                self.replay.tree.add(DrawcallTreeNode::new(draw));
            }
        } else if let Some(baked) = self.replay.baked.get_mut(&cmd) {
            draw.event_id = baked.cur_event_id;
            draw.drawcall_id = baked.draw_count;
            baked.draw_count += 1;
            if has_events {
                draw.events = std::mem::take(&mut baked.cur_events);
            }
            let push = draw.flags.contains(DrawFlags::PUSH_MARKER);
            if push {
                baked.tree.push_marker(draw);
            } else {
                baked.tree.add(DrawcallTreeNode::new(draw));
            }
        }
    }

    // ---- chunk dispatch -------------------------------------------------

    /// Dispatch one chunk to its handler. The match is exhaustive over the
    /// closed kind set; unknown kinds below the API range are skipped
    /// silently for forward compatibility, above it they are logged and
    /// skipped.
    fn process_chunk(&mut self, offset: u64, kind_raw: u32) -> ReplayResult<()> {
        let Some(kind) = ChunkKind::from_u32(kind_raw) else {
            if kind_raw >= FIRST_CHUNK_ID {
                error!(kind = kind_raw, "unrecognised chunk kind, skipping");
            } else {
                debug!(kind = kind_raw, "skipping reserved system chunk");
            }
            self.rdr().skip_current_chunk();
            return Ok(());
        };

        match kind {
            ChunkKind::DeviceInit => self.replay_device_init(),
            ChunkKind::UnmapMemory | ChunkKind::FlushMappedMemory => self.replay_mapped_write(),
            ChunkKind::CreateBuffer => self.replay_create_buffer(),
            ChunkKind::CreateImage => self.replay_create_image(),
            ChunkKind::CreateSampler => self.replay_create_sampler(),
            ChunkKind::CreateShaderModule => self.replay_create_shader_module(),
            ChunkKind::CreateRenderPass => self.replay_create_render_pass(),
            ChunkKind::CreateFramebuffer => self.replay_create_framebuffer(),
            ChunkKind::CreateDescriptorSetLayout => self.replay_create_set_layout(),
            ChunkKind::CreatePipelineLayout => self.replay_create_pipeline_layout(),
            ChunkKind::AllocDescriptorSets => self.replay_alloc_descriptor_set(),
            ChunkKind::UpdateDescriptorSet => self.replay_update_descriptor_set(),
            ChunkKind::CreateGraphicsPipeline => self.replay_create_graphics_pipeline(),
            ChunkKind::CreateComputePipeline => self.replay_create_compute_pipeline(),
            ChunkKind::CreateSwapchain => self.replay_create_swapchain(),
            ChunkKind::GetSwapchainImages => self.replay_get_swapchain_images(),
            ChunkKind::BeginCmdBuffer => self.replay_begin_cmd_buffer(),
            ChunkKind::EndCmdBuffer => self.replay_end_cmd_buffer(),
            ChunkKind::ResetCmdBuffer => self.replay_reset_cmd_buffer(),
            ChunkKind::QueueSubmit => self.replay_queue_submit(),
            ChunkKind::QueueWaitIdle => {
                self.drv().queue_wait_idle()?;
                Ok(())
            }
            ChunkKind::DeviceWaitIdle => {
                self.drv().device_wait_idle()?;
                Ok(())
            }
            ChunkKind::BeginRenderPass => self.replay_begin_render_pass(),
            ChunkKind::EndRenderPass => self.replay_end_render_pass(),
            ChunkKind::BindPipeline => self.replay_bind_pipeline(),
            ChunkKind::BindDescriptorSets => self.replay_bind_descriptor_set(),
            ChunkKind::BindVertexBuffers => self.replay_bind_vertex_buffers(),
            ChunkKind::BindIndexBuffer => self.replay_bind_index_buffer(),
            ChunkKind::SetViewport => self.replay_set_viewports(),
            ChunkKind::SetScissor => self.replay_set_scissors(),
            ChunkKind::SetLineWidth => self.replay_set_line_width(),
            ChunkKind::SetDepthBias => self.replay_set_depth_bias(),
            ChunkKind::SetBlendConstants => self.replay_set_blend_constants(),
            ChunkKind::SetDepthBounds => self.replay_set_depth_bounds(),
            ChunkKind::SetStencilCompareMask => self.replay_set_stencil(kind),
            ChunkKind::SetStencilWriteMask => self.replay_set_stencil(kind),
            ChunkKind::SetStencilReference => self.replay_set_stencil(kind),
            ChunkKind::CopyBuffer => self.replay_copy_buffer(),
            ChunkKind::CopyImage => self.replay_copy_image(),
            ChunkKind::UpdateBuffer => self.replay_update_buffer(),
            ChunkKind::FillBuffer => self.replay_fill_buffer(),
            ChunkKind::PushConstants => self.replay_push_constants(),
            ChunkKind::ClearColorImage => self.replay_clear_color(),
            ChunkKind::ClearDepthStencilImage => self.replay_clear_depth_stencil(),
            ChunkKind::PipelineBarrier => self.replay_pipeline_barrier(),
            ChunkKind::Draw => self.replay_draw(),
            ChunkKind::DrawIndexed => self.replay_draw_indexed(),
            ChunkKind::DrawIndirect => self.replay_draw_indirect(false),
            ChunkKind::DrawIndexedIndirect => self.replay_draw_indirect(true),
            ChunkKind::Dispatch => self.replay_dispatch(),
            ChunkKind::DispatchIndirect => self.replay_dispatch_indirect(),
            ChunkKind::MarkerBegin => self.replay_marker(kind),
            ChunkKind::SetMarker => self.replay_marker(kind),
            ChunkKind::MarkerEnd => self.replay_marker_end(),
            ChunkKind::CaptureScope => self.replay_capture_scope(offset),
            ChunkKind::CaptureBegin => {
                // reached when scanning rather than via context replay
                self.rdr().skip_current_chunk();
                Ok(())
            }
            ChunkKind::CaptureEnd => self.replay_capture_end(),
            ChunkKind::InitialContents => self.replay_initial_contents(),
        }
    }

    // ---- framing handlers ----------------------------------------------

    fn replay_device_init(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let app_name = r.read_str("appName")?;
        let engine_name = r.read_str("engineName")?;
        let _app_version = r.read_u32("appVersion")?;
        let _engine_version = r.read_u32("engineVersion")?;
        let _api_version = r.read_u32("apiVersion")?;
        let instance = r.read_id("instance")?;
        debug!(app = %app_name, engine = %engine_name, instance = %instance, "device init");
        Ok(())
    }

    fn replay_capture_scope(&mut self, offset: u64) -> ReplayResult<()> {
        let r = self.rdr();
        let frame_number = r.read_u32("frameNumber")?;
        let _initial = r.read_id_array("initialContents")?;
        self.replay.in_capture_frame = true;
        lock(&self.frame_records).push(FrameRecord {
            frame_number,
            file_offset: offset,
            first_event: 1,
            ..FrameRecord::default()
        });
        Ok(())
    }

    fn replay_initial_contents(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("resource")?;
        let kind_raw = r.read_u32("resourceKind")?;
        let data = r.read_bytes("contents")?;
        let kind = ResourceKind::from_u32(kind_raw)
            .ok_or(ReplayError::MalformedLog("unknown initial contents kind"))?;
        self.res()
            .store_initial_contents(id, InitialContents { kind, data });
        Ok(())
    }

    fn replay_capture_begin(&mut self, apply: bool) -> ReplayResult<()> {
        let image_count = self.rdr().read_u32("imageCount")?;
        let mut barriers = Vec::new();
        for _ in 0..image_count {
            let id = self.rdr().read_id("image")?;
            let range_count = self.rdr().read_u32("rangeCount")?;
            let mut layouts = Vec::with_capacity(range_count as usize);
            for _ in 0..range_count {
                let range = wire::read_subresource_range(self.rdr())?;
                let layout_raw = self.rdr().read_u32("layout")?;
                let layout = ImageLayout::from_u32(layout_raw)
                    .ok_or(ReplayError::MalformedLog("unknown image layout"))?;
                layouts.push((range, layout));
            }
            if let Some(live) = self.res().live_handle(id) {
                for &(range, layout) in &layouts {
                    barriers.push(ImageBarrier {
                        image: live,
                        old_layout: ImageLayout::General,
                        new_layout: layout,
                        range,
                    });
                }
            }
            lock(&self.image_layouts).insert(id, layouts);
        }

        if apply && !barriers.is_empty() {
            let cmd = {
                let mut driver = lock(&self.driver);
                let mut cmds = lock(&self.internal_cmds);
                cmds.get_next_cmd(&mut *driver)?
            };
            let driver = self.drv();
            driver.begin_command_buffer(cmd)?;
            driver.cmd_pipeline_barrier(cmd, &barriers)?;
            driver.end_command_buffer(cmd)?;
            let mut driver = lock(&self.driver);
            let mut cmds = lock(&self.internal_cmds);
            cmds.submit_cmds(&mut *driver)?;
        }
        Ok(())
    }

    fn replay_capture_end(&mut self) -> ReplayResult<()> {
        let backbuffer = self.rdr().read_id("backbuffer")?;
        if self.state() == CaptureState::Reading {
            self.add_event(ChunkKind::CaptureEnd as u32, "Present()".to_owned());
            self.add_drawcall(
                Drawcall {
                    name: "Present()".to_owned(),
                    flags: DrawFlags::PRESENT,
                    copy_destination: backbuffer,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    // ---- creation handlers ---------------------------------------------

    fn register_replayed(&mut self, id: ResourceId, live: DriverHandle, kind: ResourceKind) {
        let in_frame = self.replay.in_capture_frame;
        let res = self.res();
        if in_frame {
            res.register_in_frame(id, live, kind);
        } else {
            res.register_live(id, live, kind);
        }
    }

    fn replay_create_buffer(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("buffer")?;
        let size = r.read_u64("size")?;
        let usage = r.read_u32("usage")?;
        let host_coherent = r.read_bool("hostCoherent")?;
        let desc = BufferDesc {
            size,
            usage: BufferUsage::from_bits_truncate(usage),
            host_coherent,
        };
        let live = self.drv().create_buffer(&desc)?;
        self.register_replayed(id, live, ResourceKind::Buffer);
        self.res().add_record(id).length = size;
        Ok(())
    }

    fn replay_create_image(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("image")?;
        let format_raw = r.read_u32("format")?;
        let width = r.read_u32("width")?;
        let height = r.read_u32("height")?;
        let mip_levels = r.read_u32("mipLevels")?;
        let array_layers = r.read_u32("arrayLayers")?;
        let usage = r.read_u32("usage")?;
        let format = ImageFormat::from_u32(format_raw)
            .ok_or(ReplayError::MalformedLog("unknown image format"))?;
        let desc = ImageDesc {
            format,
            width,
            height,
            mip_levels,
            array_layers,
            usage: ImageUsage::from_bits_truncate(usage),
        };
        let live = self.drv().create_image(&desc)?;
        self.register_replayed(id, live, ResourceKind::Image);
        Ok(())
    }

    fn replay_create_sampler(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("sampler")?;
        let desc = SamplerDesc {
            linear_filter: r.read_bool("linearFilter")?,
            address_clamp: r.read_bool("addressClamp")?,
        };
        let live = self.drv().create_sampler(&desc)?;
        self.register_replayed(id, live, ResourceKind::Other);
        Ok(())
    }

    fn replay_create_shader_module(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("shaderModule")?;
        let code = r.read_bytes("code")?;
        let live = self.drv().create_shader_module(&code)?;
        self.register_replayed(id, live, ResourceKind::Other);
        Ok(())
    }

    fn replay_create_render_pass(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("renderPass")?;
        let count = r.read_u32("attachmentCount")?;
        let mut attachments = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let format_raw = r.read_u32("format")?;
            let load_raw = r.read_u32("loadOp")?;
            let store_raw = r.read_u32("storeOp")?;
            attachments.push(AttachmentDesc {
                format: ImageFormat::from_u32(format_raw)
                    .ok_or(ReplayError::MalformedLog("unknown attachment format"))?,
                load_op: LoadOp::from_u32(load_raw)
                    .ok_or(ReplayError::MalformedLog("unknown load op"))?,
                store_op: StoreOp::from_u32(store_raw)
                    .ok_or(ReplayError::MalformedLog("unknown store op"))?,
            });
        }
        let desc = RenderPassDesc { attachments };

        let live = self.drv().create_render_pass(&desc)?;
        // load-op variant for partial replays: everything loads, nothing
        // clears
        let load_desc = RenderPassDesc {
            attachments: desc
                .attachments
                .iter()
                .map(|att| AttachmentDesc {
                    load_op: LoadOp::Load,
                    ..*att
                })
                .collect(),
        };
        let load_rp = self.drv().create_render_pass(&load_desc)?;

        self.register_replayed(id, live, ResourceKind::Other);
        self.replay
            .creation
            .render_passes
            .insert(id, RenderPassInfo { desc, load_rp });
        Ok(())
    }

    fn replay_create_framebuffer(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("framebuffer")?;
        let render_pass = r.read_id("renderPass")?;
        let attachments = r.read_id_array("attachments")?;
        let width = r.read_u32("width")?;
        let height = r.read_u32("height")?;

        let rp_live = self
            .live_replay(render_pass)
            .ok_or(ReplayError::MissingResource(render_pass))?;
        let mut attachment_lives = Vec::with_capacity(attachments.len());
        for &att in &attachments {
            attachment_lives
                .push(self.live_replay(att).ok_or(ReplayError::MissingResource(att))?);
        }
        let live = self.drv().create_framebuffer(&FramebufferDesc {
            render_pass: rp_live,
            attachments: attachment_lives,
            width,
            height,
        })?;
        self.register_replayed(id, live, ResourceKind::Other);
        Ok(())
    }

    fn replay_create_set_layout(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("setLayout")?;
        let count = r.read_u32("bindingCount")?;
        let mut bindings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let binding = r.read_u32("binding")?;
            let kind_raw = r.read_u32("descriptorKind")?;
            let desc_count = r.read_u32("descriptorCount")?;
            bindings.push(DescriptorBinding {
                binding,
                kind: DescriptorKind::from_u32(kind_raw)
                    .ok_or(ReplayError::MalformedLog("unknown descriptor kind"))?,
                count: desc_count,
            });
        }
        let desc = DescriptorSetLayoutDesc { bindings };
        let live = self.drv().create_descriptor_set_layout(&desc)?;
        self.register_replayed(id, live, ResourceKind::Other);
        self.replay.creation.set_layouts.insert(
            id,
            SetLayoutInfo {
                dynamic_count: desc.dynamic_count(),
            },
        );
        Ok(())
    }

    fn replay_create_pipeline_layout(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("pipelineLayout")?;
        let set_layouts = r.read_id_array("setLayouts")?;
        let mut lives = Vec::with_capacity(set_layouts.len());
        for &layout in &set_layouts {
            lives.push(
                self.live_replay(layout)
                    .ok_or(ReplayError::MissingResource(layout))?,
            );
        }
        let live = self
            .drv()
            .create_pipeline_layout(&PipelineLayoutDesc { set_layouts: lives })?;
        self.register_replayed(id, live, ResourceKind::Other);
        self.replay
            .creation
            .pipeline_layouts
            .insert(id, PipelineLayoutInfo { set_layouts });
        Ok(())
    }

    fn replay_alloc_descriptor_set(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("descriptorSet")?;
        let layout = r.read_id("setLayout")?;
        let layout_live = self
            .live_replay(layout)
            .ok_or(ReplayError::MissingResource(layout))?;
        let live = self.drv().alloc_descriptor_set(layout_live)?;
        self.register_replayed(id, live, ResourceKind::Other);
        Ok(())
    }

    fn replay_update_descriptor_set(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let set = r.read_id("descriptorSet")?;
        let binding = r.read_u32("binding")?;
        let resource = r.read_id("resource")?;
        let (Some(set_live), Some(resource_live)) =
            (self.live_replay(set), self.live_replay(resource))
        else {
            return Ok(());
        };
        self.drv()
            .update_descriptor_set(set_live, binding, resource_live)?;
        Ok(())
    }

    fn replay_create_graphics_pipeline(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("pipeline")?;
        let layout = r.read_id("pipelineLayout")?;
        let render_pass = r.read_id("renderPass")?;
        let topology_raw = r.read_u32("topology")?;
        let patch_control_points = r.read_u32("patchControlPoints")?;
        let vertex_shader = r.read_id("vertexShader")?;
        let fragment_shader = r.read_id("fragmentShader")?;
        let topology = Topology::from_u32(topology_raw)
            .ok_or(ReplayError::MalformedLog("unknown topology"))?;

        let desc = GraphicsPipelineDesc {
            layout: self
                .live_replay(layout)
                .ok_or(ReplayError::MissingResource(layout))?,
            render_pass: self
                .live_replay(render_pass)
                .ok_or(ReplayError::MissingResource(render_pass))?,
            topology,
            patch_control_points,
            vertex_shader: self
                .live_replay(vertex_shader)
                .ok_or(ReplayError::MissingResource(vertex_shader))?,
            fragment_shader: self
                .live_replay(fragment_shader)
                .ok_or(ReplayError::MissingResource(fragment_shader))?,
        };
        let live = self.drv().create_graphics_pipeline(&desc)?;
        self.register_replayed(id, live, ResourceKind::Other);
        self.replay
            .creation
            .pipelines
            .insert(id, PipelineInfo { layout, topology });
        Ok(())
    }

    fn replay_create_compute_pipeline(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("pipeline")?;
        let layout = r.read_id("pipelineLayout")?;
        let shader = r.read_id("shader")?;
        let desc = ComputePipelineDesc {
            layout: self
                .live_replay(layout)
                .ok_or(ReplayError::MissingResource(layout))?,
            shader: self
                .live_replay(shader)
                .ok_or(ReplayError::MissingResource(shader))?,
        };
        let live = self.drv().create_compute_pipeline(&desc)?;
        self.register_replayed(id, live, ResourceKind::Other);
        self.replay.creation.pipelines.insert(
            id,
            PipelineInfo {
                layout,
                topology: Topology::Unknown,
            },
        );
        Ok(())
    }

    fn replay_create_swapchain(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let id = r.read_id("swapchain")?;
        let format_raw = r.read_u32("format")?;
        let width = r.read_u32("width")?;
        let height = r.read_u32("height")?;
        let image_count = r.read_u32("imageCount")?;
        let desc = SwapchainDesc {
            format: ImageFormat::from_u32(format_raw)
                .ok_or(ReplayError::MalformedLog("unknown swapchain format"))?,
            width,
            height,
            image_count,
        };
        let live = self.drv().create_swapchain(&desc)?;
        self.register_replayed(id, live, ResourceKind::Other);
        Ok(())
    }

    fn replay_get_swapchain_images(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let swapchain = r.read_id("swapchain")?;
        let ids = r.read_id_array("images")?;
        let live = self
            .live_replay(swapchain)
            .ok_or(ReplayError::MissingResource(swapchain))?;
        let lives = self.drv().get_swapchain_images(live)?;
        for (&id, &img_live) in ids.iter().zip(lives.iter()) {
            self.register_replayed(id, img_live, ResourceKind::Image);
        }
        if lives.len() != ids.len() {
            warn!(
                recorded = ids.len(),
                live = lives.len(),
                "swapchain image count differs from capture"
            );
        }
        Ok(())
    }

    fn replay_mapped_write(&mut self) -> ReplayResult<()> {
        let r = self.rdr();
        let buffer = r.read_id("buffer")?;
        let offset = r.read_u64("offset")?;
        let data = r.read_bytes("data")?;
        if let Some(live) = self.live_replay(buffer) {
            self.drv().write_buffer(live, offset, &data)?;
        }
        Ok(())
    }

    // ---- command buffer handlers ---------------------------------------

    fn replay_begin_cmd_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.rdr().read_id("commandBuffer")?;
        self.replay.last_cmd_buffer = cmd;

        match self.state() {
            CaptureState::Reading => {
                let live = match self.res().live_handle(cmd) {
                    Some(live) => {
                        self.drv().reset_command_buffer(live)?;
                        live
                    }
                    None => {
                        let live = self.drv().create_command_buffer()?;
                        self.res()
                            .register_live(cmd, live, ResourceKind::Other);
                        live
                    }
                };
                self.drv().begin_command_buffer(live)?;
                // local event ids are 1-based, rebased onto the root
                // sequence when the buffer's submit is walked
                self.replay.baked.insert(
                    cmd,
                    BakedCmdBufferInfo {
                        cur_event_id: 1,
                        draw_count: 1,
                        ..BakedCmdBufferInfo::default()
                    },
                );
            }
            CaptureState::Executing => {
                let contains_target = self
                    .replay
                    .baked
                    .get(&cmd)
                    .map(|b| {
                        b.base_event < self.replay.last_event
                            && self.replay.last_event <= b.base_event + b.event_count
                    })
                    .unwrap_or(false);

                if self.replay.partial.single_draw_cmd.is_some() {
                    // single-event replay never re-enters command buffers
                } else if self.replay.partial.parent.is_null() && contains_target {
                    // walked from before the buffer: re-record its prefix
                    let result = self.drv().create_command_buffer()?;
                    self.drv().begin_command_buffer(result)?;
                    self.replay.partial.parent = cmd;
                    self.replay.partial.base_event = self
                        .replay
                        .baked
                        .get(&cmd)
                        .map(|b| b.base_event)
                        .unwrap_or(0);
                    self.replay.partial.result_cmd = Some(result);
                    if let Some(baked) = self.replay.baked.get_mut(&cmd) {
                        baked.cur_event_id = 1;
                    }
                } else if self.replay.partial.parent.is_null() {
                    if let Some(live) = self.res().live_handle(cmd) {
                        self.drv().reset_command_buffer(live)?;
                        self.drv().begin_command_buffer(live)?;
                    }
                    if let Some(baked) = self.replay.baked.get_mut(&cmd) {
                        baked.cur_event_id = 1;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn replay_end_cmd_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.rdr().read_id("commandBuffer")?;
        self.replay.last_cmd_buffer = cmd;

        match self.state() {
            CaptureState::Reading => {
                if let Some(live) = self.res().live_handle(cmd) {
                    self.drv().end_command_buffer(live)?;
                }
                if let Some(baked) = self.replay.baked.get_mut(&cmd) {
                    // the counter sits one past the last recorded event
                    baked.event_count = baked.cur_event_id.saturating_sub(1);
                    let tree = baked.tree.bake();
                    baked.baked = Some(tree);
                }
            }
            CaptureState::Executing => {
                if self.replay.partial.parent != cmd && self.replay.partial.parent.is_null() {
                    if let Some(live) = self.res().live_handle(cmd) {
                        self.drv().end_command_buffer(live)?;
                    }
                }
                // a partial parent's result buffer is ended at submit
            }
            _ => {}
        }
        Ok(())
    }

    fn replay_reset_cmd_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.rdr().read_id("commandBuffer")?;
        self.replay.last_cmd_buffer = cmd;
        if self.state() == CaptureState::Reading {
            if let Some(live) = self.res().live_handle(cmd) {
                self.drv().reset_command_buffer(live)?;
            }
        }
        Ok(())
    }

    fn replay_queue_submit(&mut self) -> ReplayResult<()> {
        let ids = self.rdr().read_id_array("commandBuffers")?;
        let desc = self.rdr().debug_str(ChunkKind::QueueSubmit);

        match self.state() {
            CaptureState::Reading => {
                let lives: Vec<DriverHandle> =
                    ids.iter().filter_map(|&id| self.live_replay(id)).collect();
                if !lives.is_empty() {
                    self.drv().queue_submit(&lives)?;
                }

                // the submit's own event
                self.add_event(ChunkKind::QueueSubmit as u32, desc);
                self.replay.added_drawcall = true;

                // splice each command buffer's events and subtree in-line,
                // rebasing local ids onto the root sequence
                for &cmd in &ids {
                    let Some(baked) = self.replay.baked.get_mut(&cmd) else {
                        warn!(cmd = %cmd, "submit references unknown command buffer");
                        continue;
                    };
                    baked.base_event = self.replay.root_event_id;
                    let base_event = baked.base_event;
                    let draw_base = self.replay.root_drawcall_id;
                    let event_count = baked.event_count;
                    let draw_count = baked.draw_count;

                    let rebased: Vec<ApiEvent> = baked
                        .events
                        .iter()
                        .cloned()
                        .map(|mut ev| {
                            ev.event_id += base_event;
                            ev
                        })
                        .collect();

                    let mut wrapper = DrawcallTreeNode::new(Drawcall {
                        event_id: self.replay.root_event_id,
                        drawcall_id: draw_base,
                        name: format!("CommandBuffer({cmd})"),
                        flags: DrawFlags::CMD_BUFFER | DrawFlags::PUSH_MARKER,
                        ..Drawcall::default()
                    });
                    if let Some(tree) = baked.baked.clone() {
                        wrapper.children = tree.children;
                        for child in &mut wrapper.children {
                            child.rebase(base_event, draw_base);
                        }
                    }

                    self.replay.events.extend(rebased);
                    self.replay.tree.add(wrapper);
                    self.replay.root_event_id += event_count;
                    // the wrapper consumes the base id, the children sit
                    // above it; the local counter is one past the last draw
                    self.replay.root_drawcall_id += draw_count;
                }
            }
            CaptureState::Executing => {
                let last_event = self.replay.last_event;
                for &cmd in &ids {
                    let range = self
                        .replay
                        .baked
                        .get(&cmd)
                        .map(|b| (b.base_event, b.base_event + b.event_count));

                    if self.replay.partial.parent == cmd {
                        if let Some(result) = self.replay.partial.result_cmd {
                            self.drv().end_command_buffer(result)?;
                            self.drv().queue_submit(&[result])?;
                        }
                    } else if self.replay.partial.parent.is_null() {
                        if let Some(live) = self.live_replay(cmd) {
                            self.drv().queue_submit(&[live])?;
                        }
                    } else if let Some((_, end)) = range {
                        // other buffers in a partial replay: submit the ones
                        // entirely inside the window as recorded
                        if end <= last_event {
                            if let Some(live) = self.live_replay(cmd) {
                                self.drv().queue_submit(&[live])?;
                            }
                        }
                    }

                    if let Some(baked) = self.replay.baked.get(&cmd) {
                        self.replay.root_event_id += baked.event_count;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ---- recorded command handlers -------------------------------------

    /// Read the command-buffer id that leads every recorded command and set
    /// it as the current buffer for event accounting.
    fn read_cmd_id(&mut self) -> ReplayResult<ResourceId> {
        let cmd = self.rdr().read_id("commandBuffer")?;
        self.replay.last_cmd_buffer = cmd;
        Ok(cmd)
    }

    fn replay_begin_render_pass(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let render_pass = r.read_id("renderPass")?;
        let framebuffer = r.read_id("framebuffer")?;
        let render_area = wire::read_render_area(r)?;
        let clear_values = wire::read_clear_values(r)?;

        // State only advances when the command is actually re-issued: a
        // replay window that stops inside this pass must still see it as
        // the pass active at the boundary.
        let Some(target) = self.rerecord_target(cmd) else {
            return Ok(());
        };
        let state = &mut self.replay.partial.state;
        state.render_pass = render_pass;
        state.framebuffer = framebuffer;
        state.render_area = render_area;
        self.replay.partial.render_pass_active = true;

        let (Some(rp), Some(fb)) = (
            self.live_replay(render_pass),
            self.live_replay(framebuffer),
        ) else {
            return Ok(());
        };
        self.drv()
            .cmd_begin_render_pass(target, rp, fb, render_area, &clear_values)?;
        Ok(())
    }

    fn replay_end_render_pass(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.render_pass_active = false;
            self.drv().cmd_end_render_pass(target)?;
        }
        Ok(())
    }

    fn replay_bind_pipeline(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let bind_point_raw = r.read_u32("bindPoint")?;
        let pipeline = r.read_id("pipeline")?;
        let bind_point = PipelineBindPoint::from_u32(bind_point_raw)
            .ok_or(ReplayError::MalformedLog("unknown bind point"))?;

        if let Some(target) = self.rerecord_target(cmd) {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    self.replay.partial.state.graphics.pipeline = pipeline
                }
                PipelineBindPoint::Compute => {
                    self.replay.partial.state.compute.pipeline = pipeline
                }
            }
            if let Some(live) = self.live_replay(pipeline) {
                self.drv().cmd_bind_pipeline(target, bind_point, live)?;
            }
        }
        Ok(())
    }

    fn replay_bind_descriptor_set(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let bind_point_raw = r.read_u32("bindPoint")?;
        let layout = r.read_id("pipelineLayout")?;
        let set_index = r.read_u32("setIndex")?;
        let set = r.read_id("descriptorSet")?;
        let offsets = r.read_u32_array("dynamicOffsets")?;
        let bind_point = PipelineBindPoint::from_u32(bind_point_raw)
            .ok_or(ReplayError::MalformedLog("unknown bind point"))?;

        if let Some(target) = self.rerecord_target(cmd) {
            let binding = match bind_point {
                PipelineBindPoint::Graphics => &mut self.replay.partial.state.graphics,
                PipelineBindPoint::Compute => &mut self.replay.partial.state.compute,
            };
            binding.bind_set(set_index as usize, set, offsets.clone());

            let (Some(layout_live), Some(set_live)) =
                (self.live_replay(layout), self.live_replay(set))
            else {
                return Ok(());
            };
            self.drv().cmd_bind_descriptor_set(
                target,
                bind_point,
                layout_live,
                set_index,
                set_live,
                &offsets,
            )?;
        }
        Ok(())
    }

    fn replay_bind_vertex_buffers(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let first_binding = r.read_u32("firstBinding")?;
        let buffers = r.read_id_array("buffers")?;
        let offsets = r.read_u64_array("offsets")?;

        if let Some(target) = self.rerecord_target(cmd) {
            let state = &mut self.replay.partial.state;
            for (i, (&buf, &off)) in buffers.iter().zip(offsets.iter()).enumerate() {
                let slot = first_binding as usize + i;
                if state.vertex_buffers.len() <= slot {
                    state
                        .vertex_buffers
                        .resize(slot + 1, (ResourceId::NULL, 0));
                }
                state.vertex_buffers[slot] = (buf, off);
            }

            let mut lives = Vec::with_capacity(buffers.len());
            for &buf in &buffers {
                match self.live_replay(buf) {
                    Some(live) => lives.push(live),
                    None => return Ok(()),
                }
            }
            self.drv()
                .cmd_bind_vertex_buffers(target, first_binding, &lives, &offsets)?;
        }
        Ok(())
    }

    fn replay_bind_index_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let buffer = r.read_id("buffer")?;
        let offset = r.read_u64("offset")?;
        let index_type_raw = r.read_u32("indexType")?;
        let index_type = IndexType::from_u32(index_type_raw)
            .ok_or(ReplayError::MalformedLog("unknown index type"))?;

        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.index_buffer = (buffer, offset, index_type.byte_width());
            if let Some(live) = self.live_replay(buffer) {
                self.drv()
                    .cmd_bind_index_buffer(target, live, offset, index_type)?;
            }
        }
        Ok(())
    }

    fn replay_set_viewports(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let viewports = wire::read_viewports(self.rdr())?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.viewports = viewports.clone();
            self.drv().cmd_set_viewports(target, &viewports)?;
        }
        Ok(())
    }

    fn replay_set_scissors(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let scissors = wire::read_scissors(self.rdr())?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.scissors = scissors.clone();
            self.drv().cmd_set_scissors(target, &scissors)?;
        }
        Ok(())
    }

    fn replay_set_line_width(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let width = self.rdr().read_f32("lineWidth")?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.line_width = width;
            self.drv().cmd_set_line_width(target, width)?;
        }
        Ok(())
    }

    fn replay_set_depth_bias(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let bias = DepthBias {
            constant: r.read_f32("constant")?,
            clamp: r.read_f32("clamp")?,
            slope: r.read_f32("slope")?,
        };
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.depth_bias = bias;
            self.drv().cmd_set_depth_bias(target, bias)?;
        }
        Ok(())
    }

    fn replay_set_blend_constants(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let values = self.rdr().read_f32_array("blendConstants")?;
        if values.len() != 4 {
            return Err(ReplayError::MalformedLog("blend constants need 4 values"));
        }
        let constants = [values[0], values[1], values[2], values[3]];
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.blend_constants = constants;
            self.drv().cmd_set_blend_constants(target, constants)?;
        }
        Ok(())
    }

    fn replay_set_depth_bounds(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let min = r.read_f32("minBound")?;
        let max = r.read_f32("maxBound")?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.replay.partial.state.min_depth_bound = min;
            self.replay.partial.state.max_depth_bound = max;
            self.drv().cmd_set_depth_bounds(target, min, max)?;
        }
        Ok(())
    }

    fn replay_set_stencil(&mut self, kind: ChunkKind) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let face_raw = r.read_u32("face")?;
        let value = match kind {
            ChunkKind::SetStencilCompareMask => r.read_u32("compareMask")?,
            ChunkKind::SetStencilWriteMask => r.read_u32("writeMask")?,
            _ => r.read_u32("reference")?,
        };
        let face = StencilFaceSelect::from_u32(face_raw)
            .ok_or(ReplayError::MalformedLog("unknown stencil face"))?;

        if let Some(target) = self.rerecord_target(cmd) {
            {
                let state = &mut self.replay.partial.state;
                let mut apply = |stencil: &mut StencilFace| match kind {
                    ChunkKind::SetStencilCompareMask => stencil.compare_mask = value,
                    ChunkKind::SetStencilWriteMask => stencil.write_mask = value,
                    _ => stencil.reference = value,
                };
                if face.includes_front() {
                    apply(&mut state.front);
                }
                if face.includes_back() {
                    apply(&mut state.back);
                }
            }
            match kind {
                ChunkKind::SetStencilCompareMask => {
                    self.drv().cmd_set_stencil_compare_mask(target, face, value)?
                }
                ChunkKind::SetStencilWriteMask => {
                    self.drv().cmd_set_stencil_write_mask(target, face, value)?
                }
                _ => self.drv().cmd_set_stencil_reference(target, face, value)?,
            }
        }
        Ok(())
    }

    fn replay_copy_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let src = r.read_id("src")?;
        let dst = r.read_id("dst")?;
        let src_offset = r.read_u64("srcOffset")?;
        let dst_offset = r.read_u64("dstOffset")?;
        let size = r.read_u64("size")?;
        if let Some(target) = self.rerecord_target(cmd) {
            let (Some(src_live), Some(dst_live)) = (self.live_replay(src), self.live_replay(dst))
            else {
                return Ok(());
            };
            self.drv()
                .cmd_copy_buffer(target, src_live, dst_live, src_offset, dst_offset, size)?;
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::CopyBuffer);
            self.add_event(ChunkKind::CopyBuffer as u32, desc.clone());
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags: DrawFlags::COPY,
                    copy_destination: dst,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_copy_image(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let src = r.read_id("src")?;
        let dst = r.read_id("dst")?;
        if let Some(target) = self.rerecord_target(cmd) {
            let (Some(src_live), Some(dst_live)) = (self.live_replay(src), self.live_replay(dst))
            else {
                return Ok(());
            };
            self.drv().cmd_copy_image(target, src_live, dst_live)?;
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::CopyImage);
            self.add_event(ChunkKind::CopyImage as u32, desc.clone());
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags: DrawFlags::COPY,
                    copy_destination: dst,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_update_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let dst = r.read_id("dst")?;
        let offset = r.read_u64("offset")?;
        let data = r.read_bytes("data")?;
        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(dst_live) = self.live_replay(dst) {
                self.drv().cmd_update_buffer(target, dst_live, offset, &data)?;
            }
        }
        Ok(())
    }

    fn replay_fill_buffer(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let dst = r.read_id("dst")?;
        let offset = r.read_u64("offset")?;
        let size = r.read_u64("size")?;
        let value = r.read_u32("value")?;
        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(dst_live) = self.live_replay(dst) {
                self.drv().cmd_fill_buffer(target, dst_live, offset, size, value)?;
            }
        }
        Ok(())
    }

    fn replay_push_constants(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let layout = r.read_id("pipelineLayout")?;
        let offset = r.read_u32("offset")?;
        let data = r.read_bytes("data")?;
        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(layout_live) = self.live_replay(layout) {
                self.drv()
                    .cmd_push_constants(target, layout_live, offset, &data)?;
            }
        }
        Ok(())
    }

    fn replay_clear_color(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let image = r.read_id("image")?;
        let layout_raw = r.read_u32("layout")?;
        let color_values = r.read_f32_array("color")?;
        let range = wire::read_subresource_range(r)?;
        let layout = ImageLayout::from_u32(layout_raw)
            .ok_or(ReplayError::MalformedLog("unknown image layout"))?;
        if color_values.len() != 4 {
            return Err(ReplayError::MalformedLog("clear color needs 4 values"));
        }
        let color = [
            color_values[0],
            color_values[1],
            color_values[2],
            color_values[3],
        ];

        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(live) = self.live_replay(image) {
                self.drv()
                    .cmd_clear_color_image(target, live, layout, color, range)?;
            }
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::ClearColorImage);
            self.add_event(ChunkKind::ClearColorImage as u32, desc.clone());
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags: DrawFlags::CLEAR,
                    copy_destination: image,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_clear_depth_stencil(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let image = r.read_id("image")?;
        let layout_raw = r.read_u32("layout")?;
        let depth = r.read_f32("depth")?;
        let stencil = r.read_u32("stencil")?;
        let range = wire::read_subresource_range(r)?;
        let layout = ImageLayout::from_u32(layout_raw)
            .ok_or(ReplayError::MalformedLog("unknown image layout"))?;

        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(live) = self.live_replay(image) {
                self.drv()
                    .cmd_clear_depth_stencil_image(target, live, layout, depth, stencil, range)?;
            }
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::ClearDepthStencilImage);
            self.add_event(ChunkKind::ClearDepthStencilImage as u32, desc.clone());
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags: DrawFlags::CLEAR,
                    copy_destination: image,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_pipeline_barrier(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let count = self.rdr().read_u32("barrierCount")?;
        let mut barriers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let image = self.rdr().read_id("image")?;
            let old_raw = self.rdr().read_u32("oldLayout")?;
            let new_raw = self.rdr().read_u32("newLayout")?;
            let range = wire::read_subresource_range(self.rdr())?;
            let old_layout = ImageLayout::from_u32(old_raw)
                .ok_or(ReplayError::MalformedLog("unknown image layout"))?;
            let new_layout = ImageLayout::from_u32(new_raw)
                .ok_or(ReplayError::MalformedLog("unknown image layout"))?;

            // keep the replay-side layout map current
            {
                let mut layouts = lock(&self.image_layouts);
                let entry = layouts.entry(image).or_default();
                if let Some(slot) = entry.iter_mut().find(|(r, _)| *r == range) {
                    slot.1 = new_layout;
                } else {
                    entry.push((range, new_layout));
                }
            }

            if let Some(live) = self.live_replay(image) {
                barriers.push(ImageBarrier {
                    image: live,
                    old_layout,
                    new_layout,
                    range,
                });
            }
        }
        if let Some(target) = self.rerecord_target(cmd) {
            self.drv().cmd_pipeline_barrier(target, &barriers)?;
        }
        Ok(())
    }

    fn replay_draw(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let vertex_count = r.read_u32("vertexCount")?;
        let instance_count = r.read_u32("instanceCount")?;
        let first_vertex = r.read_u32("firstVertex")?;
        let first_instance = r.read_u32("firstInstance")?;

        if let Some(target) = self.rerecord_target(cmd) {
            self.drv()
                .cmd_draw(target, vertex_count, instance_count, first_vertex, first_instance)?;
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::Draw);
            self.add_event(ChunkKind::Draw as u32, desc.clone());
            let mut flags = DrawFlags::DRAWCALL;
            if instance_count > 1 {
                flags |= DrawFlags::INSTANCED;
            }
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_draw_indexed(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let index_count = r.read_u32("indexCount")?;
        let instance_count = r.read_u32("instanceCount")?;
        let first_index = r.read_u32("firstIndex")?;
        let vertex_offset = r.read_i32("vertexOffset")?;
        let first_instance = r.read_u32("firstInstance")?;

        if let Some(target) = self.rerecord_target(cmd) {
            self.drv().cmd_draw_indexed(
                target,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )?;
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::DrawIndexed);
            self.add_event(ChunkKind::DrawIndexed as u32, desc.clone());
            let mut flags = DrawFlags::DRAWCALL | DrawFlags::INDEXED;
            if instance_count > 1 {
                flags |= DrawFlags::INSTANCED;
            }
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_draw_indirect(&mut self, indexed: bool) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let buffer = r.read_id("buffer")?;
        let offset = r.read_u64("offset")?;
        let draw_count = r.read_u32("drawCount")?;
        let stride = r.read_u32("stride")?;

        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(live) = self.live_replay(buffer) {
                if indexed {
                    self.drv()
                        .cmd_draw_indexed_indirect(target, live, offset, draw_count, stride)?;
                } else {
                    self.drv()
                        .cmd_draw_indirect(target, live, offset, draw_count, stride)?;
                }
            }
        }
        if self.state() == CaptureState::Reading {
            let kind = if indexed {
                ChunkKind::DrawIndexedIndirect
            } else {
                ChunkKind::DrawIndirect
            };
            let desc = self.rdr().debug_str(kind);
            self.add_event(kind as u32, desc.clone());
            let mut flags = DrawFlags::DRAWCALL | DrawFlags::INDIRECT;
            if indexed {
                flags |= DrawFlags::INDEXED;
            }
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_dispatch(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let x = r.read_u32("x")?;
        let y = r.read_u32("y")?;
        let z = r.read_u32("z")?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.drv().cmd_dispatch(target, x, y, z)?;
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::Dispatch);
            self.add_event(ChunkKind::Dispatch as u32, desc.clone());
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags: DrawFlags::DISPATCH,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_dispatch_indirect(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let r = self.rdr();
        let buffer = r.read_id("buffer")?;
        let offset = r.read_u64("offset")?;
        if let Some(target) = self.rerecord_target(cmd) {
            if let Some(live) = self.live_replay(buffer) {
                self.drv().cmd_dispatch_indirect(target, live, offset)?;
            }
        }
        if self.state() == CaptureState::Reading {
            let desc = self.rdr().debug_str(ChunkKind::DispatchIndirect);
            self.add_event(ChunkKind::DispatchIndirect as u32, desc.clone());
            self.add_drawcall(
                Drawcall {
                    name: desc,
                    flags: DrawFlags::DISPATCH | DrawFlags::INDIRECT,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_marker(&mut self, kind: ChunkKind) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        let label = self.rdr().read_str("label")?;
        if let Some(target) = self.rerecord_target(cmd) {
            match kind {
                ChunkKind::MarkerBegin => self.drv().cmd_marker_begin(target, &label)?,
                _ => self.drv().cmd_marker(target, &label)?,
            }
        }
        if self.state() == CaptureState::Reading {
            self.add_event(kind as u32, format!("{}(\"{label}\")", kind.name()));
            let flags = if kind == ChunkKind::MarkerBegin {
                DrawFlags::PUSH_MARKER
            } else {
                DrawFlags::SET_MARKER
            };
            self.add_drawcall(
                Drawcall {
                    name: label,
                    flags,
                    ..Drawcall::default()
                },
                true,
            );
        }
        Ok(())
    }

    fn replay_marker_end(&mut self) -> ReplayResult<()> {
        let cmd = self.read_cmd_id()?;
        if let Some(target) = self.rerecord_target(cmd) {
            self.drv().cmd_marker_end(target)?;
        }
        if self.state() == CaptureState::Reading {
            self.add_event(ChunkKind::MarkerEnd as u32, "MarkerEnd()".to_owned());
            if cmd.is_null() {
                self.replay.tree.pop_marker();
            } else if let Some(baked) = self.replay.baked.get_mut(&cmd) {
                baked.tree.pop_marker();
            }
        }
        Ok(())
    }
}
