//! Capture-side entry points.
//!
//! These are what the per-call wrapper shims dispatch into: each one calls
//! the real driver, serializes the call into a chunk, and routes the chunk
//! to the right record (the resource's own record for creations, the
//! command buffer's record for recorded commands, the frame record for
//! queue-level calls inside a capture frame).
//!
//! Driver failures on command recording and submission are logged but never
//! abort capture; the chunk is still written so replay sees the same
//! sequence the application issued.

use crate::record::{MemMapState, SwapchainInfo};
use crate::resource::{find_diff_range, FrameRefKind, ResourceKind};
use crate::wire;
use crate::{lock, CaptureError, CaptureResult, CaptureState, WrappedDevice};
use refract_driver::{
    BufferDesc, DescriptorSetLayoutDesc, Driver, DriverHandle, FramebufferDesc,
    GraphicsPipelineDesc, ComputePipelineDesc, ImageBarrier, ImageDesc, PipelineLayoutDesc,
    RenderPassDesc, SamplerDesc, SwapchainDesc,
};
use refract_protocol::{
    collect_callstack, ChunkKind, ClearValue, DepthBias, ImageLayout, IndexType,
    PipelineBindPoint, RenderArea, ResourceId, ResourceIdGen, StencilFaceSelect,
    SubresourceRange, Viewport,
};
use refract_trace::{Chunk, ChunkWriter};
use tracing::warn;

impl<D: Driver> WrappedDevice<D> {
    fn build_chunk(&self, kind: ChunkKind, build: impl FnOnce(&mut ChunkWriter)) -> Chunk {
        let writer = self.thread_writers.get();
        let mut w = lock(&writer);
        w.begin_chunk(kind);
        build(&mut w);
        if let Some(stack) = collect_callstack() {
            w.attach_callstack(stack);
        }
        w.end_chunk(kind).expect("top-level chunk")
    }

    pub(crate) fn live(&self, id: ResourceId) -> CaptureResult<DriverHandle> {
        lock(&self.resources)
            .live_handle(id)
            .ok_or(CaptureError::UnknownResource(id))
    }

    fn register_resource(
        &self,
        live: DriverHandle,
        kind: ResourceKind,
        parent: ResourceId,
    ) -> ResourceId {
        let id = ResourceIdGen::next();
        let mut res = lock(&self.resources);
        res.register_live(id, live, kind);
        let record = res.add_record(id);
        record.parent = parent;
        id
    }

    /// Creation chunks go to the resource's own record while idle, or
    /// in-line into the frame record during an active capture.
    fn route_creation_chunk(&self, id: ResourceId, chunk: Chunk) {
        if !self.state().is_writing() {
            return;
        }
        let mut res = lock(&self.resources);
        if self.state() == CaptureState::WritingCapframe {
            res.mark_frame_referenced(id, FrameRefKind::Write);
            if let Some(frame) = res.record_mut(self.frame_capture_record) {
                frame.add_chunk(chunk);
            }
        } else if let Some(record) = res.record_mut(id) {
            record.add_chunk(chunk);
        }
    }

    /// Command chunks always land in the command buffer's record while
    /// writing; the submit decides whether they reach a capture.
    fn append_cmd_chunk(
        &self,
        cmd: ResourceId,
        chunk: Chunk,
        refs: &[(ResourceId, FrameRefKind)],
    ) {
        if !self.state().is_writing() {
            return;
        }
        let mut res = lock(&self.resources);
        if let Some(record) = res.record_mut(cmd) {
            record.add_chunk(chunk);
            record.frame_refs.extend_from_slice(refs);
        }
    }

    fn append_frame_chunk(&self, chunk: Chunk) {
        if self.state() != CaptureState::WritingCapframe {
            return;
        }
        let mut res = lock(&self.resources);
        if let Some(frame) = res.record_mut(self.frame_capture_record) {
            frame.add_chunk(chunk);
        }
    }

    fn log_driver_error<T>(result: Result<T, refract_driver::DriverError>, call: &'static str) {
        if let Err(error) = result {
            warn!(%error, call, "driver error during capture, continuing");
        }
    }

    // ---- resource creation ---------------------------------------------

    pub fn create_buffer(&self, desc: &BufferDesc) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_buffer(desc)?;
        let id = self.register_resource(live, ResourceKind::Buffer, ResourceId::NULL);
        {
            let mut res = lock(&self.resources);
            let record = res.add_record(id);
            record.length = desc.size;
            if desc.host_coherent {
                record.mem_map = Some(MemMapState {
                    size: desc.size,
                    ..MemMapState::default()
                });
            }
        }
        let chunk = self.build_chunk(ChunkKind::CreateBuffer, |w| {
            w.write_id("buffer", id);
            w.write_u64("size", desc.size);
            w.write_u32("usage", desc.usage.bits());
            w.write_bool("hostCoherent", desc.host_coherent);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_image(&self, desc: &ImageDesc) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_image(desc)?;
        let id = self.register_resource(live, ResourceKind::Image, ResourceId::NULL);
        lock(&self.image_layouts)
            .insert(id, vec![(SubresourceRange::ALL, ImageLayout::Undefined)]);
        let chunk = self.build_chunk(ChunkKind::CreateImage, |w| {
            w.write_id("image", id);
            w.write_u32("format", desc.format as u32);
            w.write_u32("width", desc.width);
            w.write_u32("height", desc.height);
            w.write_u32("mipLevels", desc.mip_levels);
            w.write_u32("arrayLayers", desc.array_layers);
            w.write_u32("usage", desc.usage.bits());
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_sampler(desc)?;
        let id = self.register_resource(live, ResourceKind::Other, ResourceId::NULL);
        let chunk = self.build_chunk(ChunkKind::CreateSampler, |w| {
            w.write_id("sampler", id);
            w.write_bool("linearFilter", desc.linear_filter);
            w.write_bool("addressClamp", desc.address_clamp);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_shader_module(&self, code: &[u8]) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_shader_module(code)?;
        let id = self.register_resource(live, ResourceKind::Other, ResourceId::NULL);
        let chunk = self.build_chunk(ChunkKind::CreateShaderModule, |w| {
            w.write_id("shaderModule", id);
            w.write_bytes("code", code);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_render_pass(&self, desc: &RenderPassDesc) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_render_pass(desc)?;
        let id = self.register_resource(live, ResourceKind::Other, ResourceId::NULL);
        let chunk = self.build_chunk(ChunkKind::CreateRenderPass, |w| {
            w.write_id("renderPass", id);
            w.write_u32("attachmentCount", desc.attachments.len() as u32);
            for att in &desc.attachments {
                w.write_u32("format", att.format as u32);
                w.write_u32("loadOp", att.load_op as u32);
                w.write_u32("storeOp", att.store_op as u32);
            }
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    /// `attachments` are image ids; the framebuffer's record remembers them
    /// so a render pass using it can mark the targets written.
    pub fn create_framebuffer(
        &self,
        render_pass: ResourceId,
        attachments: &[ResourceId],
        width: u32,
        height: u32,
    ) -> CaptureResult<ResourceId> {
        let desc = FramebufferDesc {
            render_pass: self.live(render_pass)?,
            attachments: attachments
                .iter()
                .map(|&a| self.live(a))
                .collect::<CaptureResult<_>>()?,
            width,
            height,
        };
        let live = lock(&self.driver).create_framebuffer(&desc)?;
        let id = self.register_resource(live, ResourceKind::Other, render_pass);
        {
            let mut res = lock(&self.resources);
            let record = res.add_record(id);
            record.sub_resources = attachments.to_vec();
            record.frame_refs.push((render_pass, FrameRefKind::Read));
            for &att in attachments {
                record.frame_refs.push((att, FrameRefKind::Read));
            }
        }
        let chunk = self.build_chunk(ChunkKind::CreateFramebuffer, |w| {
            w.write_id("framebuffer", id);
            w.write_id("renderPass", render_pass);
            w.write_id_array("attachments", attachments);
            w.write_u32("width", width);
            w.write_u32("height", height);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetLayoutDesc,
    ) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_descriptor_set_layout(desc)?;
        let id = self.register_resource(live, ResourceKind::Other, ResourceId::NULL);
        let chunk = self.build_chunk(ChunkKind::CreateDescriptorSetLayout, |w| {
            w.write_id("setLayout", id);
            w.write_u32("bindingCount", desc.bindings.len() as u32);
            for binding in &desc.bindings {
                w.write_u32("binding", binding.binding);
                w.write_u32("descriptorKind", binding.kind as u32);
                w.write_u32("descriptorCount", binding.count);
            }
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_pipeline_layout(&self, set_layouts: &[ResourceId]) -> CaptureResult<ResourceId> {
        let desc = PipelineLayoutDesc {
            set_layouts: set_layouts
                .iter()
                .map(|&l| self.live(l))
                .collect::<CaptureResult<_>>()?,
        };
        let live = lock(&self.driver).create_pipeline_layout(&desc)?;
        let id = self.register_resource(live, ResourceKind::Other, ResourceId::NULL);
        {
            let mut res = lock(&self.resources);
            let record = res.add_record(id);
            for &layout in set_layouts {
                record.frame_refs.push((layout, FrameRefKind::Read));
            }
        }
        let chunk = self.build_chunk(ChunkKind::CreatePipelineLayout, |w| {
            w.write_id("pipelineLayout", id);
            w.write_id_array("setLayouts", set_layouts);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn alloc_descriptor_set(&self, layout: ResourceId) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).alloc_descriptor_set(self.live(layout)?)?;
        let id = self.register_resource(live, ResourceKind::Other, layout);
        let chunk = self.build_chunk(ChunkKind::AllocDescriptorSets, |w| {
            w.write_id("descriptorSet", id);
            w.write_id("setLayout", layout);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    /// Descriptor updates are ordered against the submits that consume them
    /// by the shared recording ordinal, so during a capture frame they are
    /// recorded into the frame record in-line.
    pub fn update_descriptor_set(
        &self,
        set: ResourceId,
        binding: u32,
        resource: ResourceId,
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).update_descriptor_set(self.live(set)?, binding, self.live(resource)?);
        Self::log_driver_error(result, "update_descriptor_set");
        let chunk = self.build_chunk(ChunkKind::UpdateDescriptorSet, |w| {
            w.write_id("descriptorSet", set);
            w.write_u32("binding", binding);
            w.write_id("resource", resource);
        });
        if self.state() == CaptureState::WritingCapframe {
            let mut res = lock(&self.resources);
            res.mark_frame_referenced(set, FrameRefKind::Write);
            res.mark_frame_referenced(resource, FrameRefKind::Read);
            if let Some(frame) = res.record_mut(self.frame_capture_record) {
                frame.add_chunk(chunk);
            }
        } else if self.state().is_writing() {
            let mut res = lock(&self.resources);
            if let Some(record) = res.record_mut(set) {
                record.add_chunk(chunk);
                record.frame_refs.push((resource, FrameRefKind::Read));
            }
        }
        Ok(())
    }

    pub fn create_graphics_pipeline(
        &self,
        layout: ResourceId,
        render_pass: ResourceId,
        topology: refract_protocol::Topology,
        patch_control_points: u32,
        vertex_shader: ResourceId,
        fragment_shader: ResourceId,
    ) -> CaptureResult<ResourceId> {
        let desc = GraphicsPipelineDesc {
            layout: self.live(layout)?,
            render_pass: self.live(render_pass)?,
            topology,
            patch_control_points,
            vertex_shader: self.live(vertex_shader)?,
            fragment_shader: self.live(fragment_shader)?,
        };
        let live = lock(&self.driver).create_graphics_pipeline(&desc)?;
        let id = self.register_resource(live, ResourceKind::Other, layout);
        {
            let mut res = lock(&self.resources);
            let record = res.add_record(id);
            record.frame_refs.extend_from_slice(&[
                (layout, FrameRefKind::Read),
                (render_pass, FrameRefKind::Read),
                (vertex_shader, FrameRefKind::Read),
                (fragment_shader, FrameRefKind::Read),
            ]);
        }
        let chunk = self.build_chunk(ChunkKind::CreateGraphicsPipeline, |w| {
            w.write_id("pipeline", id);
            w.write_id("pipelineLayout", layout);
            w.write_id("renderPass", render_pass);
            w.write_u32("topology", topology as u32);
            w.write_u32("patchControlPoints", patch_control_points);
            w.write_id("vertexShader", vertex_shader);
            w.write_id("fragmentShader", fragment_shader);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_compute_pipeline(
        &self,
        layout: ResourceId,
        shader: ResourceId,
    ) -> CaptureResult<ResourceId> {
        let desc = ComputePipelineDesc {
            layout: self.live(layout)?,
            shader: self.live(shader)?,
        };
        let live = lock(&self.driver).create_compute_pipeline(&desc)?;
        let id = self.register_resource(live, ResourceKind::Other, layout);
        {
            let mut res = lock(&self.resources);
            let record = res.add_record(id);
            record
                .frame_refs
                .extend_from_slice(&[(layout, FrameRefKind::Read), (shader, FrameRefKind::Read)]);
        }
        let chunk = self.build_chunk(ChunkKind::CreateComputePipeline, |w| {
            w.write_id("pipeline", id);
            w.write_id("pipelineLayout", layout);
            w.write_id("shader", shader);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn create_swapchain(&self, desc: &SwapchainDesc, window: u64) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_swapchain(desc)?;
        let id = self.register_resource(live, ResourceKind::Other, ResourceId::NULL);
        {
            let mut res = lock(&self.resources);
            res.add_record(id).swap_info = Some(SwapchainInfo {
                format: desc.format,
                width: desc.width,
                height: desc.height,
                images: Vec::new(),
                last_present: 0,
            });
        }
        lock(&self.swap_lookup).insert(window, id);
        let chunk = self.build_chunk(ChunkKind::CreateSwapchain, |w| {
            w.write_id("swapchain", id);
            w.write_u32("format", desc.format as u32);
            w.write_u32("width", desc.width);
            w.write_u32("height", desc.height);
            w.write_u32("imageCount", desc.image_count);
        });
        self.route_creation_chunk(id, chunk);
        Ok(id)
    }

    pub fn get_swapchain_images(&self, swapchain: ResourceId) -> CaptureResult<Vec<ResourceId>> {
        let lives = lock(&self.driver).get_swapchain_images(self.live(swapchain)?)?;
        let ids: Vec<ResourceId> = lives
            .iter()
            .map(|&live| self.register_resource(live, ResourceKind::Image, swapchain))
            .collect();
        {
            let mut res = lock(&self.resources);
            for &img in &ids {
                res.add_record(img);
            }
            if let Some(info) = res
                .record_mut(swapchain)
                .and_then(|r| r.swap_info.as_mut())
            {
                info.images = ids.clone();
            }
            if let Some(record) = res.record_mut(swapchain) {
                record.sub_resources = ids.clone();
            }
        }
        {
            let mut layouts = lock(&self.image_layouts);
            for &img in &ids {
                layouts.insert(img, vec![(SubresourceRange::ALL, ImageLayout::Present)]);
            }
        }
        let chunk = self.build_chunk(ChunkKind::GetSwapchainImages, |w| {
            w.write_id("swapchain", swapchain);
            w.write_id_array("images", &ids);
        });
        self.route_creation_chunk(swapchain, chunk);
        Ok(ids)
    }

    // ---- memory mapping -------------------------------------------------

    /// Map a host-coherent buffer: returns its current contents. While a
    /// capture frame is active a shadow copy is kept for diffing.
    pub fn map_buffer(&self, buffer: ResourceId) -> CaptureResult<Vec<u8>> {
        let live = self.live(buffer)?;
        let len = lock(&self.resources)
            .record(buffer)
            .map(|r| r.length)
            .unwrap_or(0);
        let data = lock(&self.driver).read_buffer(live, 0, len)?;
        let mut coherent = false;
        {
            let mut res = lock(&self.resources);
            if let Some(map) = res.record_mut(buffer).and_then(|r| r.mem_map.as_mut()) {
                map.mapped = true;
                map.ref_data = Some(data.clone());
                coherent = true;
            }
        }
        if coherent {
            let mut maps = lock(&self.coherent_maps);
            if !maps.contains(&buffer) {
                maps.push(buffer);
            }
        }
        Ok(data)
    }

    /// Unmap after the application wrote `data` through the mapping.
    pub fn unmap_buffer(&self, buffer: ResourceId, data: &[u8]) -> CaptureResult<()> {
        let live = self.live(buffer)?;
        Self::log_driver_error(lock(&self.driver).write_buffer(live, 0, data), "unmap write");
        {
            let mut res = lock(&self.resources);
            if let Some(map) = res.record_mut(buffer).and_then(|r| r.mem_map.as_mut()) {
                map.mapped = false;
            }
        }
        match self.state() {
            CaptureState::WritingCapframe => {
                let chunk = self.build_chunk(ChunkKind::UnmapMemory, |w| {
                    w.write_id("buffer", buffer);
                    w.write_u64("offset", 0);
                    w.write_bytes("data", data);
                });
                let mut res = lock(&self.resources);
                res.mark_frame_referenced(buffer, FrameRefKind::ReadBeforeWrite);
                if let Some(frame) = res.record_mut(self.frame_capture_record) {
                    frame.add_chunk(chunk);
                }
            }
            CaptureState::WritingIdle => {
                lock(&self.resources).mark_dirty(buffer);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn flush_mapped(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> CaptureResult<()> {
        let live = self.live(buffer)?;
        Self::log_driver_error(
            lock(&self.driver).write_buffer(live, offset, data),
            "flush write",
        );
        match self.state() {
            CaptureState::WritingCapframe => {
                let chunk = self.build_chunk(ChunkKind::FlushMappedMemory, |w| {
                    w.write_id("buffer", buffer);
                    w.write_u64("offset", offset);
                    w.write_bytes("data", data);
                });
                let mut res = lock(&self.resources);
                res.mark_frame_referenced(buffer, FrameRefKind::ReadBeforeWrite);
                if let Some(frame) = res.record_mut(self.frame_capture_record) {
                    frame.add_chunk(chunk);
                }
            }
            CaptureState::WritingIdle => {
                lock(&self.resources).mark_dirty(buffer);
            }
            _ => {}
        }
        Ok(())
    }

    /// Diff every live coherent mapping against its shadow and record the
    /// changed range as a flush. Runs at the capture boundary.
    pub(crate) fn emit_coherent_map_diffs(&self) {
        let buffers: Vec<ResourceId> = lock(&self.coherent_maps).clone();
        for buffer in buffers {
            let Ok(live) = self.live(buffer) else { continue };
            let len = lock(&self.resources)
                .record(buffer)
                .map(|r| r.length)
                .unwrap_or(0);
            let Ok(current) = lock(&self.driver).read_buffer(live, 0, len) else {
                continue;
            };
            let mut res = lock(&self.resources);
            let Some(map) = res.record_mut(buffer).and_then(|r| r.mem_map.as_mut()) else {
                continue;
            };
            let Some(shadow) = map.ref_data.as_deref() else { continue };
            let Some(range) = find_diff_range(&current, shadow) else {
                continue;
            };
            let slice = current[range.clone()].to_vec();
            map.ref_data = Some(current);
            drop(res);

            let chunk = self.build_chunk(ChunkKind::FlushMappedMemory, |w| {
                w.write_id("buffer", buffer);
                w.write_u64("offset", range.start as u64);
                w.write_bytes("data", &slice);
            });
            let mut res = lock(&self.resources);
            res.mark_frame_referenced(buffer, FrameRefKind::ReadBeforeWrite);
            if let Some(frame) = res.record_mut(self.frame_capture_record) {
                frame.add_chunk(chunk);
            }
        }
    }

    // ---- command buffers ------------------------------------------------

    pub fn create_command_buffer(&self) -> CaptureResult<ResourceId> {
        let live = lock(&self.driver).create_command_buffer()?;
        // No chunk: the begin chunk recreates the buffer on replay.
        Ok(self.register_resource(live, ResourceKind::Other, ResourceId::NULL))
    }

    pub fn begin_command_buffer(&self, cmd: ResourceId) -> CaptureResult<()> {
        let result = lock(&self.driver).begin_command_buffer(self.live(cmd)?);
        Self::log_driver_error(result, "begin_command_buffer");
        if self.state().is_writing() {
            let mut res = lock(&self.resources);
            if let Some(record) = res.record_mut(cmd) {
                // re-begin wipes any previous recording
                record.wipe_chunks();
                record.frame_refs.clear();
            }
        }
        let chunk = self.build_chunk(ChunkKind::BeginCmdBuffer, |w| {
            w.write_id("commandBuffer", cmd);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn end_command_buffer(&self, cmd: ResourceId) -> CaptureResult<()> {
        let result = lock(&self.driver).end_command_buffer(self.live(cmd)?);
        Self::log_driver_error(result, "end_command_buffer");
        let chunk = self.build_chunk(ChunkKind::EndCmdBuffer, |w| {
            w.write_id("commandBuffer", cmd);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn reset_command_buffer(&self, cmd: ResourceId) -> CaptureResult<()> {
        let result = lock(&self.driver).reset_command_buffer(self.live(cmd)?);
        Self::log_driver_error(result, "reset_command_buffer");
        if self.state().is_writing() {
            let mut res = lock(&self.resources);
            if let Some(record) = res.record_mut(cmd) {
                record.wipe_chunks();
                record.frame_refs.clear();
            }
        }
        Ok(())
    }

    pub fn cmd_begin_render_pass(
        &self,
        cmd: ResourceId,
        render_pass: ResourceId,
        framebuffer: ResourceId,
        render_area: RenderArea,
        clear_values: &[ClearValue],
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_begin_render_pass(
            self.live(cmd)?,
            self.live(render_pass)?,
            self.live(framebuffer)?,
            render_area,
            clear_values,
        );
        Self::log_driver_error(result, "cmd_begin_render_pass");
        let chunk = self.build_chunk(ChunkKind::BeginRenderPass, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("renderPass", render_pass);
            w.write_id("framebuffer", framebuffer);
            wire::write_render_area(w, render_area);
            wire::write_clear_values(w, clear_values);
        });
        let mut refs = vec![
            (render_pass, FrameRefKind::Read),
            (framebuffer, FrameRefKind::Read),
        ];
        for target in lock(&self.resources)
            .record(framebuffer)
            .map(|r| r.sub_resources.clone())
            .unwrap_or_default()
        {
            refs.push((target, FrameRefKind::PartialWrite));
        }
        self.append_cmd_chunk(cmd, chunk, &refs);
        Ok(())
    }

    pub fn cmd_end_render_pass(&self, cmd: ResourceId) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_end_render_pass(self.live(cmd)?);
        Self::log_driver_error(result, "cmd_end_render_pass");
        let chunk = self.build_chunk(ChunkKind::EndRenderPass, |w| {
            w.write_id("commandBuffer", cmd);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_bind_pipeline(
        &self,
        cmd: ResourceId,
        bind_point: PipelineBindPoint,
        pipeline: ResourceId,
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_bind_pipeline(self.live(cmd)?, bind_point, self.live(pipeline)?);
        Self::log_driver_error(result, "cmd_bind_pipeline");
        let chunk = self.build_chunk(ChunkKind::BindPipeline, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("bindPoint", bind_point as u32);
            w.write_id("pipeline", pipeline);
        });
        self.append_cmd_chunk(cmd, chunk, &[(pipeline, FrameRefKind::Read)]);
        Ok(())
    }

    pub fn cmd_bind_descriptor_set(
        &self,
        cmd: ResourceId,
        bind_point: PipelineBindPoint,
        layout: ResourceId,
        set_index: u32,
        set: ResourceId,
        dynamic_offsets: &[u32],
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_bind_descriptor_set(
            self.live(cmd)?,
            bind_point,
            self.live(layout)?,
            set_index,
            self.live(set)?,
            dynamic_offsets,
        );
        Self::log_driver_error(result, "cmd_bind_descriptor_set");
        let chunk = self.build_chunk(ChunkKind::BindDescriptorSets, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("bindPoint", bind_point as u32);
            w.write_id("pipelineLayout", layout);
            w.write_u32("setIndex", set_index);
            w.write_id("descriptorSet", set);
            w.write_u32_array("dynamicOffsets", dynamic_offsets);
        });
        self.append_cmd_chunk(
            cmd,
            chunk,
            &[(layout, FrameRefKind::Read), (set, FrameRefKind::Read)],
        );
        Ok(())
    }

    pub fn cmd_bind_vertex_buffers(
        &self,
        cmd: ResourceId,
        first_binding: u32,
        buffers: &[ResourceId],
        offsets: &[u64],
    ) -> CaptureResult<()> {
        let lives: Vec<DriverHandle> = buffers
            .iter()
            .map(|&b| self.live(b))
            .collect::<CaptureResult<_>>()?;
        let result = lock(&self.driver).cmd_bind_vertex_buffers(
            self.live(cmd)?,
            first_binding,
            &lives,
            offsets,
        );
        Self::log_driver_error(result, "cmd_bind_vertex_buffers");
        let chunk = self.build_chunk(ChunkKind::BindVertexBuffers, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("firstBinding", first_binding);
            w.write_id_array("buffers", buffers);
            w.write_u64_array("offsets", offsets);
        });
        let refs: Vec<(ResourceId, FrameRefKind)> = buffers
            .iter()
            .map(|&b| (b, FrameRefKind::Read))
            .collect();
        self.append_cmd_chunk(cmd, chunk, &refs);
        Ok(())
    }

    pub fn cmd_bind_index_buffer(
        &self,
        cmd: ResourceId,
        buffer: ResourceId,
        offset: u64,
        index_type: IndexType,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_bind_index_buffer(
            self.live(cmd)?,
            self.live(buffer)?,
            offset,
            index_type,
        );
        Self::log_driver_error(result, "cmd_bind_index_buffer");
        let chunk = self.build_chunk(ChunkKind::BindIndexBuffer, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("buffer", buffer);
            w.write_u64("offset", offset);
            w.write_u32("indexType", index_type as u32);
        });
        self.append_cmd_chunk(cmd, chunk, &[(buffer, FrameRefKind::Read)]);
        Ok(())
    }

    pub fn cmd_set_viewports(&self, cmd: ResourceId, viewports: &[Viewport]) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_viewports(self.live(cmd)?, viewports);
        Self::log_driver_error(result, "cmd_set_viewports");
        let chunk = self.build_chunk(ChunkKind::SetViewport, |w| {
            w.write_id("commandBuffer", cmd);
            wire::write_viewports(w, viewports);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_scissors(&self, cmd: ResourceId, scissors: &[RenderArea]) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_scissors(self.live(cmd)?, scissors);
        Self::log_driver_error(result, "cmd_set_scissors");
        let chunk = self.build_chunk(ChunkKind::SetScissor, |w| {
            w.write_id("commandBuffer", cmd);
            wire::write_scissors(w, scissors);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_line_width(&self, cmd: ResourceId, width: f32) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_line_width(self.live(cmd)?, width);
        Self::log_driver_error(result, "cmd_set_line_width");
        let chunk = self.build_chunk(ChunkKind::SetLineWidth, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_f32("lineWidth", width);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_depth_bias(&self, cmd: ResourceId, bias: DepthBias) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_depth_bias(self.live(cmd)?, bias);
        Self::log_driver_error(result, "cmd_set_depth_bias");
        let chunk = self.build_chunk(ChunkKind::SetDepthBias, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_f32("constant", bias.constant);
            w.write_f32("clamp", bias.clamp);
            w.write_f32("slope", bias.slope);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_blend_constants(
        &self,
        cmd: ResourceId,
        constants: [f32; 4],
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_blend_constants(self.live(cmd)?, constants);
        Self::log_driver_error(result, "cmd_set_blend_constants");
        let chunk = self.build_chunk(ChunkKind::SetBlendConstants, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_f32_array("blendConstants", &constants);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_depth_bounds(&self, cmd: ResourceId, min: f32, max: f32) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_depth_bounds(self.live(cmd)?, min, max);
        Self::log_driver_error(result, "cmd_set_depth_bounds");
        let chunk = self.build_chunk(ChunkKind::SetDepthBounds, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_f32("minBound", min);
            w.write_f32("maxBound", max);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_stencil_compare_mask(
        &self,
        cmd: ResourceId,
        face: StencilFaceSelect,
        mask: u32,
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_set_stencil_compare_mask(self.live(cmd)?, face, mask);
        Self::log_driver_error(result, "cmd_set_stencil_compare_mask");
        let chunk = self.build_chunk(ChunkKind::SetStencilCompareMask, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("face", face as u32);
            w.write_u32("compareMask", mask);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_stencil_write_mask(
        &self,
        cmd: ResourceId,
        face: StencilFaceSelect,
        mask: u32,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_set_stencil_write_mask(self.live(cmd)?, face, mask);
        Self::log_driver_error(result, "cmd_set_stencil_write_mask");
        let chunk = self.build_chunk(ChunkKind::SetStencilWriteMask, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("face", face as u32);
            w.write_u32("writeMask", mask);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_set_stencil_reference(
        &self,
        cmd: ResourceId,
        face: StencilFaceSelect,
        reference: u32,
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_set_stencil_reference(self.live(cmd)?, face, reference);
        Self::log_driver_error(result, "cmd_set_stencil_reference");
        let chunk = self.build_chunk(ChunkKind::SetStencilReference, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("face", face as u32);
            w.write_u32("reference", reference);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_copy_buffer(
        &self,
        cmd: ResourceId,
        src: ResourceId,
        dst: ResourceId,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_copy_buffer(
            self.live(cmd)?,
            self.live(src)?,
            self.live(dst)?,
            src_offset,
            dst_offset,
            size,
        );
        Self::log_driver_error(result, "cmd_copy_buffer");
        let chunk = self.build_chunk(ChunkKind::CopyBuffer, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("src", src);
            w.write_id("dst", dst);
            w.write_u64("srcOffset", src_offset);
            w.write_u64("dstOffset", dst_offset);
            w.write_u64("size", size);
        });
        self.append_cmd_chunk(
            cmd,
            chunk,
            &[
                (src, FrameRefKind::Read),
                (dst, FrameRefKind::PartialWrite),
            ],
        );
        Ok(())
    }

    pub fn cmd_copy_image(
        &self,
        cmd: ResourceId,
        src: ResourceId,
        dst: ResourceId,
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_copy_image(self.live(cmd)?, self.live(src)?, self.live(dst)?);
        Self::log_driver_error(result, "cmd_copy_image");
        let chunk = self.build_chunk(ChunkKind::CopyImage, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("src", src);
            w.write_id("dst", dst);
        });
        self.append_cmd_chunk(
            cmd,
            chunk,
            &[
                (src, FrameRefKind::Read),
                (dst, FrameRefKind::PartialWrite),
            ],
        );
        Ok(())
    }

    pub fn cmd_update_buffer(
        &self,
        cmd: ResourceId,
        dst: ResourceId,
        offset: u64,
        data: &[u8],
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_update_buffer(self.live(cmd)?, self.live(dst)?, offset, data);
        Self::log_driver_error(result, "cmd_update_buffer");
        let chunk = self.build_chunk(ChunkKind::UpdateBuffer, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("dst", dst);
            w.write_u64("offset", offset);
            w.write_bytes("data", data);
        });
        self.append_cmd_chunk(cmd, chunk, &[(dst, FrameRefKind::PartialWrite)]);
        Ok(())
    }

    pub fn cmd_fill_buffer(
        &self,
        cmd: ResourceId,
        dst: ResourceId,
        offset: u64,
        size: u64,
        value: u32,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_fill_buffer(
            self.live(cmd)?,
            self.live(dst)?,
            offset,
            size,
            value,
        );
        Self::log_driver_error(result, "cmd_fill_buffer");
        let chunk = self.build_chunk(ChunkKind::FillBuffer, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("dst", dst);
            w.write_u64("offset", offset);
            w.write_u64("size", size);
            w.write_u32("value", value);
        });
        self.append_cmd_chunk(cmd, chunk, &[(dst, FrameRefKind::PartialWrite)]);
        Ok(())
    }

    pub fn cmd_push_constants(
        &self,
        cmd: ResourceId,
        layout: ResourceId,
        offset: u32,
        data: &[u8],
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_push_constants(self.live(cmd)?, self.live(layout)?, offset, data);
        Self::log_driver_error(result, "cmd_push_constants");
        let chunk = self.build_chunk(ChunkKind::PushConstants, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("pipelineLayout", layout);
            w.write_u32("offset", offset);
            w.write_bytes("data", data);
        });
        self.append_cmd_chunk(cmd, chunk, &[(layout, FrameRefKind::Read)]);
        Ok(())
    }

    pub fn cmd_clear_color_image(
        &self,
        cmd: ResourceId,
        image: ResourceId,
        layout: ImageLayout,
        color: [f32; 4],
        range: SubresourceRange,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_clear_color_image(
            self.live(cmd)?,
            self.live(image)?,
            layout,
            color,
            range,
        );
        Self::log_driver_error(result, "cmd_clear_color_image");
        let chunk = self.build_chunk(ChunkKind::ClearColorImage, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("image", image);
            w.write_u32("layout", layout as u32);
            w.write_f32_array("color", &color);
            wire::write_subresource_range(w, range);
        });
        self.append_cmd_chunk(cmd, chunk, &[(image, FrameRefKind::Write)]);
        Ok(())
    }

    pub fn cmd_clear_depth_stencil_image(
        &self,
        cmd: ResourceId,
        image: ResourceId,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: SubresourceRange,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_clear_depth_stencil_image(
            self.live(cmd)?,
            self.live(image)?,
            layout,
            depth,
            stencil,
            range,
        );
        Self::log_driver_error(result, "cmd_clear_depth_stencil_image");
        let chunk = self.build_chunk(ChunkKind::ClearDepthStencilImage, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("image", image);
            w.write_u32("layout", layout as u32);
            w.write_f32("depth", depth);
            w.write_u32("stencil", stencil);
            wire::write_subresource_range(w, range);
        });
        self.append_cmd_chunk(cmd, chunk, &[(image, FrameRefKind::Write)]);
        Ok(())
    }

    /// Barriers also update the tracked layout of every image they touch;
    /// the layout map always reflects the last recorded layout at the
    /// capture boundary.
    pub fn cmd_pipeline_barrier(
        &self,
        cmd: ResourceId,
        barriers: &[(ResourceId, ImageLayout, ImageLayout, SubresourceRange)],
    ) -> CaptureResult<()> {
        let live_barriers: Vec<ImageBarrier> = barriers
            .iter()
            .map(|&(image, old_layout, new_layout, range)| {
                Ok(ImageBarrier {
                    image: self.live(image)?,
                    old_layout,
                    new_layout,
                    range,
                })
            })
            .collect::<CaptureResult<_>>()?;
        let result = lock(&self.driver).cmd_pipeline_barrier(self.live(cmd)?, &live_barriers);
        Self::log_driver_error(result, "cmd_pipeline_barrier");

        {
            let mut layouts = lock(&self.image_layouts);
            for &(image, _, new_layout, range) in barriers {
                let entry = layouts.entry(image).or_default();
                if let Some(slot) = entry.iter_mut().find(|(r, _)| *r == range) {
                    slot.1 = new_layout;
                } else {
                    entry.push((range, new_layout));
                }
            }
        }

        let chunk = self.build_chunk(ChunkKind::PipelineBarrier, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("barrierCount", barriers.len() as u32);
            for &(image, old_layout, new_layout, range) in barriers {
                w.write_id("image", image);
                w.write_u32("oldLayout", old_layout as u32);
                w.write_u32("newLayout", new_layout as u32);
                wire::write_subresource_range(w, range);
            }
        });
        let refs: Vec<(ResourceId, FrameRefKind)> = barriers
            .iter()
            .map(|&(image, ..)| (image, FrameRefKind::Read))
            .collect();
        self.append_cmd_chunk(cmd, chunk, &refs);
        Ok(())
    }

    pub fn cmd_draw(
        &self,
        cmd: ResourceId,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_draw(
            self.live(cmd)?,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
        Self::log_driver_error(result, "cmd_draw");
        let chunk = self.build_chunk(ChunkKind::Draw, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("vertexCount", vertex_count);
            w.write_u32("instanceCount", instance_count);
            w.write_u32("firstVertex", first_vertex);
            w.write_u32("firstInstance", first_instance);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_draw_indexed(
        &self,
        cmd: ResourceId,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_draw_indexed(
            self.live(cmd)?,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
        Self::log_driver_error(result, "cmd_draw_indexed");
        let chunk = self.build_chunk(ChunkKind::DrawIndexed, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("indexCount", index_count);
            w.write_u32("instanceCount", instance_count);
            w.write_u32("firstIndex", first_index);
            w.write_i32("vertexOffset", vertex_offset);
            w.write_u32("firstInstance", first_instance);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_draw_indirect(
        &self,
        cmd: ResourceId,
        buffer: ResourceId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_draw_indirect(
            self.live(cmd)?,
            self.live(buffer)?,
            offset,
            draw_count,
            stride,
        );
        Self::log_driver_error(result, "cmd_draw_indirect");
        let chunk = self.build_chunk(ChunkKind::DrawIndirect, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("buffer", buffer);
            w.write_u64("offset", offset);
            w.write_u32("drawCount", draw_count);
            w.write_u32("stride", stride);
        });
        self.append_cmd_chunk(cmd, chunk, &[(buffer, FrameRefKind::Read)]);
        Ok(())
    }

    pub fn cmd_draw_indexed_indirect(
        &self,
        cmd: ResourceId,
        buffer: ResourceId,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_draw_indexed_indirect(
            self.live(cmd)?,
            self.live(buffer)?,
            offset,
            draw_count,
            stride,
        );
        Self::log_driver_error(result, "cmd_draw_indexed_indirect");
        let chunk = self.build_chunk(ChunkKind::DrawIndexedIndirect, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("buffer", buffer);
            w.write_u64("offset", offset);
            w.write_u32("drawCount", draw_count);
            w.write_u32("stride", stride);
        });
        self.append_cmd_chunk(cmd, chunk, &[(buffer, FrameRefKind::Read)]);
        Ok(())
    }

    pub fn cmd_dispatch(&self, cmd: ResourceId, x: u32, y: u32, z: u32) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_dispatch(self.live(cmd)?, x, y, z);
        Self::log_driver_error(result, "cmd_dispatch");
        let chunk = self.build_chunk(ChunkKind::Dispatch, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_u32("x", x);
            w.write_u32("y", y);
            w.write_u32("z", z);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_dispatch_indirect(
        &self,
        cmd: ResourceId,
        buffer: ResourceId,
        offset: u64,
    ) -> CaptureResult<()> {
        let result =
            lock(&self.driver).cmd_dispatch_indirect(self.live(cmd)?, self.live(buffer)?, offset);
        Self::log_driver_error(result, "cmd_dispatch_indirect");
        let chunk = self.build_chunk(ChunkKind::DispatchIndirect, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_id("buffer", buffer);
            w.write_u64("offset", offset);
        });
        self.append_cmd_chunk(cmd, chunk, &[(buffer, FrameRefKind::Read)]);
        Ok(())
    }

    pub fn cmd_marker_begin(&self, cmd: ResourceId, label: &str) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_marker_begin(self.live(cmd)?, label);
        Self::log_driver_error(result, "cmd_marker_begin");
        let chunk = self.build_chunk(ChunkKind::MarkerBegin, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_str("label", label);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_marker(&self, cmd: ResourceId, label: &str) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_marker(self.live(cmd)?, label);
        Self::log_driver_error(result, "cmd_marker");
        let chunk = self.build_chunk(ChunkKind::SetMarker, |w| {
            w.write_id("commandBuffer", cmd);
            w.write_str("label", label);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    pub fn cmd_marker_end(&self, cmd: ResourceId) -> CaptureResult<()> {
        let result = lock(&self.driver).cmd_marker_end(self.live(cmd)?);
        Self::log_driver_error(result, "cmd_marker_end");
        let chunk = self.build_chunk(ChunkKind::MarkerEnd, |w| {
            w.write_id("commandBuffer", cmd);
        });
        self.append_cmd_chunk(cmd, chunk, &[]);
        Ok(())
    }

    // ---- queue ----------------------------------------------------------

    pub fn queue_submit(&self, cmds: &[ResourceId]) -> CaptureResult<()> {
        let lives: Vec<DriverHandle> = cmds
            .iter()
            .map(|&c| self.live(c))
            .collect::<CaptureResult<_>>()?;
        Self::log_driver_error(lock(&self.driver).queue_submit(&lives), "queue_submit");

        match self.state() {
            CaptureState::WritingCapframe => {
                let chunk = self.build_chunk(ChunkKind::QueueSubmit, |w| {
                    w.write_id_array("commandBuffers", cmds);
                });
                let mut res = lock(&self.resources);
                if let Some(frame) = res.record_mut(self.frame_capture_record) {
                    frame.add_chunk(chunk);
                }
                // The command buffers' own chunks reach the file through the
                // ordinal merge; only the resources they touch need to join
                // the referenced set.
                for &cmd in cmds {
                    let refs = res
                        .record(cmd)
                        .map(|r| r.frame_refs.clone())
                        .unwrap_or_default();
                    for (id, kind) in refs {
                        res.mark_frame_referenced(id, kind);
                    }
                }
                drop(res);
                let mut records = lock(&self.cmd_buffer_records);
                for &cmd in cmds {
                    if !records.contains(&cmd) {
                        records.push(cmd);
                    }
                }
            }
            CaptureState::WritingIdle => {
                // nothing reaches a capture, but written resources go dirty
                // so a later capture re-snapshots them
                let mut res = lock(&self.resources);
                for &cmd in cmds {
                    let refs = res
                        .record(cmd)
                        .map(|r| r.frame_refs.clone())
                        .unwrap_or_default();
                    for (id, kind) in refs {
                        if !matches!(kind, FrameRefKind::Read) {
                            res.mark_dirty(id);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn queue_wait_idle(&self) -> CaptureResult<()> {
        Self::log_driver_error(lock(&self.driver).queue_wait_idle(), "queue_wait_idle");
        let chunk = self.build_chunk(ChunkKind::QueueWaitIdle, |_| {});
        self.append_frame_chunk(chunk);
        Ok(())
    }

    pub fn device_wait_idle(&self) -> CaptureResult<()> {
        Self::log_driver_error(lock(&self.driver).device_wait_idle(), "device_wait_idle");
        let chunk = self.build_chunk(ChunkKind::DeviceWaitIdle, |_| {});
        self.append_frame_chunk(chunk);
        Ok(())
    }

    /// Frame boundary: remembers which backbuffer was presented and bumps
    /// the frame counter.
    pub fn present(&self, window: u64, image_index: u32) -> CaptureResult<()> {
        let swapchain = lock(&self.swap_lookup).get(&window).copied();
        if let Some(swapchain) = swapchain {
            let mut res = lock(&self.resources);
            if let Some(info) = res
                .record_mut(swapchain)
                .and_then(|r| r.swap_info.as_mut())
            {
                info.last_present = image_index as usize;
            }
        }
        let frame = self
            .frame_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;

        {
            let mut times = lock(&self.frame_times);
            let now = std::time::Instant::now();
            if let Some(last) = times.last_present.replace(now) {
                let ms = last.elapsed().as_secs_f64() * 1e3;
                times.total_ms += ms;
                times.count += 1;
                if times.count == 1 || ms < times.min_ms {
                    times.min_ms = ms;
                }
                if ms > times.max_ms {
                    times.max_ms = ms;
                }
                if times.count % 250 == 0 {
                    tracing::debug!(
                        frame,
                        avg_ms = times.total_ms / times.count as f64,
                        min_ms = times.min_ms,
                        max_ms = times.max_ms,
                        "frame timing"
                    );
                }
            }
        }
        Ok(())
    }
}
