use crate::types::*;
use crate::{Driver, DriverError, DriverResult};
use refract_protocol::{
    ClearValue, DepthBias, ImageLayout, IndexType, PipelineBindPoint, RenderArea,
    StencilFaceSelect, SubresourceRange, Viewport,
};
use std::collections::HashMap;

/// One operation recorded into a command buffer.
///
/// This mirrors the `cmd_*` half of [`Driver`] one-to-one so tests can
/// assert exact command sequences.
#[derive(Clone, Debug, PartialEq)]
pub enum CmdBufferOp {
    BeginRenderPass {
        render_pass: DriverHandle,
        framebuffer: DriverHandle,
        render_area: RenderArea,
        clear_values: Vec<ClearValue>,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: DriverHandle,
    },
    BindDescriptorSet {
        bind_point: PipelineBindPoint,
        layout: DriverHandle,
        set_index: u32,
        set: DriverHandle,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<DriverHandle>,
        offsets: Vec<u64>,
    },
    BindIndexBuffer {
        buffer: DriverHandle,
        offset: u64,
        index_type: IndexType,
    },
    SetViewports(Vec<Viewport>),
    SetScissors(Vec<RenderArea>),
    SetLineWidth(f32),
    SetDepthBias(DepthBias),
    SetBlendConstants([f32; 4]),
    SetDepthBounds {
        min: f32,
        max: f32,
    },
    SetStencilCompareMask {
        face: StencilFaceSelect,
        mask: u32,
    },
    SetStencilWriteMask {
        face: StencilFaceSelect,
        mask: u32,
    },
    SetStencilReference {
        face: StencilFaceSelect,
        reference: u32,
    },
    CopyBuffer {
        src: DriverHandle,
        dst: DriverHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    CopyImage {
        src: DriverHandle,
        dst: DriverHandle,
    },
    UpdateBuffer {
        dst: DriverHandle,
        offset: u64,
        data: Vec<u8>,
    },
    FillBuffer {
        dst: DriverHandle,
        offset: u64,
        size: u64,
        value: u32,
    },
    PushConstants {
        layout: DriverHandle,
        offset: u32,
        data: Vec<u8>,
    },
    ClearColorImage {
        image: DriverHandle,
        layout: ImageLayout,
        color: [f32; 4],
        range: SubresourceRange,
    },
    ClearDepthStencilImage {
        image: DriverHandle,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: SubresourceRange,
    },
    PipelineBarrier(Vec<ImageBarrier>),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: DriverHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: DriverHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: DriverHandle,
        offset: u64,
    },
    MarkerBegin(String),
    Marker(String),
    MarkerEnd,
}

impl CmdBufferOp {
    /// True for commands that do work on the GPU (draws, dispatches, copies,
    /// clears) as opposed to state changes and markers.
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            CmdBufferOp::Draw { .. }
                | CmdBufferOp::DrawIndexed { .. }
                | CmdBufferOp::DrawIndirect { .. }
                | CmdBufferOp::DrawIndexedIndirect { .. }
                | CmdBufferOp::Dispatch { .. }
                | CmdBufferOp::DispatchIndirect { .. }
                | CmdBufferOp::CopyBuffer { .. }
                | CmdBufferOp::CopyImage { .. }
                | CmdBufferOp::UpdateBuffer { .. }
                | CmdBufferOp::FillBuffer { .. }
                | CmdBufferOp::ClearColorImage { .. }
                | CmdBufferOp::ClearDepthStencilImage { .. }
        )
    }

    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            CmdBufferOp::Draw { .. }
                | CmdBufferOp::DrawIndexed { .. }
                | CmdBufferOp::DrawIndirect { .. }
                | CmdBufferOp::DrawIndexedIndirect { .. }
        )
    }
}

/// Snapshot of one queue submission: the submitted handles in order and
/// each command buffer's recorded operations at submit time.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmittedBatch {
    pub cmds: Vec<DriverHandle>,
    pub ops: Vec<Vec<CmdBufferOp>>,
}

struct NullBuffer {
    desc: BufferDesc,
    data: Vec<u8>,
}

struct NullImage {
    desc: ImageDesc,
    data: Vec<u8>,
}

#[derive(Default)]
struct NullCmdBuffer {
    recording: bool,
    ended: bool,
    ops: Vec<CmdBufferOp>,
}

/// Headless [`Driver`]: records everything, simulates host-visible storage.
///
/// Copies, fills and buffer updates take effect at submit so readbacks after
/// a flush observe what a GPU would have produced. No rasterization happens;
/// draws are recorded verbatim.
#[derive(Default)]
pub struct NullDriver {
    next_handle: u64,
    buffers: HashMap<DriverHandle, NullBuffer>,
    images: HashMap<DriverHandle, NullImage>,
    swapchains: HashMap<DriverHandle, Vec<DriverHandle>>,
    cmd_buffers: HashMap<DriverHandle, NullCmdBuffer>,
    objects: HashMap<DriverHandle, &'static str>,
    /// Every submission in order, for test assertions.
    pub submissions: Vec<SubmittedBatch>,
    /// Number of queue/device idle waits issued.
    pub wait_count: u32,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> DriverHandle {
        self.next_handle += 1;
        DriverHandle(self.next_handle)
    }

    fn alloc_object(&mut self, kind: &'static str) -> DriverHandle {
        let handle = self.alloc();
        self.objects.insert(handle, kind);
        handle
    }

    fn cmd(&mut self, cmd: DriverHandle) -> DriverResult<&mut NullCmdBuffer> {
        let buf = self
            .cmd_buffers
            .get_mut(&cmd)
            .ok_or(DriverError::InvalidHandle(cmd))?;
        if !buf.recording {
            return Err(DriverError::Failed(format!(
                "command buffer {cmd:?} is not recording"
            )));
        }
        Ok(buf)
    }

    fn record(&mut self, cmd: DriverHandle, op: CmdBufferOp) -> DriverResult<()> {
        self.cmd(cmd)?.ops.push(op);
        Ok(())
    }

    /// Recorded (or submitted) operations of a command buffer.
    pub fn cmd_ops(&self, cmd: DriverHandle) -> &[CmdBufferOp] {
        self.cmd_buffers
            .get(&cmd)
            .map(|b| b.ops.as_slice())
            .unwrap_or(&[])
    }

    pub fn buffer_contents(&self, buffer: DriverHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    fn apply(&mut self, ops: &[CmdBufferOp]) {
        for op in ops {
            match op {
                CmdBufferOp::UpdateBuffer { dst, offset, data } => {
                    if let Some(buf) = self.buffers.get_mut(dst) {
                        let start = *offset as usize;
                        let end = (start + data.len()).min(buf.data.len());
                        if start < end {
                            buf.data[start..end].copy_from_slice(&data[..end - start]);
                        }
                    }
                }
                CmdBufferOp::FillBuffer {
                    dst,
                    offset,
                    size,
                    value,
                } => {
                    if let Some(buf) = self.buffers.get_mut(dst) {
                        let start = (*offset as usize).min(buf.data.len());
                        let end = (*offset + *size).min(buf.data.len() as u64) as usize;
                        for chunk in buf.data[start..end].chunks_mut(4) {
                            let bytes = value.to_le_bytes();
                            chunk.copy_from_slice(&bytes[..chunk.len()]);
                        }
                    }
                }
                CmdBufferOp::CopyBuffer {
                    src,
                    dst,
                    src_offset,
                    dst_offset,
                    size,
                } => {
                    let data = self.buffers.get(src).map(|b| {
                        let start = (*src_offset as usize).min(b.data.len());
                        let end = (*src_offset + *size).min(b.data.len() as u64) as usize;
                        b.data[start..end].to_vec()
                    });
                    if let (Some(data), Some(buf)) = (data, self.buffers.get_mut(dst)) {
                        let start = (*dst_offset as usize).min(buf.data.len());
                        let end = (start + data.len()).min(buf.data.len());
                        buf.data[start..end].copy_from_slice(&data[..end - start]);
                    }
                }
                CmdBufferOp::CopyImage { src, dst } => {
                    let data = self.images.get(src).map(|i| i.data.clone());
                    if let (Some(data), Some(img)) = (data, self.images.get_mut(dst)) {
                        let len = data.len().min(img.data.len());
                        img.data[..len].copy_from_slice(&data[..len]);
                    }
                }
                CmdBufferOp::ClearColorImage { image, color, .. } => {
                    if let Some(img) = self.images.get_mut(image) {
                        if let Some(texel) = encode_color(img.desc.format, *color) {
                            for px in img.data.chunks_mut(texel.len()) {
                                px.copy_from_slice(&texel[..px.len()]);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn encode_color(format: refract_protocol::ImageFormat, color: [f32; 4]) -> Option<Vec<u8>> {
    use refract_protocol::ImageFormat::*;
    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0) as u8;
    match format {
        Rgba8Unorm => Some(vec![
            to_u8(color[0]),
            to_u8(color[1]),
            to_u8(color[2]),
            to_u8(color[3]),
        ]),
        Bgra8Unorm => Some(vec![
            to_u8(color[2]),
            to_u8(color[1]),
            to_u8(color[0]),
            to_u8(color[3]),
        ]),
        _ => None,
    }
}

impl Driver for NullDriver {
    fn create_buffer(&mut self, desc: &BufferDesc) -> DriverResult<DriverHandle> {
        let handle = self.alloc();
        self.buffers.insert(
            handle,
            NullBuffer {
                desc: *desc,
                data: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn create_image(&mut self, desc: &ImageDesc) -> DriverResult<DriverHandle> {
        let handle = self.alloc();
        let size = desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize;
        self.images.insert(
            handle,
            NullImage {
                desc: *desc,
                data: vec![0; size],
            },
        );
        Ok(handle)
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("sampler"))
    }

    fn create_shader_module(&mut self, _code: &[u8]) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("shader"))
    }

    fn create_render_pass(&mut self, _desc: &RenderPassDesc) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("render_pass"))
    }

    fn create_framebuffer(&mut self, _desc: &FramebufferDesc) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("framebuffer"))
    }

    fn create_descriptor_set_layout(
        &mut self,
        _desc: &DescriptorSetLayoutDesc,
    ) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("descriptor_set_layout"))
    }

    fn create_pipeline_layout(&mut self, _desc: &PipelineLayoutDesc) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("pipeline_layout"))
    }

    fn alloc_descriptor_set(&mut self, layout: DriverHandle) -> DriverResult<DriverHandle> {
        if !self.objects.contains_key(&layout) {
            return Err(DriverError::InvalidHandle(layout));
        }
        Ok(self.alloc_object("descriptor_set"))
    }

    fn update_descriptor_set(
        &mut self,
        set: DriverHandle,
        _binding: u32,
        _resource: DriverHandle,
    ) -> DriverResult<()> {
        if !self.objects.contains_key(&set) {
            return Err(DriverError::InvalidHandle(set));
        }
        Ok(())
    }

    fn create_graphics_pipeline(
        &mut self,
        _desc: &GraphicsPipelineDesc,
    ) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("graphics_pipeline"))
    }

    fn create_compute_pipeline(
        &mut self,
        _desc: &ComputePipelineDesc,
    ) -> DriverResult<DriverHandle> {
        Ok(self.alloc_object("compute_pipeline"))
    }

    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DriverResult<DriverHandle> {
        let images: Vec<DriverHandle> = (0..desc.image_count)
            .map(|_| {
                self.create_image(&ImageDesc {
                    format: desc.format,
                    width: desc.width,
                    height: desc.height,
                    mip_levels: 1,
                    array_layers: 1,
                    usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC,
                })
            })
            .collect::<DriverResult<_>>()?;
        let handle = self.alloc_object("swapchain");
        self.swapchains.insert(handle, images);
        Ok(handle)
    }

    fn get_swapchain_images(&mut self, swapchain: DriverHandle) -> DriverResult<Vec<DriverHandle>> {
        self.swapchains
            .get(&swapchain)
            .cloned()
            .ok_or(DriverError::InvalidHandle(swapchain))
    }

    fn destroy(&mut self, handle: DriverHandle) {
        self.buffers.remove(&handle);
        self.images.remove(&handle);
        self.swapchains.remove(&handle);
        self.cmd_buffers.remove(&handle);
        self.objects.remove(&handle);
    }

    fn create_command_buffer(&mut self) -> DriverResult<DriverHandle> {
        let handle = self.alloc();
        self.cmd_buffers.insert(handle, NullCmdBuffer::default());
        Ok(handle)
    }

    fn begin_command_buffer(&mut self, cmd: DriverHandle) -> DriverResult<()> {
        let buf = self
            .cmd_buffers
            .get_mut(&cmd)
            .ok_or(DriverError::InvalidHandle(cmd))?;
        if buf.recording {
            return Err(DriverError::Failed(format!(
                "command buffer {cmd:?} already recording"
            )));
        }
        buf.recording = true;
        buf.ended = false;
        Ok(())
    }

    fn end_command_buffer(&mut self, cmd: DriverHandle) -> DriverResult<()> {
        let buf = self.cmd(cmd)?;
        buf.recording = false;
        buf.ended = true;
        Ok(())
    }

    fn reset_command_buffer(&mut self, cmd: DriverHandle) -> DriverResult<()> {
        let buf = self
            .cmd_buffers
            .get_mut(&cmd)
            .ok_or(DriverError::InvalidHandle(cmd))?;
        buf.recording = false;
        buf.ended = false;
        buf.ops.clear();
        Ok(())
    }

    fn cmd_begin_render_pass(
        &mut self,
        cmd: DriverHandle,
        render_pass: DriverHandle,
        framebuffer: DriverHandle,
        render_area: RenderArea,
        clear_values: &[ClearValue],
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::BeginRenderPass {
                render_pass,
                framebuffer,
                render_area,
                clear_values: clear_values.to_vec(),
            },
        )
    }

    fn cmd_end_render_pass(&mut self, cmd: DriverHandle) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::EndRenderPass)
    }

    fn cmd_bind_pipeline(
        &mut self,
        cmd: DriverHandle,
        bind_point: PipelineBindPoint,
        pipeline: DriverHandle,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::BindPipeline {
                bind_point,
                pipeline,
            },
        )
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: DriverHandle,
        bind_point: PipelineBindPoint,
        layout: DriverHandle,
        set_index: u32,
        set: DriverHandle,
        dynamic_offsets: &[u32],
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::BindDescriptorSet {
                bind_point,
                layout,
                set_index,
                set,
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        )
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: DriverHandle,
        first_binding: u32,
        buffers: &[DriverHandle],
        offsets: &[u64],
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
                offsets: offsets.to_vec(),
            },
        )
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
        index_type: IndexType,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            },
        )
    }

    fn cmd_set_viewports(&mut self, cmd: DriverHandle, viewports: &[Viewport]) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetViewports(viewports.to_vec()))
    }

    fn cmd_set_scissors(&mut self, cmd: DriverHandle, scissors: &[RenderArea]) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetScissors(scissors.to_vec()))
    }

    fn cmd_set_line_width(&mut self, cmd: DriverHandle, width: f32) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetLineWidth(width))
    }

    fn cmd_set_depth_bias(&mut self, cmd: DriverHandle, bias: DepthBias) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetDepthBias(bias))
    }

    fn cmd_set_blend_constants(
        &mut self,
        cmd: DriverHandle,
        constants: [f32; 4],
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetBlendConstants(constants))
    }

    fn cmd_set_depth_bounds(&mut self, cmd: DriverHandle, min: f32, max: f32) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetDepthBounds { min, max })
    }

    fn cmd_set_stencil_compare_mask(
        &mut self,
        cmd: DriverHandle,
        face: StencilFaceSelect,
        mask: u32,
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetStencilCompareMask { face, mask })
    }

    fn cmd_set_stencil_write_mask(
        &mut self,
        cmd: DriverHandle,
        face: StencilFaceSelect,
        mask: u32,
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetStencilWriteMask { face, mask })
    }

    fn cmd_set_stencil_reference(
        &mut self,
        cmd: DriverHandle,
        face: StencilFaceSelect,
        reference: u32,
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::SetStencilReference { face, reference })
    }

    fn cmd_copy_buffer(
        &mut self,
        cmd: DriverHandle,
        src: DriverHandle,
        dst: DriverHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::CopyBuffer {
                src,
                dst,
                src_offset,
                dst_offset,
                size,
            },
        )
    }

    fn cmd_copy_image(
        &mut self,
        cmd: DriverHandle,
        src: DriverHandle,
        dst: DriverHandle,
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::CopyImage { src, dst })
    }

    fn cmd_update_buffer(
        &mut self,
        cmd: DriverHandle,
        dst: DriverHandle,
        offset: u64,
        data: &[u8],
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::UpdateBuffer {
                dst,
                offset,
                data: data.to_vec(),
            },
        )
    }

    fn cmd_fill_buffer(
        &mut self,
        cmd: DriverHandle,
        dst: DriverHandle,
        offset: u64,
        size: u64,
        value: u32,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::FillBuffer {
                dst,
                offset,
                size,
                value,
            },
        )
    }

    fn cmd_push_constants(
        &mut self,
        cmd: DriverHandle,
        layout: DriverHandle,
        offset: u32,
        data: &[u8],
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::PushConstants {
                layout,
                offset,
                data: data.to_vec(),
            },
        )
    }

    fn cmd_clear_color_image(
        &mut self,
        cmd: DriverHandle,
        image: DriverHandle,
        layout: ImageLayout,
        color: [f32; 4],
        range: SubresourceRange,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::ClearColorImage {
                image,
                layout,
                color,
                range,
            },
        )
    }

    fn cmd_clear_depth_stencil_image(
        &mut self,
        cmd: DriverHandle,
        image: DriverHandle,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: SubresourceRange,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::ClearDepthStencilImage {
                image,
                layout,
                depth,
                stencil,
                range,
            },
        )
    }

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: DriverHandle,
        barriers: &[ImageBarrier],
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::PipelineBarrier(barriers.to_vec()))
    }

    fn cmd_draw(
        &mut self,
        cmd: DriverHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        )
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: DriverHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        )
    }

    fn cmd_draw_indirect(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::DrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        )
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> DriverResult<()> {
        self.record(
            cmd,
            CmdBufferOp::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        )
    }

    fn cmd_dispatch(&mut self, cmd: DriverHandle, x: u32, y: u32, z: u32) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::Dispatch { x, y, z })
    }

    fn cmd_dispatch_indirect(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
    ) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::DispatchIndirect { buffer, offset })
    }

    fn cmd_marker_begin(&mut self, cmd: DriverHandle, label: &str) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::MarkerBegin(label.to_owned()))
    }

    fn cmd_marker(&mut self, cmd: DriverHandle, label: &str) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::Marker(label.to_owned()))
    }

    fn cmd_marker_end(&mut self, cmd: DriverHandle) -> DriverResult<()> {
        self.record(cmd, CmdBufferOp::MarkerEnd)
    }

    fn queue_submit(&mut self, cmds: &[DriverHandle]) -> DriverResult<()> {
        let mut batch = SubmittedBatch {
            cmds: cmds.to_vec(),
            ops: Vec::with_capacity(cmds.len()),
        };
        for &cmd in cmds {
            let buf = self
                .cmd_buffers
                .get(&cmd)
                .ok_or(DriverError::InvalidHandle(cmd))?;
            if !buf.ended {
                return Err(DriverError::Failed(format!(
                    "command buffer {cmd:?} submitted without end"
                )));
            }
            batch.ops.push(buf.ops.clone());
        }
        for ops in batch.ops.clone() {
            self.apply(&ops);
        }
        self.submissions.push(batch);
        Ok(())
    }

    fn queue_wait_idle(&mut self) -> DriverResult<()> {
        self.wait_count += 1;
        Ok(())
    }

    fn device_wait_idle(&mut self) -> DriverResult<()> {
        self.wait_count += 1;
        Ok(())
    }

    fn write_buffer(
        &mut self,
        buffer: DriverHandle,
        offset: u64,
        data: &[u8],
    ) -> DriverResult<()> {
        let buf = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DriverError::InvalidHandle(buffer))?;
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&e| e <= buf.data.len())
            .ok_or_else(|| DriverError::Failed("buffer write out of bounds".into()))?;
        buf.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: DriverHandle,
        offset: u64,
        len: u64,
    ) -> DriverResult<Vec<u8>> {
        let buf = self
            .buffers
            .get(&buffer)
            .ok_or(DriverError::InvalidHandle(buffer))?;
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|&e| e <= buf.data.len())
            .ok_or_else(|| DriverError::Failed("buffer read out of bounds".into()))?;
        Ok(buf.data[start..end].to_vec())
    }

    fn write_image(&mut self, image: DriverHandle, data: &[u8]) -> DriverResult<()> {
        let img = self
            .images
            .get_mut(&image)
            .ok_or(DriverError::InvalidHandle(image))?;
        let len = data.len().min(img.data.len());
        img.data[..len].copy_from_slice(&data[..len]);
        Ok(())
    }

    fn read_image(&mut self, image: DriverHandle) -> DriverResult<ImageReadback> {
        let img = self
            .images
            .get(&image)
            .ok_or(DriverError::InvalidHandle(image))?;
        let bpp = img.desc.format.bytes_per_pixel();
        let tight = img.desc.width * bpp;
        // Pad rows like a real linear-tiled readback would.
        let row_pitch = tight.next_multiple_of(256);
        let mut data = vec![0u8; row_pitch as usize * img.desc.height as usize];
        for y in 0..img.desc.height as usize {
            let src = y * tight as usize;
            let dst = y * row_pitch as usize;
            data[dst..dst + tight as usize].copy_from_slice(&img.data[src..src + tight as usize]);
        }
        Ok(ImageReadback {
            format: img.desc.format,
            width: img.desc.width,
            height: img.desc.height,
            row_pitch,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refract_protocol::ImageFormat;

    #[test]
    fn buffer_updates_apply_at_submit() {
        let mut drv = NullDriver::new();
        let buf = drv
            .create_buffer(&BufferDesc {
                size: 8,
                usage: BufferUsage::TRANSFER_DST,
                host_coherent: false,
            })
            .unwrap();
        let cmd = drv.create_command_buffer().unwrap();
        drv.begin_command_buffer(cmd).unwrap();
        drv.cmd_update_buffer(cmd, buf, 2, &[1, 2, 3]).unwrap();
        drv.end_command_buffer(cmd).unwrap();

        assert_eq!(drv.buffer_contents(buf).unwrap(), &[0; 8]);
        drv.queue_submit(&[cmd]).unwrap();
        assert_eq!(drv.buffer_contents(buf).unwrap(), &[0, 0, 1, 2, 3, 0, 0, 0]);
        assert_eq!(drv.submissions.len(), 1);
        assert_eq!(drv.submissions[0].cmds, vec![cmd]);
    }

    #[test]
    fn submitting_an_open_command_buffer_fails() {
        let mut drv = NullDriver::new();
        let cmd = drv.create_command_buffer().unwrap();
        drv.begin_command_buffer(cmd).unwrap();
        assert!(drv.queue_submit(&[cmd]).is_err());
    }

    #[test]
    fn readback_pads_rows() {
        let mut drv = NullDriver::new();
        let img = drv
            .create_image(&ImageDesc {
                format: ImageFormat::Rgba8Unorm,
                width: 3,
                height: 2,
                mip_levels: 1,
                array_layers: 1,
                usage: ImageUsage::TRANSFER_SRC,
            })
            .unwrap();
        drv.write_image(img, &[7u8; 3 * 2 * 4]).unwrap();
        let rb = drv.read_image(img).unwrap();
        assert_eq!(rb.row_pitch, 256);
        assert_eq!(rb.data.len(), 512);
        assert_eq!(&rb.data[0..12], &[7u8; 12]);
        assert_eq!(rb.data[12], 0);
    }
}
