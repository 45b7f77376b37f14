//! The driver dispatch surface the refract core records against and replays
//! onto.
//!
//! [`Driver`] is the seam between the capture/replay machinery and a real
//! GPU driver: resource creation, command-buffer recording, queue submission
//! and blocking readbacks. The core holds driver objects only as opaque
//! [`DriverHandle`]s and never interprets them.
//!
//! [`NullDriver`] is a headless implementation that records every operation
//! and simulates buffer/image storage, so a capture→replay round trip can be
//! asserted command-by-command without a GPU. Replaying onto a real driver
//! and replaying onto the null driver go through the same trait.

mod null;
mod types;

pub use null::{CmdBufferOp, NullDriver, SubmittedBatch};
pub use types::{
    BufferDesc, BufferUsage, ComputePipelineDesc, DescriptorBinding, DescriptorKind,
    DescriptorSetLayoutDesc, DriverHandle, FramebufferDesc, GraphicsPipelineDesc, ImageBarrier,
    ImageDesc, ImageReadback, ImageUsage, PipelineLayoutDesc, RenderPassDesc, SamplerDesc,
    SwapchainDesc,
};

use refract_protocol::{
    ClearValue, DepthBias, ImageLayout, IndexType, PipelineBindPoint, RenderArea,
    StencilFaceSelect, SubresourceRange, Viewport,
};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid driver handle {0:?}")]
    InvalidHandle(DriverHandle),

    #[error("driver does not support {0}")]
    Unsupported(&'static str),

    #[error("out of device memory")]
    OutOfMemory,

    #[error("driver call failed: {0}")]
    Failed(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Synchronous dispatch table of the underlying GPU API.
///
/// Command-recording calls (`cmd_*`) take the command buffer as their first
/// argument and must only be issued between `begin_command_buffer` and
/// `end_command_buffer`. `queue_wait_idle` / `device_wait_idle` block until
/// the GPU drains; they have no timeout and a wait that never completes is
/// fatal to the caller.
#[allow(clippy::too_many_arguments)]
pub trait Driver: Send {
    // Resource creation.
    fn create_buffer(&mut self, desc: &BufferDesc) -> DriverResult<DriverHandle>;
    fn create_image(&mut self, desc: &ImageDesc) -> DriverResult<DriverHandle>;
    fn create_sampler(&mut self, desc: &SamplerDesc) -> DriverResult<DriverHandle>;
    fn create_shader_module(&mut self, code: &[u8]) -> DriverResult<DriverHandle>;
    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> DriverResult<DriverHandle>;
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> DriverResult<DriverHandle>;
    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> DriverResult<DriverHandle>;
    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc) -> DriverResult<DriverHandle>;
    fn alloc_descriptor_set(&mut self, layout: DriverHandle) -> DriverResult<DriverHandle>;
    /// Point `binding` of `set` at a resource (buffer, image or sampler).
    fn update_descriptor_set(
        &mut self,
        set: DriverHandle,
        binding: u32,
        resource: DriverHandle,
    ) -> DriverResult<()>;
    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> DriverResult<DriverHandle>;
    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc)
        -> DriverResult<DriverHandle>;
    fn create_swapchain(&mut self, desc: &SwapchainDesc) -> DriverResult<DriverHandle>;
    fn get_swapchain_images(&mut self, swapchain: DriverHandle) -> DriverResult<Vec<DriverHandle>>;
    fn destroy(&mut self, handle: DriverHandle);

    // Command buffers.
    fn create_command_buffer(&mut self) -> DriverResult<DriverHandle>;
    fn begin_command_buffer(&mut self, cmd: DriverHandle) -> DriverResult<()>;
    fn end_command_buffer(&mut self, cmd: DriverHandle) -> DriverResult<()>;
    fn reset_command_buffer(&mut self, cmd: DriverHandle) -> DriverResult<()>;

    fn cmd_begin_render_pass(
        &mut self,
        cmd: DriverHandle,
        render_pass: DriverHandle,
        framebuffer: DriverHandle,
        render_area: RenderArea,
        clear_values: &[ClearValue],
    ) -> DriverResult<()>;
    fn cmd_end_render_pass(&mut self, cmd: DriverHandle) -> DriverResult<()>;

    fn cmd_bind_pipeline(
        &mut self,
        cmd: DriverHandle,
        bind_point: PipelineBindPoint,
        pipeline: DriverHandle,
    ) -> DriverResult<()>;
    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: DriverHandle,
        bind_point: PipelineBindPoint,
        layout: DriverHandle,
        set_index: u32,
        set: DriverHandle,
        dynamic_offsets: &[u32],
    ) -> DriverResult<()>;
    fn cmd_bind_vertex_buffers(
        &mut self,
        cmd: DriverHandle,
        first_binding: u32,
        buffers: &[DriverHandle],
        offsets: &[u64],
    ) -> DriverResult<()>;
    fn cmd_bind_index_buffer(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
        index_type: IndexType,
    ) -> DriverResult<()>;

    fn cmd_set_viewports(&mut self, cmd: DriverHandle, viewports: &[Viewport]) -> DriverResult<()>;
    fn cmd_set_scissors(&mut self, cmd: DriverHandle, scissors: &[RenderArea]) -> DriverResult<()>;
    fn cmd_set_line_width(&mut self, cmd: DriverHandle, width: f32) -> DriverResult<()>;
    fn cmd_set_depth_bias(&mut self, cmd: DriverHandle, bias: DepthBias) -> DriverResult<()>;
    fn cmd_set_blend_constants(&mut self, cmd: DriverHandle, constants: [f32; 4])
        -> DriverResult<()>;
    fn cmd_set_depth_bounds(&mut self, cmd: DriverHandle, min: f32, max: f32) -> DriverResult<()>;
    fn cmd_set_stencil_compare_mask(
        &mut self,
        cmd: DriverHandle,
        face: StencilFaceSelect,
        mask: u32,
    ) -> DriverResult<()>;
    fn cmd_set_stencil_write_mask(
        &mut self,
        cmd: DriverHandle,
        face: StencilFaceSelect,
        mask: u32,
    ) -> DriverResult<()>;
    fn cmd_set_stencil_reference(
        &mut self,
        cmd: DriverHandle,
        face: StencilFaceSelect,
        reference: u32,
    ) -> DriverResult<()>;

    fn cmd_copy_buffer(
        &mut self,
        cmd: DriverHandle,
        src: DriverHandle,
        dst: DriverHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> DriverResult<()>;
    fn cmd_copy_image(
        &mut self,
        cmd: DriverHandle,
        src: DriverHandle,
        dst: DriverHandle,
    ) -> DriverResult<()>;
    fn cmd_update_buffer(
        &mut self,
        cmd: DriverHandle,
        dst: DriverHandle,
        offset: u64,
        data: &[u8],
    ) -> DriverResult<()>;
    fn cmd_fill_buffer(
        &mut self,
        cmd: DriverHandle,
        dst: DriverHandle,
        offset: u64,
        size: u64,
        value: u32,
    ) -> DriverResult<()>;
    fn cmd_push_constants(
        &mut self,
        cmd: DriverHandle,
        layout: DriverHandle,
        offset: u32,
        data: &[u8],
    ) -> DriverResult<()>;

    fn cmd_clear_color_image(
        &mut self,
        cmd: DriverHandle,
        image: DriverHandle,
        layout: ImageLayout,
        color: [f32; 4],
        range: SubresourceRange,
    ) -> DriverResult<()>;
    fn cmd_clear_depth_stencil_image(
        &mut self,
        cmd: DriverHandle,
        image: DriverHandle,
        layout: ImageLayout,
        depth: f32,
        stencil: u32,
        range: SubresourceRange,
    ) -> DriverResult<()>;

    fn cmd_pipeline_barrier(
        &mut self,
        cmd: DriverHandle,
        barriers: &[ImageBarrier],
    ) -> DriverResult<()>;

    fn cmd_draw(
        &mut self,
        cmd: DriverHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> DriverResult<()>;
    fn cmd_draw_indexed(
        &mut self,
        cmd: DriverHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> DriverResult<()>;
    fn cmd_draw_indirect(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> DriverResult<()>;
    fn cmd_draw_indexed_indirect(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> DriverResult<()>;
    fn cmd_dispatch(&mut self, cmd: DriverHandle, x: u32, y: u32, z: u32) -> DriverResult<()>;
    fn cmd_dispatch_indirect(
        &mut self,
        cmd: DriverHandle,
        buffer: DriverHandle,
        offset: u64,
    ) -> DriverResult<()>;

    fn cmd_marker_begin(&mut self, cmd: DriverHandle, label: &str) -> DriverResult<()>;
    fn cmd_marker(&mut self, cmd: DriverHandle, label: &str) -> DriverResult<()>;
    fn cmd_marker_end(&mut self, cmd: DriverHandle) -> DriverResult<()>;

    // Queue.
    fn queue_submit(&mut self, cmds: &[DriverHandle]) -> DriverResult<()>;
    fn queue_wait_idle(&mut self) -> DriverResult<()>;
    fn device_wait_idle(&mut self) -> DriverResult<()>;

    // Host access. These block until the GPU is done with the resource.
    fn write_buffer(&mut self, buffer: DriverHandle, offset: u64, data: &[u8])
        -> DriverResult<()>;
    fn read_buffer(&mut self, buffer: DriverHandle, offset: u64, len: u64)
        -> DriverResult<Vec<u8>>;
    fn write_image(&mut self, image: DriverHandle, data: &[u8]) -> DriverResult<()>;
    fn read_image(&mut self, image: DriverHandle) -> DriverResult<ImageReadback>;
}
