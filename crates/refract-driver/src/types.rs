use bitflags::bitflags;
use refract_protocol::{AttachmentDesc, ImageFormat, ImageLayout, SubresourceRange, Topology};

/// Opaque handle to a live driver object. Zero is the null handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DriverHandle(pub u64);

impl DriverHandle {
    pub const NULL: DriverHandle = DriverHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const VERTEX       = 1 << 0;
        const INDEX        = 1 << 1;
        const UNIFORM      = 1 << 2;
        const STORAGE      = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
        const INDIRECT     = 1 << 6;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ImageUsage: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const DEPTH_ATTACHMENT = 1 << 1;
        const SAMPLED          = 1 << 2;
        const TRANSFER_SRC     = 1 << 3;
        const TRANSFER_DST     = 1 << 4;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    /// Host-visible and coherently mapped; such buffers can be mapped by the
    /// application and are shadow-copied by the capture layer.
    pub host_coherent: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: ImageUsage,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerDesc {
    pub linear_filter: bool,
    pub address_clamp: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub render_pass: DriverHandle,
    pub attachments: Vec<DriverHandle>,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DescriptorKind {
    UniformBuffer = 0,
    StorageBuffer = 1,
    SampledImage = 2,
    Sampler = 3,
    UniformBufferDynamic = 4,
    StorageBufferDynamic = 5,
}

impl DescriptorKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::UniformBuffer,
            1 => Self::StorageBuffer,
            2 => Self::SampledImage,
            3 => Self::Sampler,
            4 => Self::UniformBufferDynamic,
            5 => Self::StorageBufferDynamic,
            _ => return None,
        })
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::UniformBufferDynamic | Self::StorageBufferDynamic)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    /// Number of dynamic descriptors declared by this layout; dynamic
    /// offsets are passed at bind time only when this is non-zero.
    pub fn dynamic_count(&self) -> u32 {
        self.bindings
            .iter()
            .filter(|b| b.kind.is_dynamic())
            .map(|b| b.count)
            .sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    pub set_layouts: Vec<DriverHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    pub layout: DriverHandle,
    pub render_pass: DriverHandle,
    pub topology: Topology,
    pub patch_control_points: u32,
    pub vertex_shader: DriverHandle,
    pub fragment_shader: DriverHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub layout: DriverHandle,
    pub shader: DriverHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: DriverHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub range: SubresourceRange,
}

/// Result of a blocking image readback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReadback {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row in `data`; at least `width * bytes_per_pixel`, drivers
    /// may pad rows.
    pub row_pitch: u32,
    pub data: Vec<u8>,
}
