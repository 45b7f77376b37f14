//! Backend-agnostic GPU state vocabulary used inside chunk payloads.
//!
//! These types deliberately know nothing about any concrete driver; they are
//! the currency between the recorded log, the replay engine's rebuilt state
//! vector, and the `Driver` trait.

use bitflags::bitflags;

/// Image layout as tracked by the capture layer and re-established on replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ImageLayout {
    #[default]
    Undefined = 0,
    /// The canonical layout every tracked image is transitioned to at the
    /// capture boundary so replay starts from a deterministic state.
    General = 1,
    ColorAttachment = 2,
    DepthStencilAttachment = 3,
    ShaderReadOnly = 4,
    TransferSrc = 5,
    TransferDst = 6,
    Present = 7,
}

impl ImageLayout {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Undefined,
            1 => Self::General,
            2 => Self::ColorAttachment,
            3 => Self::DepthStencilAttachment,
            4 => Self::ShaderReadOnly,
            5 => Self::TransferSrc,
            6 => Self::TransferDst,
            7 => Self::Present,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PipelineBindPoint {
    Graphics = 0,
    Compute = 1,
}

impl PipelineBindPoint {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Graphics),
            1 => Some(Self::Compute),
            _ => None,
        }
    }
}

/// Primitive topology baked into a graphics pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Topology {
    #[default]
    Unknown = 0,
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

impl Topology {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::PointList,
            2 => Self::LineList,
            3 => Self::LineStrip,
            4 => Self::TriangleList,
            5 => Self::TriangleStrip,
            6 => Self::TriangleFan,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IndexType {
    U16 = 0,
    U32 = 1,
}

impl IndexType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::U16),
            1 => Some(Self::U32),
            _ => None,
        }
    }

    pub fn byte_width(self) -> u32 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Pixel formats understood by the core.
///
/// This is the set the thumbnail readback knows how to point-sample; the
/// driver may support more, the core only ever names these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ImageFormat {
    Rgba8Unorm = 0,
    Bgra8Unorm = 1,
    Rgb10A2Unorm = 2,
    Rgba16Float = 3,
    Depth32Float = 4,
}

impl ImageFormat {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Rgba8Unorm,
            1 => Self::Bgra8Unorm,
            2 => Self::Rgb10A2Unorm,
            3 => Self::Rgba16Float,
            4 => Self::Depth32Float,
            _ => return None,
        })
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::Rgb10A2Unorm | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LoadOp {
    Load = 0,
    Clear = 1,
    DontCare = 2,
}

impl LoadOp {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Load),
            1 => Some(Self::Clear),
            2 => Some(Self::DontCare),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StoreOp {
    Store = 0,
    DontCare = 1,
}

impl StoreOp {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Store),
            1 => Some(Self::DontCare),
            _ => None,
        }
    }
}

/// One attachment of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: ImageFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Integer rectangle used for scissors and render areas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderArea {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub clamp: f32,
    pub slope: f32,
}

/// Dynamic stencil state for one face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StencilFace {
    pub reference: u32,
    pub compare_mask: u32,
    pub write_mask: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StencilFaceSelect {
    Front = 1,
    Back = 2,
    Both = 3,
}

impl StencilFaceSelect {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Front),
            2 => Some(Self::Back),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    pub fn includes_front(self) -> bool {
        matches!(self, Self::Front | Self::Both)
    }

    pub fn includes_back(self) -> bool {
        matches!(self, Self::Back | Self::Both)
    }
}

/// Mip/layer window of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
}

impl SubresourceRange {
    /// The whole image, whatever its actual dimensions.
    pub const ALL: SubresourceRange = SubresourceRange {
        base_mip: 0,
        mip_count: u32::MAX,
        base_layer: 0,
        layer_count: u32::MAX,
    };
}

bitflags! {
    /// Classification flags attached to a drawcall node in the event tree.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DrawFlags: u32 {
        const DRAWCALL    = 1 << 0;
        const INDEXED     = 1 << 1;
        const INSTANCED   = 1 << 2;
        const INDIRECT    = 1 << 3;
        const CLEAR       = 1 << 4;
        const COPY        = 1 << 5;
        const DISPATCH    = 1 << 6;
        const PUSH_MARKER = 1 << 7;
        const SET_MARKER  = 1 << 8;
        const PRESENT     = 1 << 9;
        const CMD_BUFFER  = 1 << 10;
    }
}
