/// First kind value used by API chunks. Values below this are reserved
/// framing/system space: readers skip unknown kinds below it silently, while
/// an unknown kind at or above it is an error.
pub const FIRST_CHUNK_ID: u32 = 1000;

/// One past the last defined chunk kind.
pub const NUM_CHUNKS: u32 = ChunkKind::InitialContents as u32 + 1;

/// Top bit of the on-disk kind word: a callstack block follows the payload.
pub const CHUNK_CALLSTACK_FLAG: u32 = 0x8000_0000;

/// Mask extracting the kind value from the on-disk kind word.
pub const CHUNK_KIND_MASK: u32 = !CHUNK_CALLSTACK_FLAG;

/// The closed set of chunk kinds that can appear in a capture log.
///
/// Every kind has a registered human-readable name ([`ChunkKind::name`]) and
/// a replay handler. The discriminants are wire-stable: appending new kinds
/// is a [`crate::SERIALISE_VERSION`] bump, reordering is forbidden.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum ChunkKind {
    DeviceInit = FIRST_CHUNK_ID,

    UnmapMemory,
    FlushMappedMemory,

    CreateBuffer,
    CreateImage,
    CreateSampler,
    CreateShaderModule,
    CreateRenderPass,
    CreateFramebuffer,
    CreateDescriptorSetLayout,
    CreatePipelineLayout,
    AllocDescriptorSets,
    UpdateDescriptorSet,
    CreateGraphicsPipeline,
    CreateComputePipeline,
    CreateSwapchain,
    GetSwapchainImages,

    BeginCmdBuffer,
    EndCmdBuffer,
    ResetCmdBuffer,

    QueueSubmit,
    QueueWaitIdle,
    DeviceWaitIdle,

    BeginRenderPass,
    EndRenderPass,

    BindPipeline,
    BindDescriptorSets,
    BindVertexBuffers,
    BindIndexBuffer,

    SetViewport,
    SetScissor,
    SetLineWidth,
    SetDepthBias,
    SetBlendConstants,
    SetDepthBounds,
    SetStencilCompareMask,
    SetStencilWriteMask,
    SetStencilReference,

    CopyBuffer,
    CopyImage,
    UpdateBuffer,
    FillBuffer,
    PushConstants,

    ClearColorImage,
    ClearDepthStencilImage,

    PipelineBarrier,

    Draw,
    DrawIndexed,
    DrawIndirect,
    DrawIndexedIndirect,
    Dispatch,
    DispatchIndirect,

    MarkerBegin,
    SetMarker,
    MarkerEnd,

    CaptureScope,
    CaptureBegin,
    CaptureEnd,
    InitialContents,
}

impl ChunkKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        use ChunkKind::*;
        Some(match value {
            v if v == DeviceInit as u32 => DeviceInit,
            v if v == UnmapMemory as u32 => UnmapMemory,
            v if v == FlushMappedMemory as u32 => FlushMappedMemory,
            v if v == CreateBuffer as u32 => CreateBuffer,
            v if v == CreateImage as u32 => CreateImage,
            v if v == CreateSampler as u32 => CreateSampler,
            v if v == CreateShaderModule as u32 => CreateShaderModule,
            v if v == CreateRenderPass as u32 => CreateRenderPass,
            v if v == CreateFramebuffer as u32 => CreateFramebuffer,
            v if v == CreateDescriptorSetLayout as u32 => CreateDescriptorSetLayout,
            v if v == CreatePipelineLayout as u32 => CreatePipelineLayout,
            v if v == AllocDescriptorSets as u32 => AllocDescriptorSets,
            v if v == UpdateDescriptorSet as u32 => UpdateDescriptorSet,
            v if v == CreateGraphicsPipeline as u32 => CreateGraphicsPipeline,
            v if v == CreateComputePipeline as u32 => CreateComputePipeline,
            v if v == CreateSwapchain as u32 => CreateSwapchain,
            v if v == GetSwapchainImages as u32 => GetSwapchainImages,
            v if v == BeginCmdBuffer as u32 => BeginCmdBuffer,
            v if v == EndCmdBuffer as u32 => EndCmdBuffer,
            v if v == ResetCmdBuffer as u32 => ResetCmdBuffer,
            v if v == QueueSubmit as u32 => QueueSubmit,
            v if v == QueueWaitIdle as u32 => QueueWaitIdle,
            v if v == DeviceWaitIdle as u32 => DeviceWaitIdle,
            v if v == BeginRenderPass as u32 => BeginRenderPass,
            v if v == EndRenderPass as u32 => EndRenderPass,
            v if v == BindPipeline as u32 => BindPipeline,
            v if v == BindDescriptorSets as u32 => BindDescriptorSets,
            v if v == BindVertexBuffers as u32 => BindVertexBuffers,
            v if v == BindIndexBuffer as u32 => BindIndexBuffer,
            v if v == SetViewport as u32 => SetViewport,
            v if v == SetScissor as u32 => SetScissor,
            v if v == SetLineWidth as u32 => SetLineWidth,
            v if v == SetDepthBias as u32 => SetDepthBias,
            v if v == SetBlendConstants as u32 => SetBlendConstants,
            v if v == SetDepthBounds as u32 => SetDepthBounds,
            v if v == SetStencilCompareMask as u32 => SetStencilCompareMask,
            v if v == SetStencilWriteMask as u32 => SetStencilWriteMask,
            v if v == SetStencilReference as u32 => SetStencilReference,
            v if v == CopyBuffer as u32 => CopyBuffer,
            v if v == CopyImage as u32 => CopyImage,
            v if v == UpdateBuffer as u32 => UpdateBuffer,
            v if v == FillBuffer as u32 => FillBuffer,
            v if v == PushConstants as u32 => PushConstants,
            v if v == ClearColorImage as u32 => ClearColorImage,
            v if v == ClearDepthStencilImage as u32 => ClearDepthStencilImage,
            v if v == PipelineBarrier as u32 => PipelineBarrier,
            v if v == Draw as u32 => Draw,
            v if v == DrawIndexed as u32 => DrawIndexed,
            v if v == DrawIndirect as u32 => DrawIndirect,
            v if v == DrawIndexedIndirect as u32 => DrawIndexedIndirect,
            v if v == Dispatch as u32 => Dispatch,
            v if v == DispatchIndirect as u32 => DispatchIndirect,
            v if v == MarkerBegin as u32 => MarkerBegin,
            v if v == SetMarker as u32 => SetMarker,
            v if v == MarkerEnd as u32 => MarkerEnd,
            v if v == CaptureScope as u32 => CaptureScope,
            v if v == CaptureBegin as u32 => CaptureBegin,
            v if v == CaptureEnd as u32 => CaptureEnd,
            v if v == InitialContents as u32 => InitialContents,
            _ => return None,
        })
    }

    /// Registered human-readable name, used for event descriptions and the
    /// dump tool. Kinds outside `[FIRST_CHUNK_ID, NUM_CHUNKS)` have no name.
    pub fn name(self) -> &'static str {
        use ChunkKind::*;
        match self {
            DeviceInit => "DeviceInit",
            UnmapMemory => "UnmapMemory",
            FlushMappedMemory => "FlushMappedMemory",
            CreateBuffer => "CreateBuffer",
            CreateImage => "CreateImage",
            CreateSampler => "CreateSampler",
            CreateShaderModule => "CreateShaderModule",
            CreateRenderPass => "CreateRenderPass",
            CreateFramebuffer => "CreateFramebuffer",
            CreateDescriptorSetLayout => "CreateDescriptorSetLayout",
            CreatePipelineLayout => "CreatePipelineLayout",
            AllocDescriptorSets => "AllocDescriptorSets",
            UpdateDescriptorSet => "UpdateDescriptorSet",
            CreateGraphicsPipeline => "CreateGraphicsPipeline",
            CreateComputePipeline => "CreateComputePipeline",
            CreateSwapchain => "CreateSwapchain",
            GetSwapchainImages => "GetSwapchainImages",
            BeginCmdBuffer => "BeginCmdBuffer",
            EndCmdBuffer => "EndCmdBuffer",
            ResetCmdBuffer => "ResetCmdBuffer",
            QueueSubmit => "QueueSubmit",
            QueueWaitIdle => "QueueWaitIdle",
            DeviceWaitIdle => "DeviceWaitIdle",
            BeginRenderPass => "CmdBeginRenderPass",
            EndRenderPass => "CmdEndRenderPass",
            BindPipeline => "CmdBindPipeline",
            BindDescriptorSets => "CmdBindDescriptorSets",
            BindVertexBuffers => "CmdBindVertexBuffers",
            BindIndexBuffer => "CmdBindIndexBuffer",
            SetViewport => "CmdSetViewport",
            SetScissor => "CmdSetScissor",
            SetLineWidth => "CmdSetLineWidth",
            SetDepthBias => "CmdSetDepthBias",
            SetBlendConstants => "CmdSetBlendConstants",
            SetDepthBounds => "CmdSetDepthBounds",
            SetStencilCompareMask => "CmdSetStencilCompareMask",
            SetStencilWriteMask => "CmdSetStencilWriteMask",
            SetStencilReference => "CmdSetStencilReference",
            CopyBuffer => "CmdCopyBuffer",
            CopyImage => "CmdCopyImage",
            UpdateBuffer => "CmdUpdateBuffer",
            FillBuffer => "CmdFillBuffer",
            PushConstants => "CmdPushConstants",
            ClearColorImage => "CmdClearColorImage",
            ClearDepthStencilImage => "CmdClearDepthStencilImage",
            PipelineBarrier => "CmdPipelineBarrier",
            Draw => "CmdDraw",
            DrawIndexed => "CmdDrawIndexed",
            DrawIndirect => "CmdDrawIndirect",
            DrawIndexedIndirect => "CmdDrawIndexedIndirect",
            Dispatch => "CmdDispatch",
            DispatchIndirect => "CmdDispatchIndirect",
            MarkerBegin => "CmdMarkerBegin",
            SetMarker => "CmdMarker",
            MarkerEnd => "CmdMarkerEnd",
            CaptureScope => "CaptureScope",
            CaptureBegin => "CaptureBegin",
            CaptureEnd => "CaptureEnd",
            InitialContents => "InitialContents",
        }
    }

    /// Name lookup for raw kind values, including out-of-range ones.
    pub fn name_for(value: u32) -> &'static str {
        match Self::from_u32(value) {
            Some(kind) => kind.name(),
            None => "<unknown>",
        }
    }

    /// True for chunks recorded into a command buffer's record rather than
    /// the frame record; their payload begins with the command buffer id.
    pub fn is_cmd_buffer_kind(self) -> bool {
        use ChunkKind::*;
        matches!(
            self,
            BeginCmdBuffer
                | EndCmdBuffer
                | ResetCmdBuffer
                | BeginRenderPass
                | EndRenderPass
                | BindPipeline
                | BindDescriptorSets
                | BindVertexBuffers
                | BindIndexBuffer
                | SetViewport
                | SetScissor
                | SetLineWidth
                | SetDepthBias
                | SetBlendConstants
                | SetDepthBounds
                | SetStencilCompareMask
                | SetStencilWriteMask
                | SetStencilReference
                | CopyBuffer
                | CopyImage
                | UpdateBuffer
                | FillBuffer
                | PushConstants
                | ClearColorImage
                | ClearDepthStencilImage
                | PipelineBarrier
                | Draw
                | DrawIndexed
                | DrawIndirect
                | DrawIndexedIndirect
                | Dispatch
                | DispatchIndirect
                | MarkerBegin
                | SetMarker
                | MarkerEnd
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_values_round_trip() {
        for v in FIRST_CHUNK_ID..NUM_CHUNKS {
            let kind = ChunkKind::from_u32(v).expect("every value in range is a kind");
            assert_eq!(kind as u32, v);
            assert_ne!(kind.name(), "<unknown>");
        }
    }

    #[test]
    fn out_of_range_values_have_no_kind() {
        assert!(ChunkKind::from_u32(0).is_none());
        assert!(ChunkKind::from_u32(FIRST_CHUNK_ID - 1).is_none());
        assert!(ChunkKind::from_u32(NUM_CHUNKS).is_none());
        assert_eq!(ChunkKind::name_for(NUM_CHUNKS), "<unknown>");
        assert_eq!(ChunkKind::name_for(17), "<unknown>");
    }

    #[test]
    fn kind_word_flag_does_not_collide_with_kinds() {
        assert_eq!(NUM_CHUNKS & CHUNK_CALLSTACK_FLAG, 0);
    }
}
