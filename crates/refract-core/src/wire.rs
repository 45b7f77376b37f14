//! Payload encode/decode helpers for compound state types.
//!
//! Capture-side writers and replay-side readers share these so the two
//! directions cannot drift apart.

use refract_protocol::{ClearValue, RenderArea, SubresourceRange, Viewport};
use refract_trace::{ChunkReader, ChunkWriter, TraceError, TraceResult};

pub(crate) fn write_render_area(w: &mut ChunkWriter, area: RenderArea) {
    w.write_i32("x", area.x);
    w.write_i32("y", area.y);
    w.write_u32("width", area.width);
    w.write_u32("height", area.height);
}

pub(crate) fn read_render_area(r: &mut ChunkReader) -> TraceResult<RenderArea> {
    Ok(RenderArea {
        x: r.read_i32("x")?,
        y: r.read_i32("y")?,
        width: r.read_u32("width")?,
        height: r.read_u32("height")?,
    })
}

pub(crate) fn write_viewports(w: &mut ChunkWriter, viewports: &[Viewport]) {
    w.write_u32("viewportCount", viewports.len() as u32);
    for vp in viewports {
        w.write_f32("x", vp.x);
        w.write_f32("y", vp.y);
        w.write_f32("width", vp.width);
        w.write_f32("height", vp.height);
        w.write_f32("minDepth", vp.min_depth);
        w.write_f32("maxDepth", vp.max_depth);
    }
}

pub(crate) fn read_viewports(r: &mut ChunkReader) -> TraceResult<Vec<Viewport>> {
    let count = r.read_u32("viewportCount")? as usize;
    if count > 64 {
        return Err(TraceError::Corrupt("viewport count out of bounds"));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(Viewport {
            x: r.read_f32("x")?,
            y: r.read_f32("y")?,
            width: r.read_f32("width")?,
            height: r.read_f32("height")?,
            min_depth: r.read_f32("minDepth")?,
            max_depth: r.read_f32("maxDepth")?,
        });
    }
    Ok(out)
}

pub(crate) fn write_scissors(w: &mut ChunkWriter, scissors: &[RenderArea]) {
    w.write_u32("scissorCount", scissors.len() as u32);
    for sc in scissors {
        write_render_area(w, *sc);
    }
}

pub(crate) fn read_scissors(r: &mut ChunkReader) -> TraceResult<Vec<RenderArea>> {
    let count = r.read_u32("scissorCount")? as usize;
    if count > 64 {
        return Err(TraceError::Corrupt("scissor count out of bounds"));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(read_render_area(r)?);
    }
    Ok(out)
}

pub(crate) fn write_clear_values(w: &mut ChunkWriter, values: &[ClearValue]) {
    w.write_u32("clearValueCount", values.len() as u32);
    for value in values {
        match value {
            ClearValue::Color(rgba) => {
                w.write_u32("clearKind", 0);
                for (name, c) in ["r", "g", "b", "a"].iter().zip(rgba) {
                    w.write_f32(name, *c);
                }
            }
            ClearValue::DepthStencil { depth, stencil } => {
                w.write_u32("clearKind", 1);
                w.write_f32("depth", *depth);
                w.write_u32("stencil", *stencil);
            }
        }
    }
}

pub(crate) fn read_clear_values(r: &mut ChunkReader) -> TraceResult<Vec<ClearValue>> {
    let count = r.read_u32("clearValueCount")? as usize;
    if count > 64 {
        return Err(TraceError::Corrupt("clear value count out of bounds"));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        match r.read_u32("clearKind")? {
            0 => {
                let mut rgba = [0.0f32; 4];
                for (name, slot) in ["r", "g", "b", "a"].iter().zip(rgba.iter_mut()) {
                    *slot = r.read_f32(name)?;
                }
                out.push(ClearValue::Color(rgba));
            }
            1 => out.push(ClearValue::DepthStencil {
                depth: r.read_f32("depth")?,
                stencil: r.read_u32("stencil")?,
            }),
            _ => return Err(TraceError::Corrupt("unknown clear value kind")),
        }
    }
    Ok(out)
}

pub(crate) fn write_subresource_range(w: &mut ChunkWriter, range: SubresourceRange) {
    w.write_u32("baseMip", range.base_mip);
    w.write_u32("mipCount", range.mip_count);
    w.write_u32("baseLayer", range.base_layer);
    w.write_u32("layerCount", range.layer_count);
}

pub(crate) fn read_subresource_range(r: &mut ChunkReader) -> TraceResult<SubresourceRange> {
    Ok(SubresourceRange {
        base_mip: r.read_u32("baseMip")?,
        mip_count: r.read_u32("mipCount")?,
        base_layer: r.read_u32("baseLayer")?,
        layer_count: r.read_u32("layerCount")?,
    })
}
