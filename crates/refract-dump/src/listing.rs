use refract_core::{ApiEvent, DrawcallTreeNode, ReplayError, WrappedDevice};
use refract_driver::NullDriver;
use refract_protocol::ChunkKind;
use refract_trace::ChunkReader;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct ChunkEntry {
    pub offset: u64,
    pub kind_raw: u32,
    pub name: &'static str,
    pub size_bytes: u64,
    pub callstack_depth: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct KindTotals {
    pub count: u32,
    pub total_bytes: u64,
}

pub struct LogListing {
    pub app_name: String,
    pub engine_name: String,
    pub api_version: u32,
    pub thumbnail_bytes: usize,
    pub log_bytes: u64,
    pub chunks: Vec<ChunkEntry>,
    pub totals: BTreeMap<u32, KindTotals>,
    /// Frame events in id order, built by replaying the log headlessly.
    pub events: Vec<ApiEvent>,
    /// The frame's drawcall tree, if the log holds a captured frame.
    pub drawcalls: Option<DrawcallTreeNode>,
}

impl LogListing {
    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let mut reader = ChunkReader::open(path)?;
        let header = reader.header().clone();

        let mut chunks = Vec::new();
        let mut totals: BTreeMap<u32, KindTotals> = BTreeMap::new();
        while !reader.at_end() {
            let offset = reader.offset();
            let kind_raw = reader.begin_chunk()?;
            reader.skip_current_chunk();
            reader.end_chunk(kind_raw)?;
            let callstack_depth = reader
                .take_last_callstack()
                .map(|stack| stack.len())
                .unwrap_or(0);
            let size_bytes = reader.offset() - offset;

            chunks.push(ChunkEntry {
                offset,
                kind_raw,
                name: ChunkKind::name_for(kind_raw),
                size_bytes,
                callstack_depth,
            });
            let entry = totals.entry(kind_raw).or_default();
            entry.count += 1;
            entry.total_bytes += size_bytes;
        }

        // Replay against the headless driver to bake the frame's event and
        // drawcall trees.
        let mut device = WrappedDevice::new_replay(NullDriver::new(), path)?;
        device.read_log_initialisation()?;
        let events = device.events().to_vec();
        let drawcalls = device.drawcall_tree().cloned();

        Ok(Self {
            app_name: header.params.app_name,
            engine_name: header.params.engine_name,
            api_version: header.params.api_version,
            thumbnail_bytes: header.thumbnail.map(|t| t.jpeg.len()).unwrap_or(0),
            log_bytes: reader.len(),
            chunks,
            totals,
            events,
            drawcalls,
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "app {:?} engine {:?} api 0x{:08x} ({} bytes, thumbnail {} bytes)",
            self.app_name, self.engine_name, self.api_version, self.log_bytes, self.thumbnail_bytes
        );
        for chunk in &self.chunks {
            let _ = write!(
                out,
                "{:>10}  {:<28} {:>8} bytes",
                format!("0x{:08x}", chunk.offset),
                chunk.name,
                chunk.size_bytes
            );
            if chunk.callstack_depth > 0 {
                let _ = write!(out, "  callstack[{}]", chunk.callstack_depth);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "---");
        for (kind, totals) in &self.totals {
            let _ = writeln!(
                out,
                "{:>6} x {:<28} {:>10} bytes",
                totals.count,
                ChunkKind::name_for(*kind),
                totals.total_bytes
            );
        }

        let _ = writeln!(out, "--- events ({}) ---", self.events.len());
        for event in &self.events {
            let _ = writeln!(out, "{:>5}  {}", event.event_id, event.description);
        }

        match &self.drawcalls {
            Some(tree) => {
                let _ = writeln!(out, "--- drawcalls ---");
                tree.walk(&mut |draw, depth| {
                    if depth == 0 {
                        return;
                    }
                    let _ = writeln!(
                        out,
                        "{:>5}  {}{}",
                        draw.drawcall_id,
                        "  ".repeat(depth - 1),
                        draw.name
                    );
                });
            }
            None => {
                let _ = writeln!(out, "--- no captured frame ---");
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let chunks: Vec<Value> = self
            .chunks
            .iter()
            .map(|c| {
                json!({
                    "offset": c.offset,
                    "kind": c.kind_raw,
                    "name": c.name,
                    "size_bytes": c.size_bytes,
                    "callstack_depth": c.callstack_depth,
                })
            })
            .collect();
        let totals: Vec<Value> = self
            .totals
            .iter()
            .map(|(kind, t)| {
                json!({
                    "kind": kind,
                    "name": ChunkKind::name_for(*kind),
                    "count": t.count,
                    "total_bytes": t.total_bytes,
                })
            })
            .collect();
        let events: Vec<Value> = self
            .events
            .iter()
            .map(|ev| {
                json!({
                    "event_id": ev.event_id,
                    "description": ev.description,
                    "chunk_kind": ev.chunk_kind,
                    "callstack_depth": ev.callstack.len(),
                })
            })
            .collect();
        let drawcalls = self
            .drawcalls
            .as_ref()
            .map(|tree| Value::Array(tree.children.iter().map(drawcall_json).collect()))
            .unwrap_or(Value::Null);
        serde_json::to_string_pretty(&json!({
            "app_name": self.app_name,
            "engine_name": self.engine_name,
            "api_version": self.api_version,
            "log_bytes": self.log_bytes,
            "thumbnail_bytes": self.thumbnail_bytes,
            "chunks": chunks,
            "totals": totals,
            "events": events,
            "drawcalls": drawcalls,
        }))
    }
}

fn drawcall_json(node: &DrawcallTreeNode) -> Value {
    json!({
        "drawcall_id": node.draw.drawcall_id,
        "event_id": node.draw.event_id,
        "name": node.draw.name,
        "flags": node.draw.flags.bits(),
        "children": node.children.iter().map(drawcall_json).collect::<Vec<Value>>(),
    })
}
