//! The frame-capture state machine.
//!
//! `start_frame_capture` and `end_frame_capture` bracket a capture frame.
//! Both hold the capture-transition lock across everything that must be
//! atomic with respect to other recording threads: snapshotting initial
//! contents, wiping stale capture chunks, serializing the image-layout
//! header and flipping the state. File assembly and the thumbnail readback
//! happen after the flip, when no other thread can contribute chunks.

use crate::resource::FrameRefKind;
use crate::{lock, thumbnail, CaptureResult, CaptureState, FrameRecord, WrappedDevice};
use refract_driver::Driver;
use refract_protocol::{set_current_api, ApiKind, ChunkKind, ResourceId};
use refract_trace::{ChunkWriter, LogHeader};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

impl<D: Driver> WrappedDevice<D> {
    /// Begin capturing the current frame. A no-op unless the device is
    /// idle-recording.
    pub fn start_frame_capture(&self) -> CaptureResult<()> {
        if self.state() != CaptureState::WritingIdle {
            return Ok(());
        }

        set_current_api(ApiKind::ExplicitGpu);
        self.app_controlled_capture.store(true, Ordering::Relaxed);

        let frame_number = self.frame_counter() + 1;
        lock(&self.frame_records).push(FrameRecord {
            frame_number,
            capture_time_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            ..FrameRecord::default()
        });

        {
            let mut res = lock(&self.resources);
            res.clear_referenced();
            res.mark_frame_referenced(self.instance_id, FrameRefKind::Read);
        }

        // Everything in here must be atomic with respect to other threads
        // deciding whether their chunks cross the capture boundary.
        {
            let _transition = lock(&self.cap_transition);

            {
                let mut driver = lock(&self.driver);
                let mut res = lock(&self.resources);
                res.prepare_initial_contents(&mut *driver);
            }

            self.attempt_capture();
            self.emit_coherent_map_diffs();
            self.begin_capture_frame();

            self.set_state(CaptureState::WritingCapframe);
        }

        info!(frame = self.frame_counter(), "starting capture");
        Ok(())
    }

    /// Wipe any chunks left over from an earlier aborted capture.
    fn attempt_capture(&self) {
        debug!("attempting capture");
        let mut res = lock(&self.resources);
        if let Some(frame) = res.record_mut(self.frame_capture_record) {
            if frame.has_chunks() {
                debug!(chunks = frame.chunk_count(), "wiping stale capture chunks");
                frame.wipe_chunks();
            }
        }
    }

    /// Serialize the current image-layout map into the capture-begin chunk
    /// and hold onto it: it must land right after the capture scope, before
    /// any command buffers.
    fn begin_capture_frame(&self) {
        let mut images: Vec<(ResourceId, crate::ImageLayouts)> = lock(&self.image_layouts)
            .iter()
            .map(|(id, layouts)| (*id, layouts.clone()))
            .collect();
        images.sort_by_key(|(id, _)| *id);

        let chunk = self.chunk_for_capture_begin(&images);
        *lock(&self.header_chunk) = Some(chunk);
    }

    fn chunk_for_capture_begin(
        &self,
        images: &[(ResourceId, crate::ImageLayouts)],
    ) -> refract_trace::Chunk {
        let writer = self.thread_writers.get();
        let mut w = lock(&writer);
        w.begin_chunk(ChunkKind::CaptureBegin);
        w.write_u32("imageCount", images.len() as u32);
        for (id, layouts) in images {
            w.write_id("image", *id);
            w.write_u32("rangeCount", layouts.len() as u32);
            for (range, layout) in layouts {
                crate::wire::write_subresource_range(&mut w, *range);
                w.write_u32("layout", *layout as u32);
            }
        }
        w.end_chunk(ChunkKind::CaptureBegin).expect("top-level chunk")
    }

    /// Finish the active capture and write the log file. Returns `Ok(false)`
    /// if the given window has no known swapchain.
    pub fn end_frame_capture(&self, window: Option<u64>) -> CaptureResult<bool> {
        if self.state() != CaptureState::WritingCapframe {
            return Err(crate::CaptureError::InvalidState(
                "end_frame_capture while no capture is active",
            ));
        }

        let mut backbuffer = ResourceId::NULL;
        let mut swapchain = ResourceId::NULL;
        if let Some(window) = window {
            match lock(&self.swap_lookup).get(&window).copied() {
                Some(swap) => swapchain = swap,
                None => {
                    error!(window, "window has no known swapchain");
                    return Ok(false);
                }
            }
            let res = lock(&self.resources);
            if let Some(info) = res.record(swapchain).and_then(|r| r.swap_info.as_ref()) {
                backbuffer = info
                    .images
                    .get(info.last_present)
                    .copied()
                    .unwrap_or(ResourceId::NULL);
            }
        }
        if !swapchain.is_null() {
            lock(&self.resources).mark_frame_referenced(swapchain, FrameRefKind::Read);
        }

        info!(frame = self.frame_counter(), "finished capture");

        // Transition back to idle atomically.
        {
            let _transition = lock(&self.cap_transition);

            self.emit_coherent_map_diffs();

            let footer = {
                let writer = self.thread_writers.get();
                let mut w = lock(&writer);
                w.begin_chunk(ChunkKind::CaptureEnd);
                w.write_id("backbuffer", backbuffer);
                if let Some(stack) = refract_protocol::collect_callstack() {
                    w.attach_callstack(stack);
                }
                w.end_chunk(ChunkKind::CaptureEnd).expect("top-level chunk")
            };
            {
                let mut res = lock(&self.resources);
                if let Some(frame) = res.record_mut(self.frame_capture_record) {
                    frame.add_chunk(footer);
                }
            }

            self.set_state(CaptureState::WritingIdle);

            if let Err(err) = lock(&self.driver).device_wait_idle() {
                error!(error = %err, "device wait failed at capture end");
            }

            // release coherent-map shadows
            let maps = std::mem::take(&mut *lock(&self.coherent_maps));
            let mut res = lock(&self.resources);
            for id in maps {
                if let Some(map) = res.record_mut(id).and_then(|r| r.mem_map.as_mut()) {
                    map.ref_data = None;
                }
            }
        }

        let thumbnail = self.grab_thumbnail(backbuffer);

        // Assemble the file: device init, referenced creations, initial
        // contents, capture scope, layout header, then the merged frame
        // stream in recording-ordinal order.
        let mut file = ChunkWriter::new(false);

        let device_init = {
            let writer = self.thread_writers.get();
            let mut w = lock(&writer);
            w.begin_chunk(ChunkKind::DeviceInit);
            w.write_str("appName", &self.app_params.app_name);
            w.write_str("engineName", &self.app_params.engine_name);
            w.write_u32("appVersion", self.app_params.app_version);
            w.write_u32("engineVersion", self.app_params.engine_version);
            w.write_u32("apiVersion", self.app_params.api_version);
            w.write_id("instance", self.instance_id);
            w.end_chunk(ChunkKind::DeviceInit).expect("top-level chunk")
        };
        file.insert(device_init);

        debug!("inserting resource serialisers");
        let initial_ids;
        {
            let res = lock(&self.resources);
            res.insert_referenced_chunks(&mut file);
            res.insert_initial_contents_chunks(&mut file);
            initial_ids = res.needed_initial_ids();
        }

        debug!("creating capture scope");
        let frame_number = lock(&self.frame_records)
            .last()
            .map(|f| f.frame_number)
            .unwrap_or(0);
        let scope = {
            let writer = self.thread_writers.get();
            let mut w = lock(&writer);
            w.begin_chunk(ChunkKind::CaptureScope);
            w.write_u32("frameNumber", frame_number);
            w.write_id_array("initialContents", &initial_ids);
            w.end_chunk(ChunkKind::CaptureScope).expect("top-level chunk")
        };
        file.insert(scope);

        if let Some(header) = lock(&self.header_chunk).take() {
            file.insert(header);
        }

        // No lock needed on the record list here: we are no longer in the
        // capture frame (the transition is thread-protected), so nothing
        // new can be pushed.
        {
            let mut merged = BTreeMap::new();
            let res = lock(&self.resources);
            let records = lock(&self.cmd_buffer_records);
            debug!(
                cmd_buffers = records.len(),
                "flushing command buffer records to file"
            );
            for &cmd in records.iter() {
                if let Some(record) = res.record(cmd) {
                    record.insert_into(&mut merged);
                }
            }
            if let Some(frame) = res.record(self.frame_capture_record) {
                frame.insert_into(&mut merged);
            }
            drop(res);
            drop(records);
            debug!(chunks = merged.len(), "flushing merged chunks to file");
            for (_, chunk) in merged {
                file.insert(chunk);
            }
        }

        let file_name = format!(
            "{}_frame{}.rfrc",
            sanitize_name(&self.app_params.app_name),
            frame_number
        );
        let path = self.capture_dir.join(file_name);
        let header = LogHeader {
            params: self.app_params.clone(),
            thumbnail,
        };
        let written = file.flush_to_disk(&path, &header)?;
        debug!(bytes = written, path = %path.display(), "capture written");
        *lock(&self.last_capture_path) = Some(path);

        // Drop the recorded command-buffer chunks now the file owns them,
        // and reset reference state for the next capture.
        {
            let mut res = lock(&self.resources);
            let cmds = std::mem::take(&mut *lock(&self.cmd_buffer_records));
            for cmd in cmds {
                if let Some(record) = res.record_mut(cmd) {
                    record.wipe_chunks();
                    record.frame_refs.clear();
                }
            }
            if let Some(frame) = res.record_mut(self.frame_capture_record) {
                frame.wipe_chunks();
            }
            res.mark_unwritten_resources();
            res.clear_referenced();
            res.free_initial_contents();
            res.flush_pending_dirty();
        }

        Ok(true)
    }

    fn grab_thumbnail(&self, backbuffer: ResourceId) -> Option<refract_trace::Thumbnail> {
        if backbuffer.is_null() {
            return None;
        }
        let live = self.live(backbuffer).ok()?;
        {
            let mut driver = lock(&self.driver);
            if let Err(err) = driver.device_wait_idle() {
                error!(error = %err, "device wait failed before thumbnail readback");
            }
        }
        let readback = match lock(&self.driver).read_image(live) {
            Ok(rb) => rb,
            Err(err) => {
                error!(error = %err, "backbuffer readback failed, no thumbnail");
                return None;
            }
        };

        let (tw, th) = thumbnail::thumb_dimensions(readback.width, readback.height)?;
        let rgb_len = 3 * tw as usize * th as usize;
        self.thread_scratch.with(rgb_len, |scratch| {
            thumbnail::point_sample_rgb(&readback, &mut scratch[..rgb_len], tw, th);
            thumbnail::encode_jpeg(&scratch[..rgb_len], tw, th)
        })
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "capture".to_owned()
    } else {
        cleaned
    }
}
