//! End-to-end capture → log → replay scenarios over the headless driver.

use refract_core::{CaptureError, ReplayMode, WrappedDevice};
use refract_driver::{
    BufferDesc, BufferUsage, CmdBufferOp, DescriptorBinding, DescriptorKind,
    DescriptorSetLayoutDesc, NullDriver, RenderPassDesc,
};
use refract_protocol::{
    AttachmentDesc, ChunkKind, ClearValue, DrawFlags, ImageFormat, LoadOp, PipelineBindPoint,
    RenderArea, ResourceId, StoreOp, Topology,
};
use refract_trace::AppInitParams;
use std::path::PathBuf;
use std::sync::Arc;

const WINDOW: u64 = 0xbeef;

fn app_params() -> AppInitParams {
    AppInitParams {
        app_name: "triangle".into(),
        engine_name: "demo-engine".into(),
        app_version: 1,
        engine_version: 2,
        api_version: 0x0040_0000,
        layers: vec![],
        extensions: vec!["swapchain".into()],
        instance_id: ResourceId::NULL,
    }
}

struct Scene {
    dev: WrappedDevice<NullDriver>,
    render_pass: ResourceId,
    framebuffer: ResourceId,
    pipeline: ResourceId,
    layout: ResourceId,
    set: ResourceId,
    vbuf: ResourceId,
}

fn build_scene(dir: &std::path::Path) -> anyhow::Result<Scene> {
    let dev = WrappedDevice::new_capture(NullDriver::new(), app_params(), dir.to_path_buf());

    let swapchain = dev.create_swapchain(
        &refract_driver::SwapchainDesc {
            format: ImageFormat::Rgba8Unorm,
            width: 64,
            height: 64,
            image_count: 2,
        },
        WINDOW,
    )?;
    let images = dev.get_swapchain_images(swapchain)?;

    let vs = dev.create_shader_module(b"vertex-shader")?;
    let fs = dev.create_shader_module(b"fragment-shader")?;

    let render_pass = dev.create_render_pass(&RenderPassDesc {
        attachments: vec![AttachmentDesc {
            format: ImageFormat::Rgba8Unorm,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
        }],
    })?;
    let framebuffer = dev.create_framebuffer(render_pass, &[images[0]], 64, 64)?;

    let set_layout = dev.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
        bindings: vec![DescriptorBinding {
            binding: 0,
            kind: DescriptorKind::UniformBuffer,
            count: 1,
        }],
    })?;
    let layout = dev.create_pipeline_layout(&[set_layout])?;
    let set = dev.alloc_descriptor_set(set_layout)?;

    let ubo = dev.create_buffer(&BufferDesc {
        size: 64,
        usage: BufferUsage::UNIFORM,
        host_coherent: false,
    })?;
    dev.update_descriptor_set(set, 0, ubo)?;

    let pipeline =
        dev.create_graphics_pipeline(layout, render_pass, Topology::TriangleList, 0, vs, fs)?;

    let vbuf = dev.create_buffer(&BufferDesc {
        size: 72,
        usage: BufferUsage::VERTEX,
        host_coherent: false,
    })?;

    Ok(Scene {
        dev,
        render_pass,
        framebuffer,
        pipeline,
        layout,
        set,
        vbuf,
    })
}

fn record_triangle_cmd(scene: &Scene, dev: &WrappedDevice<NullDriver>) -> anyhow::Result<ResourceId> {
    let cmd = dev.create_command_buffer()?;
    dev.begin_command_buffer(cmd)?;
    dev.cmd_begin_render_pass(
        cmd,
        scene.render_pass,
        scene.framebuffer,
        RenderArea {
            x: 0,
            y: 0,
            width: 64,
            height: 64,
        },
        &[ClearValue::Color([0.2, 0.2, 0.2, 1.0])],
    )?;
    dev.cmd_bind_pipeline(cmd, PipelineBindPoint::Graphics, scene.pipeline)?;
    dev.cmd_bind_descriptor_set(cmd, PipelineBindPoint::Graphics, scene.layout, 0, scene.set, &[])?;
    dev.cmd_bind_vertex_buffers(cmd, 0, &[scene.vbuf], &[0])?;
    dev.cmd_draw(cmd, 3, 1, 0, 0)?;
    dev.cmd_end_render_pass(cmd)?;
    dev.end_command_buffer(cmd)?;
    Ok(cmd)
}

/// Capture one triangle frame and return the log path.
fn capture_triangle(dir: &std::path::Path) -> anyhow::Result<PathBuf> {
    let scene = build_scene(dir)?;
    let dev = &scene.dev;

    dev.start_frame_capture()?;
    let cmd = record_triangle_cmd(&scene, dev)?;
    dev.queue_submit(&[cmd])?;
    dev.present(WINDOW, 0)?;
    assert!(dev.end_frame_capture(Some(WINDOW))?);

    Ok(dev.last_capture_path().expect("capture written"))
}

fn replayed(path: &std::path::Path) -> anyhow::Result<WrappedDevice<NullDriver>> {
    let mut rdev = WrappedDevice::new_replay(NullDriver::new(), path)?;
    rdev.read_log_initialisation()?;
    Ok(rdev)
}

fn submitted_draws(driver: &NullDriver) -> usize {
    driver
        .submissions
        .iter()
        .flat_map(|batch| batch.ops.iter())
        .flat_map(|ops| ops.iter())
        .filter(|op| op.is_draw())
        .count()
}

#[test]
fn triangle_round_trips_through_a_log() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;

    let mut rdev = replayed(&path)?;

    // the frame walk issued exactly one draw of 3 vertices
    let driver = rdev.driver_mut();
    assert_eq!(submitted_draws(driver), 1);
    let draw = driver
        .submissions
        .iter()
        .flat_map(|b| b.ops.iter().flatten())
        .find(|op| op.is_draw())
        .unwrap();
    assert_eq!(
        *draw,
        CmdBufferOp::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    );

    // event descriptions cover the recorded sequence in order
    let kinds: Vec<u32> = rdev.events().iter().map(|ev| ev.chunk_kind).collect();
    let expect = [
        ChunkKind::QueueSubmit,
        ChunkKind::BeginRenderPass,
        ChunkKind::BindPipeline,
        ChunkKind::BindDescriptorSets,
        ChunkKind::BindVertexBuffers,
        ChunkKind::Draw,
        ChunkKind::EndRenderPass,
        ChunkKind::CaptureEnd,
    ];
    assert_eq!(kinds, expect.map(|k| k as u32));
    Ok(())
}

#[test]
fn event_ids_are_dense_from_one() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let rdev = replayed(&path)?;

    let ids: Vec<u32> = rdev.events().iter().map(|ev| ev.event_id).collect();
    let expected: Vec<u32> = (1..=ids.len() as u32).collect();
    assert_eq!(ids, expected);
    Ok(())
}

#[test]
fn drawcall_tree_is_well_formed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let rdev = replayed(&path)?;

    let tree = rdev.drawcall_tree().expect("tree baked");
    // one command-buffer subtree and the present
    assert_eq!(tree.children.len(), 2);
    let cmd_node = &tree.children[0];
    assert!(cmd_node.draw.flags.contains(DrawFlags::CMD_BUFFER));
    let draw_node = cmd_node
        .children
        .iter()
        .find(|c| c.draw.flags.contains(DrawFlags::DRAWCALL))
        .expect("draw in the command buffer subtree");
    assert_eq!(draw_node.draw.topology, Topology::TriangleList);
    assert!(tree.children[1].draw.flags.contains(DrawFlags::PRESENT));

    // drawcall ids are dense from 1 in depth-first order
    let mut draw_ids = Vec::new();
    tree.walk(&mut |draw, depth| {
        if depth > 0 {
            draw_ids.push(draw.drawcall_id);
        }
    });
    let expected: Vec<u32> = (1..=draw_ids.len() as u32).collect();
    assert_eq!(draw_ids, expected);
    Ok(())
}

#[test]
fn without_draw_stops_short_of_the_draw() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let mut rdev = replayed(&path)?;

    let draw_eid = rdev
        .events()
        .iter()
        .find(|ev| ev.chunk_kind == ChunkKind::Draw as u32)
        .map(|ev| ev.event_id)
        .expect("draw event");

    let before = submitted_draws(rdev.driver_mut());
    rdev.replay_log(0, 0, draw_eid, ReplayMode::WithoutDraw)?;
    let after = submitted_draws(rdev.driver_mut());
    assert_eq!(before, after, "the draw must not be re-issued");

    // but the render pass setup was replayed
    let last = rdev.driver_mut().submissions.last().unwrap();
    assert!(last
        .ops
        .iter()
        .flatten()
        .any(|op| matches!(op, CmdBufferOp::BeginRenderPass { .. })));
    Ok(())
}

#[test]
fn only_draw_issues_one_buffer_ending_in_the_draw() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let mut rdev = replayed(&path)?;

    let draw_eid = rdev
        .events()
        .iter()
        .find(|ev| ev.chunk_kind == ChunkKind::Draw as u32)
        .map(|ev| ev.event_id)
        .expect("draw event");

    // replay up to the draw, then the draw alone
    rdev.replay_log(0, 0, draw_eid, ReplayMode::WithoutDraw)?;
    let submissions_before = rdev.driver_mut().submissions.len();
    rdev.replay_log(0, 0, draw_eid, ReplayMode::OnlyDraw)?;

    let driver = rdev.driver_mut();
    assert_eq!(
        driver.submissions.len(),
        submissions_before + 1,
        "only-draw submits exactly one batch"
    );
    let batch = driver.submissions.last().unwrap();
    assert_eq!(batch.cmds.len(), 1);
    let ops = &batch.ops[0];

    // the pass restarts with no clears (load variant), state is rebuilt,
    // and the last action is the target draw
    let begin = ops
        .iter()
        .find(|op| matches!(op, CmdBufferOp::BeginRenderPass { .. }))
        .expect("load render pass begin");
    if let CmdBufferOp::BeginRenderPass { clear_values, .. } = begin {
        assert!(clear_values.is_empty(), "no clears on a partial replay");
    }
    assert!(ops
        .iter()
        .any(|op| matches!(op, CmdBufferOp::BindPipeline { .. })));
    let last_action = ops.iter().rev().find(|op| op.is_action()).unwrap();
    assert!(last_action.is_draw());
    Ok(())
}

#[test]
fn full_replay_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let mut rdev = replayed(&path)?;

    let last_eid = rdev.events().last().unwrap().event_id;

    let base = rdev.driver_mut().submissions.len();
    rdev.replay_log(0, 0, last_eid, ReplayMode::Full)?;
    let first: Vec<_> = rdev.driver_mut().submissions[base..].to_vec();

    let base2 = rdev.driver_mut().submissions.len();
    rdev.replay_log(0, 0, last_eid, ReplayMode::Full)?;
    let second: Vec<_> = rdev.driver_mut().submissions[base2..].to_vec();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.ops, b.ops);
    }
    Ok(())
}

#[test]
fn image_layouts_restore_to_their_recorded_state() -> anyhow::Result<()> {
    use refract_protocol::{ImageLayout, SubresourceRange};

    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let rdev = replayed(&path)?;

    // the backbuffer was last recorded in the Present layout; after the
    // capture-begin header replays, the tracked layout matches it
    let tree = rdev.drawcall_tree().unwrap();
    let present = tree.children.last().unwrap();
    assert!(present.draw.flags.contains(DrawFlags::PRESENT));
    let backbuffer = present.draw.copy_destination;
    assert!(!backbuffer.is_null());
    let layouts = rdev.image_layouts_of(backbuffer).expect("layout tracked");
    assert_eq!(layouts, vec![(SubresourceRange::ALL, ImageLayout::Present)]);
    Ok(())
}

#[test]
fn two_threads_record_independent_command_buffers() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let scene = build_scene(dir.path())?;
    let dev = Arc::new(scene.dev);

    dev.start_frame_capture()?;

    let mut cmds = Vec::new();
    let mut handles = Vec::new();
    for label in ["left", "right"] {
        let dev = Arc::clone(&dev);
        let render_pass = scene.render_pass;
        let framebuffer = scene.framebuffer;
        let pipeline = scene.pipeline;
        handles.push(std::thread::spawn(move || -> anyhow::Result<ResourceId> {
            let cmd = dev.create_command_buffer()?;
            dev.begin_command_buffer(cmd)?;
            dev.cmd_marker_begin(cmd, label)?;
            dev.cmd_begin_render_pass(
                cmd,
                render_pass,
                framebuffer,
                RenderArea {
                    x: 0,
                    y: 0,
                    width: 64,
                    height: 64,
                },
                &[ClearValue::Color([0.0, 0.0, 0.0, 1.0])],
            )?;
            dev.cmd_bind_pipeline(cmd, PipelineBindPoint::Graphics, pipeline)?;
            dev.cmd_draw(cmd, 3, 1, 0, 0)?;
            dev.cmd_end_render_pass(cmd)?;
            dev.cmd_marker_end(cmd)?;
            dev.end_command_buffer(cmd)?;
            Ok(cmd)
        }));
    }
    for handle in handles {
        cmds.push(handle.join().expect("recording thread panicked")?);
    }
    cmds.sort();

    // both buffers in a single submit
    dev.queue_submit(&cmds)?;
    dev.present(WINDOW, 0)?;
    dev.end_frame_capture(Some(WINDOW))?;
    let path = dev.last_capture_path().unwrap();

    let rdev = replayed(&path)?;
    let tree = rdev.drawcall_tree().unwrap();
    // two sibling command-buffer subtrees in submit order, then the present
    assert_eq!(tree.children.len(), 3);
    for (node, cmd) in tree.children[..2].iter().zip(&cmds) {
        assert!(node.draw.flags.contains(DrawFlags::CMD_BUFFER));
        assert_eq!(node.draw.name, format!("CommandBuffer({cmd})"));
        // each contains a marker subtree holding its draw
        let marker = node
            .children
            .iter()
            .find(|c| c.draw.flags.contains(DrawFlags::PUSH_MARKER))
            .expect("marker subtree");
        assert!(marker
            .children
            .iter()
            .any(|c| c.draw.flags.contains(DrawFlags::DRAWCALL)));
    }
    // and the events stay dense
    let ids: Vec<u32> = rdev.events().iter().map(|ev| ev.event_id).collect();
    let expected: Vec<u32> = (1..=ids.len() as u32).collect();
    assert_eq!(ids, expected);
    Ok(())
}

#[test]
fn callstacks_attach_to_every_event_when_enabled() -> anyhow::Result<()> {
    fn collector() -> Vec<u64> {
        vec![0x1111, 0x2222, 0x3333]
    }

    refract_protocol::set_callstack_collector(Some(collector));
    refract_protocol::set_capture_options(refract_protocol::CaptureOptions {
        capture_callstacks: true,
    });

    let result = (|| -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = capture_triangle(dir.path())?;
        let rdev = replayed(&path)?;
        assert!(!rdev.events().is_empty());
        for event in rdev.events() {
            assert!(
                !event.callstack.is_empty(),
                "event {} ({}) lost its callstack",
                event.event_id,
                event.description
            );
        }
        Ok(())
    })();

    refract_protocol::set_capture_options(refract_protocol::CaptureOptions::default());
    refract_protocol::set_callstack_collector(None);
    result
}

#[test]
fn version_mismatch_fails_the_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;

    let mut bytes = std::fs::read(&path)?;
    let bogus = refract_protocol::SERIALISE_VERSION + 9;
    bytes[8..12].copy_from_slice(&bogus.to_le_bytes());
    let patched = dir.path().join("patched.rfrc");
    std::fs::write(&patched, bytes)?;

    match WrappedDevice::new_replay(NullDriver::new(), &patched) {
        Err(refract_core::ReplayError::Trace(
            refract_trace::TraceError::IncompatibleVersion { got, .. },
        )) => assert_eq!(got, bogus),
        other => panic!("expected IncompatibleVersion, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[test]
fn replay_ids_never_collide_with_recorded_ids() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let rdev = replayed(&path)?;

    // anything allocated after the replay flip sits strictly above every id
    // read out of the log; the generator is monotonic and never reuses
    let tree = rdev.drawcall_tree().unwrap();
    let backbuffer = tree.children.last().unwrap().draw.copy_destination;
    let fresh = refract_protocol::ResourceIdGen::next();
    assert!(refract_protocol::ResourceIdGen::is_replay_id(fresh));
    assert!(fresh > backbuffer);
    Ok(())
}

#[test]
fn ending_a_capture_while_idle_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let scene = build_scene(dir.path())?;
    match scene.dev.end_frame_capture(Some(WINDOW)) {
        Err(CaptureError::InvalidState(_)) => Ok(()),
        other => panic!("expected InvalidState, got {other:?}"),
    }
}

#[test]
fn dirty_buffers_round_trip_their_initial_contents() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let scene = build_scene(dir.path())?;
    let dev = &scene.dev;

    // a host-coherent buffer written through a mapping before capture
    let src = dev.create_buffer(&BufferDesc {
        size: 16,
        usage: BufferUsage::TRANSFER_SRC,
        host_coherent: true,
    })?;
    let payload: Vec<u8> = (0u8..16).collect();
    dev.map_buffer(src)?;
    dev.unmap_buffer(src, &payload)?;
    let dst = dev.create_buffer(&BufferDesc {
        size: 16,
        usage: BufferUsage::TRANSFER_DST,
        host_coherent: false,
    })?;

    // the frame reads it, so its pre-frame contents must be in the log
    dev.start_frame_capture()?;
    let cmd = dev.create_command_buffer()?;
    dev.begin_command_buffer(cmd)?;
    dev.cmd_copy_buffer(cmd, src, dst, 0, 0, 16)?;
    dev.end_command_buffer(cmd)?;
    dev.queue_submit(&[cmd])?;
    dev.present(WINDOW, 0)?;
    dev.end_frame_capture(Some(WINDOW))?;
    let path = dev.last_capture_path().unwrap();

    let mut rdev = replayed(&path)?;
    let src_live = rdev.live_handle_of(src).expect("source recreated");
    let dst_live = rdev.live_handle_of(dst).expect("dest recreated");
    let driver = rdev.driver_mut();
    assert_eq!(driver.buffer_contents(src_live).unwrap(), payload.as_slice());
    assert_eq!(driver.buffer_contents(dst_live).unwrap(), payload.as_slice());
    Ok(())
}

#[test]
fn capture_embeds_a_thumbnail() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = capture_triangle(dir.path())?;
    let reader = refract_trace::ChunkReader::open(&path)?;
    let thumb = reader.header().thumbnail.as_ref().expect("thumbnail");
    assert_eq!(thumb.width, 64);
    assert_eq!(thumb.height, 64);
    assert!(!thumb.jpeg.is_empty());
    Ok(())
}
