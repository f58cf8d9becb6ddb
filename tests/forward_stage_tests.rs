//! Forward Stage Tests
//!
//! Tests for:
//! - Routing of passes into primary queues vs. the instanced queue
//! - Phase and blend filtering, queue sort order
//! - Recording order inside the render pass
//! - Empty frames, blits and overlays
//! - Reset gate, lifecycle and configuration loading
//! - Deterministic re-classification and multiple cameras per frame

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;

use common::{Fixture, draw_counts, position_of, shared_models};
use forward_stage::gfx::{
    BlitTexture, BufferUsage, Command, CommandBuffer, CommandCapture, Filter, GLOBAL_SET, Rect,
    RenderDevice, RenderPassId,
};
use forward_stage::pipeline::{
    ForwardPipeline, ForwardStage, FrameContext, OverlayKind, OverlayRenderer, PipelineUbo, Route,
};
use forward_stage::scene::{
    Aabb, BatchingScheme, BlendMode, Camera, Light, Model, PhaseRegistry, PipelineSceneData,
    ShadowType, SubModel,
};
use forward_stage::settings::{RenderQueueDesc, RenderQueueSortMode, StageSettings};
use forward_stage::StageError;

const BLIT_SIZE: u32 = 64;

fn render_one(
    fx: &Fixture,
    pipeline: &mut ForwardPipeline,
    camera: &Camera,
) -> anyhow::Result<CommandCapture> {
    let mut cmd = CommandCapture::new();
    pipeline.render(&fx.device, &mut cmd, &[camera])?;
    Ok(cmd)
}

struct RecordingOverlay {
    kind: OverlayKind,
    enabled: bool,
    calls: Arc<AtomicU32>,
}

impl OverlayRenderer for RecordingOverlay {
    fn kind(&self) -> OverlayKind {
        self.kind
    }

    fn is_enabled_for(&self, _camera: &Camera) -> bool {
        self.enabled
    }

    fn render(
        &mut self,
        _device: &dyn RenderDevice,
        _scene: &PipelineSceneData,
        _camera: &Camera,
        _render_pass: RenderPassId,
        _cmd: &mut dyn CommandBuffer,
    ) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn single_opaque_object_draws_once() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.opaque_pass();
    pipeline
        .scene_mut()
        .add_model(fx.model_at(Vec3::ZERO, &[&pass]));

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;

    let stage = pipeline.stage();
    assert_eq!(stage.render_queues()[0].len(), 1);
    assert_eq!(stage.render_queues()[1].len(), 0);
    assert!(stage.instanced_queue().is_empty());
    assert_eq!(draw_counts(cmd.commands()), vec![1]);
    assert_eq!(cmd.commands_in_group("Opaque Queue").len(), 5);
    Ok(())
}

#[test]
fn shared_instancing_pass_merges_into_one_draw() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.instancing_pass();
    let sub_model = fx.sub_model(&[&pass]);
    for model in shared_models(&sub_model, 10) {
        pipeline.scene_mut().add_model(model);
    }

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;

    let stage = pipeline.stage();
    assert_eq!(stage.instanced_queue().registered(), &[pass.id()]);
    let buffer = stage.instanced_queue().buffer(pass.id()).unwrap();
    assert_eq!(buffer.instance_count(), 10);
    assert_eq!(buffer.items().count(), 1);
    assert!(stage.render_queues().iter().all(|q| q.is_empty()));
    assert_eq!(draw_counts(cmd.commands()), vec![10]);

    let instanced = cmd.commands_in_group("Instanced Queue");
    assert!(instanced.iter().any(|c| matches!(
        c,
        Command::BindInputAssembler { instance_buffer: Some(_), .. }
    )));
    Ok(())
}

#[test]
fn foreign_phase_is_only_reached_through_planar_shadows() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let shadow_phase_pass = fx.pass("planarShadow", BlendMode::Opaque, BatchingScheme::None);

    let mut model = fx.model_at(Vec3::ZERO, &[&shadow_phase_pass]);
    model.cast_shadow = true;
    model.sub_models[0].planar_shader = Some(fx.shader);

    let scene = pipeline.scene_mut();
    scene.add_model(model);
    scene.main_light = Some(Light::new_directional(Vec3::new(0.2, -1.0, 0.1), Vec3::ONE, 1.0));
    scene.shadows.enabled = true;
    scene.shadows.kind = ShadowType::Planar;
    scene.shadows.material_pass = Some(fx.pass(
        "planarShadow",
        BlendMode::Transparent,
        BatchingScheme::None,
    ));

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;

    let stage = pipeline.stage();
    assert!(stage.render_queues().iter().all(|q| q.is_empty()));
    assert!(stage.instanced_queue().is_empty());
    assert_eq!(stage.planar_shadow_queue().unwrap().caster_count(), 1);
    assert_eq!(draw_counts(cmd.commands_in_group("Planar Shadow Queue")), vec![1]);
    assert_eq!(cmd.draw_count(), 1);
    Ok(())
}

#[test]
fn empty_frame_still_opens_and_closes_the_pass() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let calls = Arc::new(AtomicU32::new(0));
    pipeline.stage_mut().add_overlay(Box::new(RecordingOverlay {
        kind: OverlayKind::Ui,
        enabled: true,
        calls: calls.clone(),
    }));

    let mut camera = fx.camera();
    let blit = BlitTexture {
        src: fx.device.create_texture(BLIT_SIZE, BLIT_SIZE),
        dst: fx.device.create_texture(BLIT_SIZE, BLIT_SIZE),
        src_region: Rect { x: 0, y: 0, width: BLIT_SIZE, height: BLIT_SIZE },
        dst_region: Rect { x: 0, y: 0, width: BLIT_SIZE, height: BLIT_SIZE },
        filter: Filter::Linear,
    };
    camera.blit_textures.push(blit.clone());

    let cmd = render_one(&fx, &mut pipeline, &camera)?;
    let commands = cmd.commands();

    assert_eq!(cmd.draw_count(), 0);
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(cmd.debug_groups(), vec!["Camera", "UI"]);

    let begin = position_of(commands, |c| matches!(c, Command::BeginRenderPass(_))).unwrap();
    let blit_at = position_of(commands, |c| c == &Command::BlitTexture(blit.clone())).unwrap();
    let end = position_of(commands, |c| matches!(c, Command::EndRenderPass)).unwrap();
    assert!(begin < blit_at && blit_at < end);
    Ok(())
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn route_follows_batching_scheme() {
    let fx = Fixture::new();
    assert_eq!(Route::of(&fx.instancing_pass()), Route::Instanced);
    assert_eq!(Route::of(&fx.opaque_pass()), Route::Queues);
}

#[test]
fn a_pass_never_lands_in_both_destinations() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let instanced = fx.instancing_pass();
    let plain = fx.opaque_pass();
    let blended = fx.transparent_pass();
    pipeline
        .scene_mut()
        .add_model(fx.model_at(Vec3::ZERO, &[&instanced, &plain, &blended]));

    render_one(&fx, &mut pipeline, &fx.camera())?;

    let stage = pipeline.stage();
    let scene = pipeline.scene();
    for queue in stage.render_queues() {
        for unit in queue.units() {
            let (_, pass) = scene.render_objects[unit.object_index as usize]
                .pass(unit.sub_model_index as usize, unit.pass_index as usize)
                .unwrap();
            assert_eq!(pass.batching, BatchingScheme::None);
            assert_eq!(pass.is_transparent(), queue.is_transparent());
        }
    }
    assert_eq!(stage.render_queues()[0].len(), 1);
    assert_eq!(stage.render_queues()[1].len(), 1);
    assert_eq!(stage.instanced_queue().registered(), &[instanced.id()]);
    Ok(())
}

#[test]
fn queues_sort_by_depth_with_stable_ties() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let opaque = fx.opaque_pass();
    let blended = fx.transparent_pass();
    // Camera sits at z = 10, so depth = 10 - z.
    for z in [0.0, 5.0, -5.0, 5.0] {
        pipeline
            .scene_mut()
            .add_model(fx.model_at(Vec3::new(0.0, 0.0, z), &[&opaque, &blended]));
    }

    render_one(&fx, &mut pipeline, &fx.camera())?;

    let stage = pipeline.stage();
    let opaque_order: Vec<u32> = stage.render_queues()[0]
        .units()
        .iter()
        .map(|u| u.object_index)
        .collect();
    let blended_order: Vec<u32> = stage.render_queues()[1]
        .units()
        .iter()
        .map(|u| u.object_index)
        .collect();
    assert_eq!(opaque_order, vec![1, 3, 0, 2]);
    assert_eq!(blended_order, vec![2, 0, 1, 3]);
    Ok(())
}

// ============================================================================
// Recording
// ============================================================================

#[test]
fn recording_follows_the_fixed_order() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;

    let opaque = fx.opaque_pass();
    let blended = fx.transparent_pass();
    let instanced = fx.instancing_pass();
    let additive = fx.pass("forward-add", BlendMode::Transparent, BatchingScheme::None);

    let mut caster = fx.model_at(Vec3::ZERO, &[&opaque, &additive]);
    caster.cast_shadow = true;
    caster.sub_models[0].planar_shader = Some(fx.shader);

    let scene = pipeline.scene_mut();
    scene.add_model(caster);
    scene.add_model(fx.model_at(Vec3::new(1.0, 0.0, 0.0), &[&blended]));
    scene.add_model(fx.model_at(Vec3::new(-1.0, 0.0, 0.0), &[&instanced]));
    scene
        .lights
        .push(Light::new_sphere(Vec3::new(0.0, 0.0, 1.0), 5.0, Vec3::ONE, 2.0));
    scene.main_light = Some(Light::new_directional(Vec3::NEG_Y, Vec3::ONE, 1.0));
    scene.shadows.enabled = true;
    scene.shadows.material_pass = Some(fx.pass(
        "planarShadow",
        BlendMode::Transparent,
        BatchingScheme::None,
    ));

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;

    assert_eq!(
        cmd.debug_groups(),
        vec![
            "Camera",
            "Opaque Queue",
            "Instanced Queue",
            "Additive Light Queue",
            "Planar Shadow Queue",
            "Transparent Queue",
        ]
    );
    for group in [
        "Opaque Queue",
        "Instanced Queue",
        "Additive Light Queue",
        "Planar Shadow Queue",
        "Transparent Queue",
    ] {
        assert_eq!(
            draw_counts(cmd.commands_in_group(group)).len(),
            1,
            "{group} should record one draw"
        );
    }

    // The global set is bound after begin and again after the light queue.
    let global = pipeline.ubo().descriptor_set().unwrap();
    let global_binds: Vec<usize> = cmd
        .commands()
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            matches!(c, Command::BindDescriptorSet { set: GLOBAL_SET, descriptor_set, .. } if *descriptor_set == global)
        })
        .map(|(i, _)| i)
        .collect();
    assert_eq!(global_binds.len(), 2);

    let planar_start = position_of(cmd.commands(), |c| {
        matches!(c, Command::PushDebugGroup(l) if l == "Planar Shadow Queue")
    })
    .unwrap();
    let additive_start = position_of(cmd.commands(), |c| {
        matches!(c, Command::PushDebugGroup(l) if l == "Additive Light Queue")
    })
    .unwrap();
    assert!(additive_start < global_binds[1] && global_binds[1] < planar_start);
    Ok(())
}

#[test]
fn uploads_precede_the_render_pass() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.instancing_pass();
    let sub_model = fx.sub_model(&[&pass]);
    for model in shared_models(&sub_model, 3) {
        pipeline.scene_mut().add_model(model);
    }

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;
    let commands = cmd.commands();
    let begin = position_of(commands, |c| matches!(c, Command::BeginRenderPass(_))).unwrap();
    let uploads: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Command::UpdateBuffer { .. }))
        .map(|(i, _)| i)
        .collect();
    // Camera uniforms plus one instance buffer.
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().all(|&i| i < begin));
    Ok(())
}

#[test]
fn render_area_uses_viewport_and_shading_scale() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    pipeline.scene_mut().shading_scale = 0.5;
    let camera = fx.camera();

    let cmd = render_one(&fx, &mut pipeline, &camera)?;

    let Some(Command::BeginRenderPass(info)) = cmd
        .commands()
        .iter()
        .find(|c| matches!(c, Command::BeginRenderPass(_)))
    else {
        panic!("render pass never began");
    };
    assert_eq!(
        info.render_area,
        Rect { x: 0, y: 0, width: 400, height: 300 }
    );
    assert_eq!(info.render_pass, fx.render_pass);
    assert_eq!(pipeline.stage().render_area(), info.render_area);
    Ok(())
}

#[test]
fn missing_pipeline_state_skips_the_draw() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.opaque_pass();
    pipeline
        .scene_mut()
        .add_model(fx.model_at(Vec3::ZERO, &[&pass]));
    fx.device.mark_shader_unsupported(fx.shader);

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;
    assert_eq!(cmd.draw_count(), 0);
    assert_eq!(pipeline.stage().render_queues()[0].len(), 1);
    Ok(())
}

#[test]
fn disabled_overlays_are_skipped_in_kind_order() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let calls = Arc::new(AtomicU32::new(0));
    for (kind, enabled) in [
        (OverlayKind::Debug, true),
        (OverlayKind::Profiler, false),
        (OverlayKind::Geometry, true),
    ] {
        pipeline.stage_mut().add_overlay(Box::new(RecordingOverlay {
            kind,
            enabled,
            calls: calls.clone(),
        }));
    }

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(
        cmd.debug_groups(),
        vec!["Camera", "Geometry Renderer", "Debug Renderer"]
    );
    Ok(())
}

// ============================================================================
// Reset gate
// ============================================================================

#[test]
fn unchanged_frames_reuse_sorted_queues() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.opaque_pass();
    for x in [0.0, 1.0] {
        pipeline
            .scene_mut()
            .add_model(fx.model_at(Vec3::new(x, 0.0, 0.0), &[&pass]));
    }
    let camera = fx.camera();
    render_one(&fx, &mut pipeline, &camera)?;
    assert_eq!(pipeline.stage().render_queues()[0].len(), 2);

    pipeline
        .scene_mut()
        .add_model(fx.model_at(Vec3::new(2.0, 0.0, 0.0), &[&pass]));
    pipeline.set_render_queue_reset(false);
    let cmd = render_one(&fx, &mut pipeline, &camera)?;
    assert_eq!(pipeline.stage().render_queues()[0].len(), 2);
    assert_eq!(cmd.draw_count(), 2);

    pipeline.set_render_queue_reset(true);
    render_one(&fx, &mut pipeline, &camera)?;
    assert_eq!(pipeline.stage().render_queues()[0].len(), 3);
    Ok(())
}

#[test]
fn classification_clears_previous_frame() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let registry = PhaseRegistry::with_builtins();
    let mut stage = ForwardStage::new();
    stage.initialize(StageSettings::default())?;
    stage.activate(&registry)?;

    let pass = fx.opaque_pass();
    let instanced = fx.instancing_pass();
    let mut scene = PipelineSceneData::new();
    scene.add_model(fx.model_at(Vec3::ZERO, &[&pass, &instanced]));
    let camera = fx.camera();
    scene.cull(&camera);

    let mut ubo = PipelineUbo::new();
    let mut cmd = CommandCapture::new();
    for _ in 0..3 {
        ubo.next_frame(&fx.device);
        let mut ctx = FrameContext {
            device: &fx.device,
            cmd: &mut cmd,
            scene: &scene,
            ubo: &mut ubo,
            render_queue_reset: true,
        };
        stage.render(&mut ctx, &camera)?;
    }
    assert_eq!(stage.render_queues()[0].len(), 1);
    assert_eq!(
        stage
            .instanced_queue()
            .buffer(instanced.id())
            .unwrap()
            .instance_count(),
        1
    );
    Ok(())
}

// ============================================================================
// Lifecycle & configuration
// ============================================================================

#[test]
fn destroy_releases_gpu_buffers_and_is_idempotent() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.instancing_pass();
    let sub_model = fx.sub_model(&[&pass]);
    for model in shared_models(&sub_model, 4) {
        pipeline.scene_mut().add_model(model);
    }
    pipeline
        .scene_mut()
        .lights
        .push(Light::new_sphere(Vec3::ZERO, 3.0, Vec3::ONE, 1.0));
    render_one(&fx, &mut pipeline, &fx.camera())?;
    assert!(fx.device.live_buffer_count() > 0);

    pipeline.destroy(&fx.device);
    assert_eq!(fx.device.live_buffer_count(), 0);
    pipeline.destroy(&fx.device);

    let err = render_one(&fx, &mut pipeline, &fx.camera()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StageError>(),
        Some(StageError::Destroyed(_))
    ));
    Ok(())
}

#[test]
fn unknown_phase_is_reported_at_activation() {
    let mut settings = StageSettings::default();
    settings.render_queues[0].phases = vec!["default".into(), "deferred".into()];
    let err = ForwardPipeline::new(settings).err().unwrap();
    assert!(matches!(err, StageError::UnknownPhase(name) if name == "deferred"));
}

#[test]
fn render_before_activation_fails() {
    let fx = Fixture::new();
    let mut stage = ForwardStage::new();
    stage.initialize(StageSettings::default()).unwrap();

    let scene = PipelineSceneData::new();
    let mut ubo = PipelineUbo::new();
    let mut cmd = CommandCapture::new();
    let mut ctx = FrameContext {
        device: &fx.device,
        cmd: &mut cmd,
        scene: &scene,
        ubo: &mut ubo,
        render_queue_reset: true,
    };
    let err = stage.render(&mut ctx, &fx.camera()).unwrap_err();
    assert!(matches!(err, StageError::NotActivated(_)));
    assert!(cmd.commands().is_empty());
}

#[test]
fn settings_load_from_json() -> anyhow::Result<()> {
    let settings: StageSettings = serde_json::from_str(
        r#"{
            "name": "CustomForward",
            "render_queues": [
                { "sort_mode": "FRONT_TO_BACK", "phases": ["default"] },
                { "is_transparent": true, "sort_mode": "BACK_TO_FRONT", "phases": ["default"] }
            ],
            "max_instances_per_item": 2
        }"#,
    )?;
    assert_eq!(settings.name, "CustomForward");
    assert_eq!(settings.phase, "default");
    assert_eq!(settings.render_queues[1].sort_mode, RenderQueueSortMode::BackToFront);

    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(settings)?;
    let pass = fx.instancing_pass();
    let sub_model = fx.sub_model(&[&pass]);
    for model in shared_models(&sub_model, 5) {
        pipeline.scene_mut().add_model(model);
    }
    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;
    assert_eq!(draw_counts(cmd.commands()), vec![2, 2, 1]);
    Ok(())
}

#[test]
fn settings_round_trip_through_json() -> anyhow::Result<()> {
    let settings = StageSettings::default();
    let json = serde_json::to_string(&settings)?;
    assert!(json.contains("\"BACK_TO_FRONT\""));
    let parsed: StageSettings = serde_json::from_str(&json)?;
    assert_eq!(parsed, settings);
    Ok(())
}

// ============================================================================
// Determinism & configuration order
// ============================================================================

#[test]
fn reclassifying_an_unchanged_scene_keeps_the_order() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let opaque = fx.opaque_pass();
    let blended = fx.transparent_pass();
    // Repeated depths so the order relies on stable tie-breaking.
    for z in [0.0, 5.0, 5.0, -5.0, 5.0, 0.0] {
        pipeline
            .scene_mut()
            .add_model(fx.model_at(Vec3::new(0.0, 0.0, z), &[&opaque, &blended]));
    }
    let camera = fx.camera();

    render_one(&fx, &mut pipeline, &camera)?;
    let first: Vec<Vec<_>> = pipeline
        .stage()
        .render_queues()
        .iter()
        .map(|q| q.units().to_vec())
        .collect();

    for _ in 0..2 {
        assert!(pipeline.is_render_queue_reset());
        render_one(&fx, &mut pipeline, &camera)?;
        let again: Vec<Vec<_>> = pipeline
            .stage()
            .render_queues()
            .iter()
            .map(|q| q.units().to_vec())
            .collect();
        assert_eq!(again, first);
    }

    let opaque_order: Vec<u32> = first[0].iter().map(|u| u.object_index).collect();
    assert_eq!(opaque_order, vec![1, 2, 4, 0, 5, 3]);
    Ok(())
}

#[test]
fn opaque_queue_records_first_whatever_its_position() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut settings = StageSettings::default();
    settings.render_queues = vec![RenderQueueDesc::transparent(), RenderQueueDesc::opaque()];
    let mut pipeline = ForwardPipeline::new(settings)?;

    let opaque = fx.opaque_pass();
    let blended = fx.transparent_pass();
    let scene = pipeline.scene_mut();
    scene.add_model(fx.model_at(Vec3::ZERO, &[&opaque]));
    scene.add_model(fx.model_at(Vec3::new(1.0, 0.0, 0.0), &[&blended]));

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;

    assert_eq!(
        cmd.debug_groups(),
        vec![
            "Camera",
            "Opaque Queue",
            "Instanced Queue",
            "Additive Light Queue",
            "Planar Shadow Queue",
            "Transparent Queue",
        ]
    );
    assert_eq!(draw_counts(cmd.commands_in_group("Opaque Queue")), vec![1]);
    assert_eq!(draw_counts(cmd.commands_in_group("Transparent Queue")), vec![1]);
    Ok(())
}

#[test]
fn sub_model_without_instance_data_is_not_registered() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.instancing_pass();
    let sub_model = SubModel::new(
        fx.device.create_input_assembler("mesh"),
        fx.device.create_descriptor_set("local"),
    )
    .with_pass(pass.clone());
    pipeline.scene_mut().add_model(Model::new(vec![sub_model]));

    let cmd = render_one(&fx, &mut pipeline, &fx.camera())?;

    let stage = pipeline.stage();
    assert!(stage.instanced_queue().registered().is_empty());
    assert!(stage.instanced_queue().is_empty());
    assert!(stage.render_queues().iter().all(|q| q.is_empty()));
    assert_eq!(cmd.draw_count(), 0);
    Ok(())
}

// ============================================================================
// Multiple cameras
// ============================================================================

#[test]
fn each_camera_uploads_before_its_own_pass() -> anyhow::Result<()> {
    let fx = Fixture::new();
    let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
    let pass = fx.instancing_pass();
    let sub_model = fx.sub_model(&[&pass]);
    for model in shared_models(&sub_model, 3) {
        pipeline.scene_mut().add_model(model);
    }
    // Only visible to the right camera.
    let far = Vec3::new(10.0, 0.0, 0.0);
    pipeline.scene_mut().add_model(
        Model::new(vec![sub_model.clone()])
            .at(far)
            .with_bounds(Aabb::from_center_half_extents(far, Vec3::splat(0.5))),
    );

    let mut left = fx.camera();
    left.name = "Left".into();
    let mut right = fx.camera();
    right.name = "Right".into();
    right.look_at(Vec3::new(10.0, 0.0, 10.0), far, Vec3::Y);

    let mut cmd = CommandCapture::new();
    pipeline.render(&fx.device, &mut cmd, &[&left, &right])?;
    assert_eq!(cmd.debug_groups().iter().filter(|l| **l == "Instanced Queue").count(), 2);

    let mut camera_offsets = Vec::new();
    for (group, instances) in [("Left", 3u32), ("Right", 1)] {
        let commands = cmd.commands_in_group(group);
        let begin = position_of(commands, |c| matches!(c, Command::BeginRenderPass(_))).unwrap();
        let end = position_of(commands, |c| matches!(c, Command::EndRenderPass)).unwrap();

        let instance_uploads: Vec<usize> = commands[..begin]
            .iter()
            .filter_map(|c| match c {
                Command::UpdateBuffer { buffer, data, .. }
                    if fx
                        .device
                        .buffer(*buffer)
                        .is_some_and(|b| b.usage == BufferUsage::Instance) =>
                {
                    Some(data.len())
                }
                _ => None,
            })
            .collect();
        assert_eq!(instance_uploads, vec![instances as usize * 16], "{group}");
        assert!(
            commands[begin..]
                .iter()
                .all(|c| !matches!(c, Command::UpdateBuffer { .. })),
            "{group} uploads inside its pass"
        );
        assert_eq!(draw_counts(&commands[begin..end]), vec![instances], "{group}");

        let Command::BindDescriptorSet {
            set: GLOBAL_SET,
            dynamic_offsets,
            ..
        } = &commands[begin + 1]
        else {
            panic!("{group}: global set not bound after begin");
        };
        camera_offsets.push(dynamic_offsets.clone());
    }
    assert_eq!(camera_offsets[0], vec![0]);
    assert_ne!(camera_offsets[1], camera_offsets[0]);
    Ok(())
}
