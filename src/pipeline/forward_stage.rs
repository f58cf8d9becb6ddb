//! Forward Stage
//!
//! The per-camera orchestrator of the forward pipeline. One `render()` call:
//!
//! 1. **Classify** (skipped when the pipeline reports an unchanged object set):
//!    clear every queue, route each `(object, sub-model, pass)` of the stage's
//!    phase either into the instanced queue or into every primary queue that
//!    accepts it, then sort.
//! 2. **Prepare** (outside the render pass): camera uniforms, instance data,
//!    additive light gathering, planar shadow gathering.
//! 3. **Record** inside one render pass:
//!
//! ```text
//! global set ─► opaque queue ─► instanced ─► additive lights ─► global set
//!            ─► planar shadows ─► transparent queues ─► blits ─► overlays
//! ```
//!
//!    The geometry part (opaque queue through transparent queues) is only
//!    recorded when the frame has render objects.
//!
//! # Lifecycle
//!
//! `new` → `initialize(settings)` → `activate(phases)` → `render`* → `destroy`.

use super::additive_light::AdditiveLightQueue;
use super::instanced_queue::InstancedQueue;
use super::overlay::{OverlayList, OverlayRenderer};
use super::planar_shadow::PlanarShadowQueue;
use super::render_queue::{RenderQueue, RenderQueueCreateInfo};
use super::uniforms::PipelineUbo;
use crate::errors::{Result, StageError};
use crate::gfx::{CommandBuffer, GLOBAL_SET, Rect, RenderDevice};
use crate::scene::{BatchingScheme, Camera, Pass, PhaseId, PhaseRegistry, PipelineSceneData};
use crate::settings::StageSettings;

/// Everything a frame borrows from the pipeline. Never stored by the stage.
pub struct FrameContext<'a> {
    pub device: &'a dyn RenderDevice,
    pub cmd: &'a mut dyn CommandBuffer,
    pub scene: &'a PipelineSceneData,
    pub ubo: &'a mut PipelineUbo,
    /// `false` when the render objects are known to be unchanged since the
    /// previous render, in which case the queues keep their sorted content.
    pub render_queue_reset: bool,
}

/// Where a pass of the stage's phase is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Merged into the pass's instanced buffer.
    Instanced,
    /// Offered to every primary queue.
    Queues,
}

impl Route {
    #[must_use]
    pub fn of(pass: &Pass) -> Self {
        match pass.batching {
            BatchingScheme::Instancing => Self::Instanced,
            BatchingScheme::None => Self::Queues,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageState {
    Created,
    Initialized,
    Active,
    Destroyed,
}

pub struct ForwardStage {
    settings: StageSettings,
    state: StageState,
    phase: Option<PhaseId>,
    render_queues: Vec<RenderQueue>,
    instanced_queue: InstancedQueue,
    additive_light_queue: Option<AdditiveLightQueue>,
    planar_shadow_queue: Option<PlanarShadowQueue>,
    overlays: OverlayList,
    render_area: Rect,
}

impl Default for ForwardStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardStage {
    #[must_use]
    pub fn new() -> Self {
        let settings = StageSettings::default();
        Self {
            instanced_queue: InstancedQueue::new(settings.max_instances_per_item),
            settings,
            state: StageState::Created,
            phase: None,
            render_queues: Vec::new(),
            additive_light_queue: None,
            planar_shadow_queue: None,
            overlays: OverlayList::default(),
            render_area: Rect::default(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stores the stage configuration. Phase names are not resolved yet.
    pub fn initialize(&mut self, settings: StageSettings) -> Result<()> {
        if self.state == StageState::Destroyed {
            return Err(StageError::Destroyed(settings.name));
        }
        settings.validate()?;
        log::debug!(
            "{}: initialized with {} render queues",
            settings.name,
            settings.render_queues.len()
        );
        self.settings = settings;
        self.state = StageState::Initialized;
        Ok(())
    }

    /// Resolves phase names and builds the runtime queues.
    ///
    /// Fails on unknown phase names; the stage is left unchanged in that case.
    pub fn activate(&mut self, phases: &PhaseRegistry) -> Result<()> {
        match self.state {
            StageState::Created => return Err(StageError::NotInitialized(self.name().into())),
            StageState::Destroyed => return Err(StageError::Destroyed(self.name().into())),
            StageState::Initialized | StageState::Active => {}
        }

        let phase = phases.resolve(&self.settings.phase)?;
        let additive_phase = phases.resolve(&self.settings.additive_phase)?;
        let render_queues = self
            .settings
            .render_queues
            .iter()
            .map(|desc| {
                Ok(RenderQueue::new(RenderQueueCreateInfo {
                    is_transparent: desc.is_transparent,
                    phases: phases.resolve_mask(&desc.phases)?,
                    sort_func: desc.sort_mode.compare_fn(),
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let max_instances = self.settings.max_instances_per_item;
        self.phase = Some(phase);
        self.render_queues = render_queues;
        self.instanced_queue = InstancedQueue::new(max_instances);
        self.additive_light_queue = Some(AdditiveLightQueue::new(additive_phase));
        self.planar_shadow_queue = Some(PlanarShadowQueue::new(max_instances));
        self.state = StageState::Active;
        log::debug!("{}: activated", self.name());
        Ok(())
    }

    /// Releases every queue and GPU buffer the stage owns. Calling it again is
    /// a no-op.
    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        if self.state == StageState::Destroyed {
            return;
        }
        self.instanced_queue.destroy(device);
        if let Some(mut queue) = self.additive_light_queue.take() {
            queue.destroy(device);
        }
        if let Some(mut queue) = self.planar_shadow_queue.take() {
            queue.destroy(device);
        }
        self.render_queues.clear();
        self.overlays.clear();
        self.phase = None;
        self.state = StageState::Destroyed;
        log::debug!("{}: destroyed", self.name());
    }

    /// Frees GPU allocations that were replaced during earlier frames. Call
    /// once per frame, after the previous frame was submitted.
    pub fn next_frame(&mut self, device: &dyn RenderDevice) {
        if let Some(queue) = &mut self.additive_light_queue {
            queue.release_retired(device);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn name(&self) -> &str {
        &self.settings.name
    }

    #[must_use]
    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == StageState::Active
    }

    #[must_use]
    pub fn render_queues(&self) -> &[RenderQueue] {
        &self.render_queues
    }

    #[must_use]
    pub fn instanced_queue(&self) -> &InstancedQueue {
        &self.instanced_queue
    }

    #[must_use]
    pub fn additive_light_queue(&self) -> Option<&AdditiveLightQueue> {
        self.additive_light_queue.as_ref()
    }

    #[must_use]
    pub fn planar_shadow_queue(&self) -> Option<&PlanarShadowQueue> {
        self.planar_shadow_queue.as_ref()
    }

    /// Render area of the last `render()` call.
    #[must_use]
    pub fn render_area(&self) -> Rect {
        self.render_area
    }

    pub fn add_overlay(&mut self, overlay: Box<dyn OverlayRenderer>) {
        self.overlays.add(overlay);
    }

    /// The first non-transparent queue, recorded before the auxiliary queues.
    /// Every other queue is recorded after the planar shadows.
    fn opaque_slot(&self) -> Option<usize> {
        self.render_queues.iter().position(|queue| !queue.is_transparent())
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            StageState::Active => Ok(()),
            StageState::Created => Err(StageError::NotInitialized(self.name().into())),
            StageState::Initialized => Err(StageError::NotActivated(self.name().into())),
            StageState::Destroyed => Err(StageError::Destroyed(self.name().into())),
        }
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Routes the frame's render objects into the queues and sorts them.
    ///
    /// Does nothing when `reset` is `false`: the previous classification is
    /// kept as-is.
    pub fn dispense_render_objects(&mut self, scene: &PipelineSceneData, reset: bool) -> Result<()> {
        self.ensure_active()?;
        if !reset {
            log::debug!("{}: render objects unchanged, reusing queues", self.name());
            return Ok(());
        }
        let Some(phase) = self.phase else {
            return Err(StageError::NotActivated(self.name().into()));
        };

        self.instanced_queue.clear();
        for queue in &mut self.render_queues {
            queue.clear();
        }

        for (object_index, ro) in scene.render_objects.iter().enumerate() {
            for (sub_model_index, sub_model) in ro.model.sub_models.iter().enumerate() {
                for (pass_index, pass) in sub_model.passes.iter().enumerate() {
                    if pass.phase != phase {
                        continue;
                    }
                    match Route::of(pass) {
                        Route::Instanced => {
                            if self.instanced_queue.merge(sub_model, pass) {
                                self.instanced_queue.add(pass.id());
                            }
                        }
                        Route::Queues => {
                            for queue in &mut self.render_queues {
                                queue.insert(object_index, ro, sub_model_index, pass_index);
                            }
                        }
                    }
                    log::trace!(
                        "object {object_index} sub-model {sub_model_index} pass {pass_index} -> {:?}",
                        Route::of(pass)
                    );
                }
            }
        }

        self.instanced_queue.sort();
        for queue in &mut self.render_queues {
            queue.sort();
        }
        Ok(())
    }

    /// Classifies, prepares and records one camera.
    pub fn render(&mut self, ctx: &mut FrameContext<'_>, camera: &Camera) -> Result<()> {
        self.ensure_active()?;

        let device = ctx.device;
        let scene = ctx.scene;

        self.render_area = camera.render_area(scene.shading_scale);

        // Uploads must be recorded before the render pass begins.
        self.dispense_render_objects(scene, ctx.render_queue_reset)?;
        let camera_offset = ctx.ubo.update_camera(device, ctx.cmd, camera, scene)?;
        self.instanced_queue.upload_buffers(device, ctx.cmd)?;
        if let Some(queue) = &mut self.additive_light_queue {
            queue.gather_light_passes(device, scene, camera, ctx.cmd)?;
        }
        if let Some(queue) = &mut self.planar_shadow_queue {
            queue.gather_shadow_passes(device, scene, camera, ctx.cmd)?;
        }

        let render_pass = camera.active_render_pass();
        ctx.cmd
            .begin_render_pass(&camera.render_pass_begin_info(scene.shading_scale))?;

        let global_set = ctx.ubo.descriptor_set();
        if let Some(set) = global_set {
            ctx.cmd.bind_descriptor_set(GLOBAL_SET, set, &[camera_offset]);
        }

        if !scene.render_objects.is_empty() {
            let opaque_slot = self.opaque_slot();

            if let Some(queue) = opaque_slot.map(|index| &self.render_queues[index]) {
                record_group(ctx.cmd, queue_label(queue), |cmd| {
                    queue.record_command_buffer(device, scene, render_pass, cmd);
                });
            }
            record_group(ctx.cmd, "Instanced Queue", |cmd| {
                self.instanced_queue
                    .record_command_buffer(device, render_pass, cmd);
            });
            if let Some(queue) = &self.additive_light_queue {
                record_group(ctx.cmd, "Additive Light Queue", |cmd| {
                    queue.record_command_buffer(device, scene, render_pass, cmd);
                });
            }

            // The light queue leaves its own set at slot 0.
            if let Some(set) = global_set {
                ctx.cmd.bind_descriptor_set(GLOBAL_SET, set, &[camera_offset]);
            }

            if let Some(queue) = &self.planar_shadow_queue {
                record_group(ctx.cmd, "Planar Shadow Queue", |cmd| {
                    queue.record_command_buffer(device, render_pass, cmd);
                });
            }
            let rest = self
                .render_queues
                .iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != opaque_slot)
                .map(|(_, queue)| queue);
            for queue in rest {
                record_group(ctx.cmd, queue_label(queue), |cmd| {
                    queue.record_command_buffer(device, scene, render_pass, cmd);
                });
            }
        }

        for blit in &camera.blit_textures {
            ctx.cmd.blit_texture(blit);
        }

        self.overlays
            .render(device, scene, camera, render_pass, ctx.cmd);

        ctx.cmd.end_render_pass()?;

        log::debug!(
            "{}: {} objects, queues {:?}, {} instanced batches",
            self.name(),
            scene.render_objects.len(),
            self.render_queues.iter().map(RenderQueue::len).collect::<Vec<_>>(),
            self.instanced_queue.len()
        );
        Ok(())
    }
}

fn queue_label(queue: &RenderQueue) -> &'static str {
    if queue.is_transparent() {
        "Transparent Queue"
    } else {
        "Opaque Queue"
    }
}

fn record_group(cmd: &mut dyn CommandBuffer, label: &str, record: impl FnOnce(&mut dyn CommandBuffer)) {
    cmd.push_debug_group(label);
    record(&mut *cmd);
    cmd.pop_debug_group();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::HeadlessDevice;

    #[test]
    fn lifecycle_is_enforced() {
        let device = HeadlessDevice::new();
        let registry = PhaseRegistry::with_builtins();
        let mut stage = ForwardStage::new();

        assert!(matches!(
            stage.activate(&registry),
            Err(StageError::NotInitialized(_))
        ));
        stage.initialize(StageSettings::default()).unwrap();
        assert!(matches!(
            stage.dispense_render_objects(&PipelineSceneData::new(), true),
            Err(StageError::NotActivated(_))
        ));
        stage.activate(&registry).unwrap();
        assert!(stage.is_active());
        assert_eq!(stage.render_queues().len(), 2);

        stage.destroy(&device);
        stage.destroy(&device);
        assert!(matches!(
            stage.activate(&registry),
            Err(StageError::Destroyed(_))
        ));
    }

    #[test]
    fn unknown_phase_fails_activation() {
        let registry = PhaseRegistry::with_builtins();
        let mut settings = StageSettings::default();
        settings.render_queues[1].phases.push("no-such-phase".into());

        let mut stage = ForwardStage::new();
        stage.initialize(settings).unwrap();
        let err = stage.activate(&registry).unwrap_err();
        assert!(matches!(err, StageError::UnknownPhase(name) if name == "no-such-phase"));
        assert!(!stage.is_active());
        assert!(stage.render_queues().is_empty());
    }
}
