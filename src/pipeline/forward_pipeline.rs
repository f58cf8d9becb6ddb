use super::forward_stage::{ForwardStage, FrameContext};
use super::uniforms::PipelineUbo;
use crate::errors::Result;
use crate::gfx::{CommandBuffer, RenderDevice};
use crate::scene::{Camera, PhaseRegistry, PipelineSceneData};
use crate::settings::StageSettings;

/// Hosts a [`ForwardStage`] together with the state it borrows per frame.
pub struct ForwardPipeline {
    scene: PipelineSceneData,
    phases: PhaseRegistry,
    ubo: PipelineUbo,
    stage: ForwardStage,
    render_queue_reset: bool,
}

impl ForwardPipeline {
    /// Builds a pipeline over the builtin phases.
    pub fn new(settings: StageSettings) -> Result<Self> {
        Self::with_phases(settings, PhaseRegistry::with_builtins())
    }

    pub fn with_phases(settings: StageSettings, phases: PhaseRegistry) -> Result<Self> {
        let mut stage = ForwardStage::new();
        stage.initialize(settings)?;
        stage.activate(&phases)?;
        Ok(Self {
            scene: PipelineSceneData::new(),
            phases,
            ubo: PipelineUbo::new(),
            stage,
            render_queue_reset: true,
        })
    }

    #[must_use]
    pub fn scene(&self) -> &PipelineSceneData {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut PipelineSceneData {
        &mut self.scene
    }

    #[must_use]
    pub fn phases(&self) -> &PhaseRegistry {
        &self.phases
    }

    #[must_use]
    pub fn stage(&self) -> &ForwardStage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut ForwardStage {
        &mut self.stage
    }

    #[must_use]
    pub fn ubo(&self) -> &PipelineUbo {
        &self.ubo
    }

    /// Whether the next render re-culls and re-classifies. Set to `false` only
    /// when the scene and cameras are known to be unchanged.
    pub fn set_render_queue_reset(&mut self, reset: bool) {
        self.render_queue_reset = reset;
    }

    #[must_use]
    pub fn is_render_queue_reset(&self) -> bool {
        self.render_queue_reset
    }

    /// Renders every camera in order into `cmd`.
    pub fn render(
        &mut self,
        device: &dyn RenderDevice,
        cmd: &mut dyn CommandBuffer,
        cameras: &[&Camera],
    ) -> Result<()> {
        self.ubo.next_frame(device);
        self.stage.next_frame(device);

        for camera in cameras {
            if self.render_queue_reset {
                self.scene.cull(camera);
            }

            cmd.push_debug_group(&camera.name);
            let mut ctx = FrameContext {
                device,
                cmd: &mut *cmd,
                scene: &self.scene,
                ubo: &mut self.ubo,
                render_queue_reset: self.render_queue_reset,
            };
            let result = self.stage.render(&mut ctx, camera);
            cmd.pop_debug_group();
            result?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        self.stage.destroy(device);
        self.ubo.destroy(device);
    }
}
