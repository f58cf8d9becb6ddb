//! Additive light queue
//!
//! Sphere and spot lights visible to the camera are shaded in extra passes
//! blended on top of the base pass. Each lit sub-model is drawn once per light
//! that reaches it, with the light selected through a dynamic offset into the
//! per-light uniform buffer bound at the global set.

use smallvec::SmallVec;

use super::uniforms::{DynamicUniformBuffer, LightUniforms};
use crate::errors::Result;
use crate::gfx::{
    CommandBuffer, GLOBAL_SET, LOCAL_SET, MATERIAL_SET, PipelineStateKey, RenderDevice,
    RenderPassId, TrackedCommandBuffer,
};
use crate::scene::{Camera, LightKind, PhaseId, PipelineSceneData};

#[derive(Debug, Clone, Copy, PartialEq)]
struct ValidLight {
    position: glam::Vec3,
    range: f32,
    offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdditiveLightPass {
    pub object_index: u32,
    pub sub_model_index: u32,
    pub pass_index: u32,
    /// Dynamic offsets of the lights reaching this sub-model.
    pub light_offsets: SmallVec<[u32; 4]>,
}

pub struct AdditiveLightQueue {
    phase: PhaseId,
    light_buffer: DynamicUniformBuffer,
    valid_lights: Vec<ValidLight>,
    passes: Vec<AdditiveLightPass>,
}

impl AdditiveLightQueue {
    /// `phase` is the phase of the additive light passes.
    #[must_use]
    pub fn new(phase: PhaseId) -> Self {
        Self {
            phase,
            light_buffer: DynamicUniformBuffer::new::<LightUniforms>("Additive Light UBO"),
            valid_lights: Vec::new(),
            passes: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.valid_lights.clear();
        self.passes.clear();
    }

    #[must_use]
    pub fn passes(&self) -> &[AdditiveLightPass] {
        &self.passes
    }

    #[must_use]
    pub fn light_count(&self) -> usize {
        self.valid_lights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Collects visible lights and the sub-models they reach, and uploads the
    /// light uniforms. Must be called outside of a render pass.
    pub fn gather_light_passes(
        &mut self,
        device: &dyn RenderDevice,
        scene: &PipelineSceneData,
        camera: &Camera,
        cmd: &mut dyn CommandBuffer,
    ) -> Result<()> {
        self.clear();
        self.light_buffer.begin(device);

        for light in &scene.lights {
            let range = match &light.kind {
                LightKind::Directional(_) => continue,
                LightKind::Sphere(s) => s.range,
                LightKind::Spot(s) => s.range,
            };
            if !camera.frustum().intersects_sphere(light.position, range) {
                continue;
            }
            let offset = self.light_buffer.push(&LightUniforms::new(light));
            self.valid_lights.push(ValidLight {
                position: light.position,
                range,
                offset,
            });
        }

        if self.valid_lights.is_empty() {
            return Ok(());
        }
        self.light_buffer.upload(device, cmd)?;

        for (object_index, ro) in scene.render_objects.iter().enumerate() {
            let bounds = ro.model.world_bounds;
            let light_offsets: SmallVec<[u32; 4]> = self
                .valid_lights
                .iter()
                .filter(|l| bounds.is_none_or(|b| b.intersects_sphere(l.position, l.range)))
                .map(|l| l.offset)
                .collect();
            if light_offsets.is_empty() {
                continue;
            }

            for (sub_model_index, sub_model) in ro.model.sub_models.iter().enumerate() {
                let Some(pass_index) = sub_model.passes.iter().position(|p| p.phase == self.phase)
                else {
                    continue;
                };
                self.passes.push(AdditiveLightPass {
                    object_index: object_index as u32,
                    sub_model_index: sub_model_index as u32,
                    pass_index: pass_index as u32,
                    light_offsets: light_offsets.clone(),
                });
            }
        }

        log::trace!(
            "AdditiveLightQueue: {} lights, {} lit sub-models",
            self.valid_lights.len(),
            self.passes.len()
        );
        Ok(())
    }

    /// Draws every gathered sub-model once per light. Leaves the light set
    /// bound at the global slot.
    pub fn record_command_buffer(
        &self,
        device: &dyn RenderDevice,
        scene: &PipelineSceneData,
        render_pass: RenderPassId,
        cmd: &mut dyn CommandBuffer,
    ) {
        let Some(light_set) = self.light_buffer.descriptor_set() else {
            return;
        };
        let mut cmd = TrackedCommandBuffer::new(cmd);

        for lit in &self.passes {
            let resolved = scene
                .render_objects
                .get(lit.object_index as usize)
                .and_then(|ro| ro.pass(lit.sub_model_index as usize, lit.pass_index as usize));
            let Some((sub_model, pass)) = resolved else {
                log::error!("AdditiveLightQueue: stale light pass {lit:?}, skipping");
                continue;
            };

            let key = PipelineStateKey {
                pass: pass.id(),
                shader: pass.shader,
                render_pass,
                input_assembler: sub_model.input_assembler,
            };
            let Some(pipeline) = device.pipeline_state(&key) else {
                log::warn!("AdditiveLightQueue: no pipeline state for {key:?}, skipping");
                continue;
            };

            cmd.bind_pipeline_state(pipeline);
            cmd.bind_descriptor_set(MATERIAL_SET, pass.descriptor_set, &[]);
            cmd.bind_input_assembler(sub_model.input_assembler, None);

            for &offset in &lit.light_offsets {
                cmd.bind_descriptor_set(GLOBAL_SET, light_set, &[offset]);
                cmd.bind_descriptor_set(LOCAL_SET, sub_model.descriptor_set, &[]);
                cmd.draw(1);
            }
        }
    }

    /// Frees light buffers replaced by a grow in earlier frames.
    pub fn release_retired(&mut self, device: &dyn RenderDevice) {
        self.light_buffer.release_retired(device);
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        self.clear();
        self.light_buffer.destroy(device);
    }
}
