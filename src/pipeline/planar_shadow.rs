//! Planar shadow queue
//!
//! Flattens shadow-casting models onto the receiver plane with the planar
//! projection stored in the camera uniforms. Source data is the scene's model
//! list rather than the frame's render objects, so casters outside the
//! classified set still throw shadows.

use std::sync::Arc;

use super::instanced_queue::InstancedQueue;
use crate::errors::Result;
use crate::gfx::{
    CommandBuffer, LOCAL_SET, MATERIAL_SET, PipelineStateKey, RenderDevice, RenderPassId,
    ShaderId, TrackedCommandBuffer,
};
use crate::scene::{Camera, Model, Pass, PipelineSceneData};
use crate::settings::MAX_INSTANCES_PER_ITEM;

struct ShadowCaster {
    model: Arc<Model>,
    sub_model_index: usize,
    shader: ShaderId,
}

pub struct PlanarShadowQueue {
    instanced_queue: InstancedQueue,
    casters: Vec<ShadowCaster>,
    shadow_pass: Option<Arc<Pass>>,
}

impl Default for PlanarShadowQueue {
    fn default() -> Self {
        Self::new(MAX_INSTANCES_PER_ITEM)
    }
}

impl PlanarShadowQueue {
    #[must_use]
    pub fn new(max_instances_per_item: u32) -> Self {
        Self {
            instanced_queue: InstancedQueue::new(max_instances_per_item),
            casters: Vec::new(),
            shadow_pass: None,
        }
    }

    pub fn clear(&mut self) {
        self.instanced_queue.clear();
        self.casters.clear();
        self.shadow_pass = None;
    }

    /// Number of individually drawn caster sub-models.
    #[must_use]
    pub fn caster_count(&self) -> usize {
        self.casters.len()
    }

    #[must_use]
    pub fn instanced_queue(&self) -> &InstancedQueue {
        &self.instanced_queue
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.casters.is_empty() && self.instanced_queue.is_empty()
    }

    /// Collects casters visible to `camera` and uploads instanced caster data.
    /// Does nothing unless planar shadows are enabled and a main light exists.
    pub fn gather_shadow_passes(
        &mut self,
        device: &dyn RenderDevice,
        scene: &PipelineSceneData,
        camera: &Camera,
        cmd: &mut dyn CommandBuffer,
    ) -> Result<()> {
        self.clear();

        let shadows = &scene.shadows;
        if !shadows.planar_active() || scene.main_light.is_none() {
            return Ok(());
        }
        let Some(shadow_pass) = shadows.material_pass.clone() else {
            return Ok(());
        };

        for model in &scene.models {
            if !model.cast_shadow || !PipelineSceneData::is_model_visible(model, camera) {
                continue;
            }

            for (sub_model_index, sub_model) in model.sub_models.iter().enumerate() {
                if model.instancing_enabled
                    && let Some(shader) = sub_model.planar_instance_shader
                    && self
                        .instanced_queue
                        .merge_with_shader(sub_model, &shadow_pass, shader)
                {
                    self.instanced_queue.add(shadow_pass.id());
                    continue;
                }

                let Some(shader) = sub_model.planar_shader else {
                    continue;
                };
                self.casters.push(ShadowCaster {
                    model: model.clone(),
                    sub_model_index,
                    shader,
                });
            }
        }

        self.instanced_queue.sort();
        self.instanced_queue.upload_buffers(device, cmd)?;
        self.shadow_pass = Some(shadow_pass);

        log::trace!(
            "PlanarShadowQueue: {} casters, {} instanced batches",
            self.casters.len(),
            self.instanced_queue.len()
        );
        Ok(())
    }

    /// Instanced casters first, then every individual caster.
    pub fn record_command_buffer(
        &self,
        device: &dyn RenderDevice,
        render_pass: RenderPassId,
        cmd: &mut dyn CommandBuffer,
    ) {
        let Some(shadow_pass) = &self.shadow_pass else {
            return;
        };

        self.instanced_queue
            .record_command_buffer(device, render_pass, cmd);

        let mut cmd = TrackedCommandBuffer::new(cmd);
        for caster in &self.casters {
            let Some(sub_model) = caster.model.sub_models.get(caster.sub_model_index) else {
                continue;
            };
            let key = PipelineStateKey {
                pass: shadow_pass.id(),
                shader: caster.shader,
                render_pass,
                input_assembler: sub_model.input_assembler,
            };
            let Some(pipeline) = device.pipeline_state(&key) else {
                log::warn!("PlanarShadowQueue: no pipeline state for {key:?}, skipping");
                continue;
            };

            cmd.bind_pipeline_state(pipeline);
            cmd.bind_descriptor_set(MATERIAL_SET, shadow_pass.descriptor_set, &[]);
            cmd.bind_descriptor_set(LOCAL_SET, sub_model.descriptor_set, &[]);
            cmd.bind_input_assembler(sub_model.input_assembler, None);
            cmd.draw(1);
        }
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        self.instanced_queue.destroy(device);
        self.casters.clear();
        self.shadow_pass = None;
    }
}
