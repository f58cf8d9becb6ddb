use std::sync::Arc;

use super::camera::Camera;
use super::light::{Light, Shadows};
use super::model::{Model, RenderObject};

/// Everything the stage reads from the scene for one camera.
///
/// `render_objects` is rebuilt per camera by [`cull`](Self::cull); the other
/// fields are owned by the application and change at its own pace.
#[derive(Debug, Clone)]
pub struct PipelineSceneData {
    pub render_objects: Vec<RenderObject>,
    pub models: Vec<Arc<Model>>,
    pub lights: Vec<Light>,
    /// The directional light that drives the planar shadow projection.
    pub main_light: Option<Light>,
    pub shadows: Shadows,
    /// Ratio between the shading resolution and the window resolution.
    pub shading_scale: f32,
}

impl Default for PipelineSceneData {
    fn default() -> Self {
        Self {
            render_objects: Vec::new(),
            models: Vec::new(),
            lights: Vec::new(),
            main_light: None,
            shadows: Shadows::default(),
            shading_scale: 1.0,
        }
    }
}

impl PipelineSceneData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, model: Model) -> Arc<Model> {
        let model = Arc::new(model);
        self.models.push(model.clone());
        model
    }

    /// Whether `model` should be considered for `camera` at all.
    #[must_use]
    pub fn is_model_visible(model: &Model, camera: &Camera) -> bool {
        model.enabled
            && model.visibility & camera.visibility != 0
            && model
                .world_bounds
                .is_none_or(|bounds| camera.frustum().intersects_aabb(&bounds))
    }

    /// Rebuilds `render_objects` for `camera`: visible models in scene order,
    /// each tagged with its depth along the view direction.
    pub fn cull(&mut self, camera: &Camera) {
        self.render_objects.clear();
        for model in &self.models {
            if !Self::is_model_visible(model, camera) {
                continue;
            }
            let anchor = model
                .world_bounds
                .map_or(model.world_position, |bounds| bounds.center());
            self.render_objects
                .push(RenderObject::new(model.clone(), camera.depth_of(anchor)));
        }
        log::trace!(
            "Culled {} of {} models for camera {:?}",
            self.render_objects.len(),
            self.models.len(),
            camera.name
        );
    }
}
