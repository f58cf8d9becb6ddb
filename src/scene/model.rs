//! Renderable Data Model
//!
//! `Model -> SubModel[] -> Pass[]`, plus the per-frame [`RenderObject`] the
//! scene produces for each visible model.
//!
//! Passes are shared (`Arc<Pass>`) between every sub-model using the same
//! material, so their identity ([`PassId`]) is what instanced batches key on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;

use super::camera::Aabb;
use super::phase::PhaseId;
use crate::gfx::{DescriptorSetId, InputAssemblerId, ShaderId};

static NEXT_PASS_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of a [`Pass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(u32);

impl PassId {
    fn next() -> Self {
        Self(NEXT_PASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// How draws of a pass are submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BatchingScheme {
    /// One draw per sub-model.
    #[default]
    None,
    /// Merged into one instanced draw per compatible group.
    Instancing,
}

/// Blend state of a pass, as far as queue filtering is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    Transparent,
}

/// One material pass: a shader plus its bindings, drawn in a given phase.
#[derive(Debug)]
pub struct Pass {
    id: PassId,
    pub phase: PhaseId,
    pub batching: BatchingScheme,
    pub blend: BlendMode,
    /// Lower values are drawn first.
    pub priority: u8,
    pub shader: ShaderId,
    /// Material (set 1) bindings.
    pub descriptor_set: DescriptorSetId,
}

impl Pass {
    #[must_use]
    pub fn new(phase: PhaseId, shader: ShaderId, descriptor_set: DescriptorSetId) -> Self {
        Self {
            id: PassId::next(),
            phase,
            batching: BatchingScheme::None,
            blend: BlendMode::Opaque,
            priority: 128,
            shader,
            descriptor_set,
        }
    }

    #[must_use]
    pub fn with_batching(mut self, batching: BatchingScheme) -> Self {
        self.batching = batching;
        self
    }

    #[must_use]
    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> PassId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.blend == BlendMode::Transparent
    }
}

/// A drawable section of a model: one input assembler drawn by several passes.
#[derive(Debug, Clone)]
pub struct SubModel {
    pub passes: Vec<Arc<Pass>>,
    pub input_assembler: InputAssemblerId,
    /// Local (set 2) bindings.
    pub descriptor_set: DescriptorSetId,
    /// Packed per-instance attributes. Empty when the sub-model cannot be
    /// instanced.
    pub instance_attributes: Vec<u8>,
    /// Shader used to draw the sub-model into the planar shadow.
    pub planar_shader: Option<ShaderId>,
    /// Instanced variant of `planar_shader`.
    pub planar_instance_shader: Option<ShaderId>,
}

impl SubModel {
    #[must_use]
    pub fn new(input_assembler: InputAssemblerId, descriptor_set: DescriptorSetId) -> Self {
        Self {
            passes: Vec::new(),
            input_assembler,
            descriptor_set,
            instance_attributes: Vec::new(),
            planar_shader: None,
            planar_instance_shader: None,
        }
    }

    #[must_use]
    pub fn with_pass(mut self, pass: Arc<Pass>) -> Self {
        self.passes.push(pass);
        self
    }

    #[must_use]
    pub fn with_instance_attributes(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.instance_attributes = data.into();
        self
    }

    #[must_use]
    pub fn with_planar_shaders(mut self, shader: ShaderId, instanced: Option<ShaderId>) -> Self {
        self.planar_shader = Some(shader);
        self.planar_instance_shader = instanced;
        self
    }

    #[inline]
    #[must_use]
    pub fn instance_stride(&self) -> u32 {
        self.instance_attributes.len() as u32
    }
}

/// A renderable scene entity.
#[derive(Debug, Clone)]
pub struct Model {
    pub sub_models: Vec<SubModel>,
    pub world_position: Vec3,
    /// World-space bounds. Models without bounds are never culled.
    pub world_bounds: Option<Aabb>,
    pub enabled: bool,
    pub cast_shadow: bool,
    /// Whether the planar shadow queue may instance this model.
    pub instancing_enabled: bool,
    /// Layer mask, tested against the camera's visibility.
    pub visibility: u32,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            sub_models: Vec::new(),
            world_position: Vec3::ZERO,
            world_bounds: None,
            enabled: true,
            cast_shadow: false,
            instancing_enabled: false,
            visibility: u32::MAX,
        }
    }
}

impl Model {
    #[must_use]
    pub fn new(sub_models: Vec<SubModel>) -> Self {
        Self {
            sub_models,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn at(mut self, position: Vec3) -> Self {
        self.world_position = position;
        self
    }

    #[must_use]
    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.world_bounds = Some(bounds);
        self
    }
}

/// A model selected for this frame together with its camera depth.
#[derive(Debug, Clone)]
pub struct RenderObject {
    pub model: Arc<Model>,
    /// Distance along the camera's view direction.
    pub depth: f32,
}

impl RenderObject {
    #[must_use]
    pub fn new(model: Arc<Model>, depth: f32) -> Self {
        Self { model, depth }
    }

    /// Resolves `(sub_model_index, pass_index)` against the model.
    #[must_use]
    pub fn pass(&self, sub_model_index: usize, pass_index: usize) -> Option<(&SubModel, &Arc<Pass>)> {
        let sub_model = self.model.sub_models.get(sub_model_index)?;
        let pass = sub_model.passes.get(pass_index)?;
        Some((sub_model, pass))
    }
}
