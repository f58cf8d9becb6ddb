//! Scene-side data consumed by the stage
//!
//! - `PhaseRegistry`: phase name to bit mapping
//! - `Model` / `SubModel` / `Pass`: what gets drawn
//! - `Camera`: view, frustum, render target and clear state
//! - `Light` / `Shadows`: additive lights and planar shadow setup
//! - `PipelineSceneData`: per-frame render objects plus the above

pub mod camera;
pub mod light;
pub mod model;
pub mod phase;
pub mod scene_data;

pub use camera::{Aabb, Camera, Frustum, RenderWindow};
pub use light::{Light, LightKind, ShadowType, Shadows, SphereLight, SpotLight};
pub use model::{BatchingScheme, BlendMode, Model, Pass, PassId, RenderObject, SubModel};
pub use phase::{MAX_PHASES, PhaseId, PhaseMask, PhaseRegistry};
pub use scene_data::PipelineSceneData;
