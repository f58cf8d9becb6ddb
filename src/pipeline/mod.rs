//! Forward pipeline: the stage, its queues and the frame uniforms.

pub mod additive_light;
pub mod forward_pipeline;
pub mod forward_stage;
pub mod instanced_buffer;
pub mod instanced_queue;
pub mod overlay;
pub mod planar_shadow;
pub mod render_queue;
pub mod uniforms;

pub use additive_light::{AdditiveLightPass, AdditiveLightQueue};
pub use forward_pipeline::ForwardPipeline;
pub use forward_stage::{ForwardStage, FrameContext, Route};
pub use instanced_buffer::{InstancedBuffer, InstancedItem};
pub use instanced_queue::InstancedQueue;
pub use overlay::{OverlayKind, OverlayList, OverlayRenderer};
pub use planar_shadow::PlanarShadowQueue;
pub use render_queue::{
    DrawUnit, RenderQueue, RenderQueueCreateInfo, RenderQueueSortFunc, opaque_compare,
    transparent_compare,
};
pub use uniforms::{
    CameraUniforms, DynamicUniformBuffer, LightUniforms, PipelineUbo, planar_shadow_matrix,
};
