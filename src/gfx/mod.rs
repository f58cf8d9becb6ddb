//! Graphics Device Interface
//!
//! The forward stage never talks to a graphics API directly. It records into a
//! [`CommandBuffer`] and allocates through a [`RenderDevice`], both borrowed
//! for the duration of a single `render()` call.
//!
//! Two implementations ship with the crate:
//!
//! - [`headless`]: a capture backend that records commands as plain data.
//!   Used by the test-suite and by tooling that inspects frame content.
//! - [`wgpu_backend`]: a `wgpu` implementation.
//!
//! [`TrackedCommandBuffer`] sits in front of either one and filters redundant
//! state changes while a queue records.

use bitflags::bitflags;
use glam::Vec4;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::errors::Result;
use crate::scene::PassId;

pub mod headless;
pub mod tracked;
pub mod wgpu_backend;

pub use headless::{Command, CommandCapture, HeadlessDevice};
pub use tracked::TrackedCommandBuffer;
pub use wgpu_backend::{WgpuCommandBuffer, WgpuDevice};

new_key_type! {
    /// GPU buffer (vertex, instance or uniform storage).
    pub struct BufferId;
    /// Bound resource set (material, local or global bindings).
    pub struct DescriptorSetId;
    /// Vertex/index stream description of a mesh section.
    pub struct InputAssemblerId;
    /// Compiled pipeline state object.
    pub struct PipelineStateId;
    /// Render pass compatibility description.
    pub struct RenderPassId;
    /// Framebuffer attachments.
    pub struct FramebufferId;
    /// Texture object.
    pub struct TextureId;
    /// Shader program variant.
    pub struct ShaderId;
}

/// Descriptor set slot of the per-frame global bindings (camera, lights).
pub const GLOBAL_SET: u32 = 0;
/// Descriptor set slot of the pass (material) bindings.
pub const MATERIAL_SET: u32 = 1;
/// Descriptor set slot of the sub-model (local) bindings.
pub const LOCAL_SET: u32 = 2;

/// Integer rectangle in framebuffer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[must_use]
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r, self.g, self.b, self.a)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

impl From<Color> for wgpu::Color {
    fn from(c: Color) -> Self {
        wgpu::Color {
            r: f64::from(c.r),
            g: f64::from(c.g),
            b: f64::from(c.b),
            a: f64::from(c.a),
        }
    }
}

bitflags! {
    /// Which attachments a render pass clears on load.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
        const DEPTH_STENCIL = Self::DEPTH.bits() | Self::STENCIL.bits();
        const ALL = Self::COLOR.bits() | Self::DEPTH_STENCIL.bits();
    }
}

/// Parameters of `begin_render_pass`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBeginInfo {
    pub render_pass: RenderPassId,
    pub framebuffer: FramebufferId,
    pub render_area: Rect,
    pub clear_flags: ClearFlags,
    pub clear_color: Color,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

/// Texture sampling filter used by blits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// A texture-to-texture copy requested by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlitTexture {
    pub src: TextureId,
    pub dst: TextureId,
    pub src_region: Rect,
    pub dst_region: Rect,
    pub filter: Filter,
}

/// What a buffer allocated through [`RenderDevice::create_buffer`] is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Per-instance vertex attributes.
    Instance,
    /// Dynamically offset uniform data.
    Uniform,
}

/// Buffer allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Everything a pipeline state depends on from the stage's point of view.
///
/// The device owns compilation; the stage only asks for the state matching
/// this key and the render pass currently being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStateKey {
    pub pass: PassId,
    pub shader: ShaderId,
    pub render_pass: RenderPassId,
    pub input_assembler: InputAssemblerId,
}

/// Resource allocation and pipeline lookup.
///
/// Methods take `&self`; implementations use interior mutability so the device
/// can be shared between the stage and the command buffer recording into it.
pub trait RenderDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> BufferId;

    fn destroy_buffer(&self, buffer: BufferId);

    /// Creates a descriptor set exposing `binding_size` bytes of `buffer` as a
    /// dynamically offset uniform block.
    fn create_uniform_descriptor_set(
        &self,
        buffer: BufferId,
        binding_size: u64,
    ) -> Result<DescriptorSetId>;

    fn destroy_descriptor_set(&self, descriptor_set: DescriptorSetId);

    /// Required alignment of dynamic uniform offsets, in bytes.
    fn uniform_offset_alignment(&self) -> u32;

    /// Returns the pipeline state for `key`, or `None` if the device cannot
    /// provide one (e.g. the shader is not compiled for this render pass).
    fn pipeline_state(&self, key: &PipelineStateKey) -> Option<PipelineStateId>;
}

/// Command recording primitives.
///
/// Binding and draw calls are only meaningful between `begin_render_pass` and
/// `end_render_pass`. Buffer updates are only valid outside of a pass and
/// implementations must reject them with
/// [`StageError::UploadInsideRenderPass`](crate::errors::StageError::UploadInsideRenderPass).
pub trait CommandBuffer {
    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> Result<()>;

    fn end_render_pass(&mut self) -> Result<()>;

    fn is_in_render_pass(&self) -> bool;

    fn bind_pipeline_state(&mut self, pipeline: PipelineStateId);

    fn bind_descriptor_set(
        &mut self,
        set: u32,
        descriptor_set: DescriptorSetId,
        dynamic_offsets: &[u32],
    );

    /// Binds a mesh section, optionally with an instance attribute stream
    /// appended after its vertex streams.
    fn bind_input_assembler(
        &mut self,
        input_assembler: InputAssemblerId,
        instance_buffer: Option<BufferId>,
    );

    /// Draws the bound input assembler `instance_count` times.
    fn draw(&mut self, instance_count: u32);

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    fn blit_texture(&mut self, blit: &BlitTexture);

    fn push_debug_group(&mut self, _label: &str) {}

    fn pop_debug_group(&mut self) {}
}

/// Rounds `value` up to the next multiple of `alignment`.
#[inline]
#[must_use]
pub fn align_to(value: u32, alignment: u32) -> u32 {
    let alignment = alignment.max(1);
    value.div_ceil(alignment) * alignment
}
