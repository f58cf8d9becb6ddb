//! Uniform blocks and dynamic uniform storage
//!
//! - [`CameraUniforms`] / [`LightUniforms`]: `Pod` blocks uploaded as-is.
//! - [`DynamicUniformBuffer`]: one GPU buffer holding many blocks at
//!   device-aligned strides, addressed through dynamic offsets.
//! - [`PipelineUbo`]: the global set (set 0) with one camera slot per render.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::errors::Result;
use crate::gfx::{
    BufferDesc, BufferId, BufferUsage, CommandBuffer, DescriptorSetId, RenderDevice, align_to,
};
use crate::scene::{Camera, Light, LightKind, PipelineSceneData};

/// Offset added to the receiving plane so shadows do not z-fight with it.
const PLANAR_SHADOW_BIAS: f32 = 0.001;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// Flattens geometry onto the planar shadow receiver.
    pub planar_shadow: Mat4,
    /// xyz: camera position, w: shading scale.
    pub camera_position: Vec4,
    pub shadow_color: Vec4,
    /// xyz: receiver normal, w: receiver distance.
    pub shadow_plane: Vec4,
    /// Render area in pixels: x, y, width, height.
    pub viewport: Vec4,
}

impl CameraUniforms {
    #[must_use]
    pub fn new(camera: &Camera, scene: &PipelineSceneData) -> Self {
        let shadows = &scene.shadows;
        let planar_shadow = scene
            .main_light
            .as_ref()
            .filter(|_| shadows.planar_active())
            .map_or(Mat4::IDENTITY, |light| {
                planar_shadow_matrix(shadows.normal, shadows.distance, light.direction)
            });
        let area = camera.render_area(scene.shading_scale);

        Self {
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            view_projection: camera.view_projection_matrix(),
            planar_shadow,
            camera_position: camera.position().extend(scene.shading_scale),
            shadow_color: shadows.color.to_vec4(),
            shadow_plane: shadows.normal.normalize_or_zero().extend(shadows.distance),
            viewport: Vec4::new(
                area.x as f32,
                area.y as f32,
                area.width as f32,
                area.height as f32,
            ),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct LightUniforms {
    /// xyz: position, w: emitter size.
    pub position_size: Vec4,
    /// rgb: color scaled by intensity.
    pub color: Vec4,
    /// xyz: direction, w: cosine of the spot half angle (0 for sphere lights).
    pub direction_angle: Vec4,
    /// x: range.
    pub range: Vec4,
}

impl LightUniforms {
    #[must_use]
    pub fn new(light: &Light) -> Self {
        let spot_cos = match &light.kind {
            LightKind::Spot(spot) => (spot.angle * 0.5).cos(),
            _ => 0.0,
        };
        Self {
            position_size: light.position.extend(light.size()),
            color: (light.color * light.intensity).extend(1.0),
            direction_angle: light.direction.extend(spot_cos),
            range: Vec4::new(light.range().unwrap_or(0.0), 0.0, 0.0, 0.0),
        }
    }
}

/// Projects points onto the plane `dot(normal, p) = distance` along
/// `light_dir`. Returns identity when the light is parallel to the plane.
#[must_use]
pub fn planar_shadow_matrix(normal: Vec3, distance: f32, light_dir: Vec3) -> Mat4 {
    let n = normal;
    let d = distance + PLANAR_SHADOW_BIAS;
    let n_dot_l = n.dot(light_dir);
    if n_dot_l.abs() < 1e-6 {
        return Mat4::IDENTITY;
    }
    let l = light_dir / n_dot_l;

    Mat4::from_cols(
        Vec4::new(1.0 - n.x * l.x, -n.x * l.y, -n.x * l.z, 0.0),
        Vec4::new(-n.y * l.x, 1.0 - n.y * l.y, -n.y * l.z, 0.0),
        Vec4::new(-n.z * l.x, -n.z * l.y, 1.0 - n.z * l.z, 0.0),
        Vec4::new(l.x * d, l.y * d, l.z * d, 1.0),
    )
}

// ============================================================================
// DynamicUniformBuffer
// ============================================================================

/// CPU staging plus a GPU buffer of equally sized uniform blocks.
///
/// Blocks are pushed between [`begin`](Self::begin) and
/// [`upload`](Self::upload); each push returns the block's dynamic offset.
/// The GPU buffer grows by doubling and never shrinks.
pub struct DynamicUniformBuffer {
    label: &'static str,
    element_size: u32,
    stride: u32,
    capacity: u32,
    staging: Vec<u8>,
    buffer: Option<BufferId>,
    descriptor_set: Option<DescriptorSetId>,
    // Replaced allocations may still be referenced by recorded commands.
    retired: Vec<(BufferId, DescriptorSetId)>,
}

impl DynamicUniformBuffer {
    #[must_use]
    pub fn new<T: Pod>(label: &'static str) -> Self {
        let element_size = std::mem::size_of::<T>() as u32;
        Self {
            label,
            element_size,
            stride: element_size,
            capacity: 0,
            staging: Vec::new(),
            buffer: None,
            descriptor_set: None,
            retired: Vec::new(),
        }
    }

    /// Drops staged blocks and adopts the device's offset alignment.
    pub fn begin(&mut self, device: &dyn RenderDevice) {
        self.staging.clear();
        let stride = align_to(self.element_size, device.uniform_offset_alignment());
        if stride != self.stride {
            self.stride = stride;
            self.capacity = 0;
            self.retire_allocation();
        }
    }

    /// Stages `value` and returns its dynamic offset.
    pub fn push<T: Pod>(&mut self, value: &T) -> u32 {
        let offset = self.staging.len() as u32;
        let bytes = bytemuck::bytes_of(value);
        debug_assert_eq!(bytes.len() as u32, self.element_size);
        self.staging.extend_from_slice(bytes);
        self.staging.resize((offset + self.stride) as usize, 0);
        offset
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.staging.len() as u32 / self.stride.max(1)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    #[must_use]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    #[must_use]
    pub fn descriptor_set(&self) -> Option<DescriptorSetId> {
        self.descriptor_set
    }

    #[must_use]
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Grows the GPU buffer if needed and writes every staged block.
    pub fn upload(&mut self, device: &dyn RenderDevice, cmd: &mut dyn CommandBuffer) -> Result<()> {
        if self.staging.is_empty() {
            return Ok(());
        }
        self.ensure_capacity(device, self.len())?;
        if let Some(buffer) = self.buffer {
            cmd.update_buffer(buffer, 0, &self.staging)?;
        }
        Ok(())
    }

    fn ensure_capacity(&mut self, device: &dyn RenderDevice, required: u32) -> Result<()> {
        if self.buffer.is_some() && required <= self.capacity {
            return Ok(());
        }

        let mut capacity = self.capacity.max(1);
        while capacity < required {
            capacity = capacity.saturating_mul(2);
        }

        self.retire_allocation();
        let buffer = device.create_buffer(&BufferDesc {
            label: self.label,
            size: u64::from(self.stride) * u64::from(capacity),
            usage: BufferUsage::Uniform,
        });
        let descriptor_set =
            device.create_uniform_descriptor_set(buffer, u64::from(self.element_size))?;
        log::debug!(
            "{}: uniform buffer grown to {capacity} blocks of {} bytes",
            self.label,
            self.stride
        );

        self.buffer = Some(buffer);
        self.descriptor_set = Some(descriptor_set);
        self.capacity = capacity;
        Ok(())
    }

    fn retire_allocation(&mut self) {
        if let (Some(buffer), Some(descriptor_set)) =
            (self.buffer.take(), self.descriptor_set.take())
        {
            self.retired.push((buffer, descriptor_set));
        }
    }

    /// Frees allocations replaced by a grow. Only safe once the commands
    /// recorded against them have been submitted.
    pub fn release_retired(&mut self, device: &dyn RenderDevice) {
        for (buffer, descriptor_set) in self.retired.drain(..) {
            device.destroy_descriptor_set(descriptor_set);
            device.destroy_buffer(buffer);
        }
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        self.retire_allocation();
        self.release_retired(device);
        self.staging.clear();
        self.capacity = 0;
    }
}

// ============================================================================
// PipelineUbo
// ============================================================================

/// Owner of the global set: per-camera uniforms addressed by dynamic offset.
pub struct PipelineUbo {
    cameras: DynamicUniformBuffer,
    current_camera_offset: u32,
}

impl Default for PipelineUbo {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineUbo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cameras: DynamicUniformBuffer::new::<CameraUniforms>("Pipeline Camera UBO"),
            current_camera_offset: 0,
        }
    }

    /// Starts a frame: every camera slot is released.
    pub fn next_frame(&mut self, device: &dyn RenderDevice) {
        self.cameras.release_retired(device);
        self.cameras.begin(device);
        self.current_camera_offset = 0;
    }

    /// Allocates and uploads a slot for `camera`. Must be called outside of a
    /// render pass. Returns the slot's dynamic offset.
    pub fn update_camera(
        &mut self,
        device: &dyn RenderDevice,
        cmd: &mut dyn CommandBuffer,
        camera: &Camera,
        scene: &PipelineSceneData,
    ) -> Result<u32> {
        let offset = self.cameras.push(&CameraUniforms::new(camera, scene));
        self.cameras.upload(device, cmd)?;
        self.current_camera_offset = offset;
        Ok(offset)
    }

    #[must_use]
    pub fn current_camera_offset(&self) -> u32 {
        self.current_camera_offset
    }

    /// The global set; `None` until a camera has been uploaded.
    #[must_use]
    pub fn descriptor_set(&self) -> Option<DescriptorSetId> {
        self.cameras.descriptor_set()
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        self.cameras.destroy(device);
    }
}
