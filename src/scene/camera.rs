use glam::{Mat4, Vec3, Vec4};

use crate::gfx::{
    BlitTexture, ClearFlags, Color, FramebufferId, Rect, RenderPassBeginInfo, RenderPassId,
};

/// The surface a camera renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderWindow {
    pub width: u32,
    pub height: u32,
    pub framebuffer: FramebufferId,
    /// Render pass compatible with `framebuffer`.
    pub render_pass: RenderPassId,
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub name: String,

    position: Vec3,
    forward: Vec3,

    fov: f32,
    aspect: f32,
    near: f32,
    far: f32,

    view_matrix: Mat4,
    projection_matrix: Mat4,
    view_projection_matrix: Mat4,
    frustum: Frustum,

    /// Normalized `(x, y, width, height)` of the window.
    pub viewport: Vec4,
    pub clear_flags: ClearFlags,
    pub clear_color: Color,
    pub clear_depth: f32,
    pub clear_stencil: u32,

    pub window: RenderWindow,
    /// Replaces the window's render pass when set.
    pub render_pass: Option<RenderPassId>,
    /// Copies recorded after the scene geometry.
    pub blit_textures: Vec<BlitTexture>,
    /// Layer mask a model must share to be rendered.
    pub visibility: u32,
}

impl Camera {
    /// `fov` is in degrees.
    #[must_use]
    pub fn new_perspective(fov: f32, near: f32, far: f32, window: RenderWindow) -> Self {
        let aspect = if window.height == 0 {
            1.0
        } else {
            window.width as f32 / window.height as f32
        };
        let mut cam = Self {
            name: "Camera".to_string(),
            position: Vec3::ZERO,
            forward: Vec3::NEG_Z,
            fov: fov.to_radians(),
            aspect,
            near,
            far,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            frustum: Frustum::default(),
            viewport: Vec4::new(0.0, 0.0, 1.0, 1.0),
            clear_flags: ClearFlags::ALL,
            clear_color: Color::BLACK,
            clear_depth: 1.0,
            clear_stencil: 0,
            window,
            render_pass: None,
            blit_textures: Vec::new(),
            visibility: u32::MAX,
        };
        cam.update_projection_matrix();
        cam
    }

    pub fn update_projection_matrix(&mut self) {
        // glam's perspective_rh targets a [0, 1] depth range, matching wgpu.
        self.projection_matrix = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        self.update_view_projection();
    }

    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.position = eye;
        self.forward = (target - eye).normalize_or(Vec3::NEG_Z);
        self.view_matrix = Mat4::look_at_rh(eye, target, up);
        self.update_view_projection();
    }

    fn update_view_projection(&mut self) {
        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = Frustum::from_matrix(self.view_projection_matrix);
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    #[inline]
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        self.view_matrix
    }

    #[inline]
    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.view_projection_matrix
    }

    #[inline]
    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    /// Distance of `point` along the view direction.
    #[inline]
    #[must_use]
    pub fn depth_of(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.forward)
    }

    /// The render pass to record into: the override if any, else the window's.
    #[must_use]
    pub fn active_render_pass(&self) -> RenderPassId {
        self.render_pass.unwrap_or(self.window.render_pass)
    }

    /// Viewport scaled to the window size and the pipeline's shading scale.
    #[must_use]
    pub fn render_area(&self, shading_scale: f32) -> Rect {
        let w = self.window.width as f32 * shading_scale;
        let h = self.window.height as f32 * shading_scale;
        Rect {
            x: (self.viewport.x * w) as i32,
            y: (self.viewport.y * h) as i32,
            width: (self.viewport.z * w) as u32,
            height: (self.viewport.w * h) as u32,
        }
    }

    #[must_use]
    pub fn render_pass_begin_info(&self, shading_scale: f32) -> RenderPassBeginInfo {
        RenderPassBeginInfo {
            render_pass: self.active_render_pass(),
            framebuffer: self.window.framebuffer,
            render_area: self.render_area(shading_scale),
            clear_flags: self.clear_flags,
            clear_color: self.clear_color,
            clear_depth: self.clear_depth,
            clear_stencil: self.clear_stencil,
        }
    }
}

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    planes: [Vec4; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Frustum {
    /// Gribb-Hartmann plane extraction. Assumes a [0, 1] clip depth range.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[2],
            rows[3] - rows[2],
        ];

        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > f32::EPSILON {
                *plane /= length;
            }
        }

        Self { planes }
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }

    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let extents = aabb.half_extents();
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let radius = extents.dot(normal.abs());
            normal.dot(center) + plane.w >= -radius
        })
    }
}
