use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;

use super::model::Pass;
use crate::gfx::Color;

static NEXT_LIGHT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone)]
pub struct DirectionalLight {}

#[derive(Debug, Clone)]
pub struct SphereLight {
    pub range: f32,
    /// Radius of the emitting sphere.
    pub size: f32,
}

#[derive(Debug, Clone)]
pub struct SpotLight {
    pub range: f32,
    pub size: f32,
    /// Full cone angle, in radians.
    pub angle: f32,
}

#[derive(Debug, Clone)]
pub enum LightKind {
    Directional(DirectionalLight),
    Sphere(SphereLight),
    Spot(SpotLight),
}

#[derive(Debug, Clone)]
pub struct Light {
    pub id: u32,
    pub kind: LightKind,
    pub position: Vec3,
    /// Direction the light travels in (unused by sphere lights).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    fn with_kind(kind: LightKind, color: Vec3, intensity: f32) -> Self {
        Self {
            id: NEXT_LIGHT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            color,
            intensity,
        }
    }

    #[must_use]
    pub fn new_directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        let mut light = Self::with_kind(LightKind::Directional(DirectionalLight {}), color, intensity);
        light.direction = direction.normalize_or(Vec3::NEG_Y);
        light
    }

    #[must_use]
    pub fn new_sphere(position: Vec3, range: f32, color: Vec3, intensity: f32) -> Self {
        let mut light = Self::with_kind(
            LightKind::Sphere(SphereLight { range, size: 0.15 }),
            color,
            intensity,
        );
        light.position = position;
        light
    }

    #[must_use]
    pub fn new_spot(
        position: Vec3,
        direction: Vec3,
        range: f32,
        angle: f32,
        color: Vec3,
        intensity: f32,
    ) -> Self {
        let mut light = Self::with_kind(
            LightKind::Spot(SpotLight {
                range,
                size: 0.15,
                angle,
            }),
            color,
            intensity,
        );
        light.position = position;
        light.direction = direction.normalize_or(Vec3::NEG_Y);
        light
    }

    /// Influence radius of local lights; `None` for directional lights.
    #[must_use]
    pub fn range(&self) -> Option<f32> {
        match &self.kind {
            LightKind::Directional(_) => None,
            LightKind::Sphere(s) => Some(s.range),
            LightKind::Spot(s) => Some(s.range),
        }
    }

    #[must_use]
    pub fn size(&self) -> f32 {
        match &self.kind {
            LightKind::Directional(_) => 0.0,
            LightKind::Sphere(s) => s.size,
            LightKind::Spot(s) => s.size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowType {
    #[default]
    Planar,
    ShadowMap,
}

/// Scene-wide shadow configuration.
#[derive(Debug, Clone)]
pub struct Shadows {
    pub enabled: bool,
    pub kind: ShadowType,
    /// Normal of the receiving plane.
    pub normal: Vec3,
    /// Signed distance of the receiving plane from the origin.
    pub distance: f32,
    pub color: Color,
    /// Material pass used to draw planar shadows.
    pub material_pass: Option<Arc<Pass>>,
}

impl Default for Shadows {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ShadowType::Planar,
            normal: Vec3::Y,
            distance: 0.0,
            color: Color::new(0.0, 0.0, 0.0, 0.3),
            material_pass: None,
        }
    }
}

impl Shadows {
    /// Whether planar shadows can be drawn at all.
    #[must_use]
    pub fn planar_active(&self) -> bool {
        self.enabled
            && self.kind == ShadowType::Planar
            && self.normal.length() >= 1e-6
            && self.material_pass.is_some()
    }
}
