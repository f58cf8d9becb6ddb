//! Overlay hooks
//!
//! Geometry helpers, UI, profiler and debug drawing are recorded by external
//! renderers after the scene and blits, inside the stage's render pass.

use crate::gfx::{CommandBuffer, RenderDevice, RenderPassId};
use crate::scene::{Camera, PipelineSceneData};

/// Slot of an overlay in the recording order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OverlayKind {
    Geometry,
    Ui,
    Profiler,
    Debug,
}

impl OverlayKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Geometry => "Geometry Renderer",
            Self::Ui => "UI",
            Self::Profiler => "Profiler",
            Self::Debug => "Debug Renderer",
        }
    }
}

/// A renderer recorded after the scene geometry.
///
/// Hooks are always invoked in [`OverlayKind`] order; the hook decides through
/// [`is_enabled_for`](Self::is_enabled_for) whether it has anything to draw.
pub trait OverlayRenderer: Send {
    fn kind(&self) -> OverlayKind;

    fn is_enabled_for(&self, _camera: &Camera) -> bool {
        true
    }

    fn render(
        &mut self,
        device: &dyn RenderDevice,
        scene: &PipelineSceneData,
        camera: &Camera,
        render_pass: RenderPassId,
        cmd: &mut dyn CommandBuffer,
    );
}

/// Registered overlays, kept in recording order.
#[derive(Default)]
pub struct OverlayList {
    overlays: Vec<Box<dyn OverlayRenderer>>,
}

impl OverlayList {
    /// Inserts after every overlay of the same or an earlier kind.
    pub fn add(&mut self, overlay: Box<dyn OverlayRenderer>) {
        let kind = overlay.kind();
        let index = self.overlays.partition_point(|o| o.kind() <= kind);
        self.overlays.insert(index, overlay);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn clear(&mut self) {
        self.overlays.clear();
    }

    pub fn render(
        &mut self,
        device: &dyn RenderDevice,
        scene: &PipelineSceneData,
        camera: &Camera,
        render_pass: RenderPassId,
        cmd: &mut dyn CommandBuffer,
    ) {
        for overlay in &mut self.overlays {
            if !overlay.is_enabled_for(camera) {
                continue;
            }
            cmd.push_debug_group(overlay.kind().label());
            overlay.render(device, scene, camera, render_pass, cmd);
            cmd.pop_debug_group();
        }
    }
}
