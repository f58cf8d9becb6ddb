//! Primary render queue
//!
//! A [`RenderQueue`] accepts draw units whose pass matches its phase mask and
//! transparency, sorts them with a fixed comparison function and records one
//! draw per unit.

use std::cmp::Ordering;

use crate::gfx::{
    CommandBuffer, LOCAL_SET, MATERIAL_SET, PipelineStateKey, RenderDevice, RenderPassId,
    TrackedCommandBuffer,
};
use crate::scene::{PhaseMask, PipelineSceneData, RenderObject};
use crate::settings::RenderQueueSortMode;

/// One `(render object, sub-model, pass)` combination with its sort keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawUnit {
    pub object_index: u32,
    pub sub_model_index: u32,
    pub pass_index: u32,
    pub priority: u8,
    pub depth: f32,
    /// Insertion order within the frame; the final tie-breaker.
    pub sequence: u32,
}

pub type RenderQueueSortFunc = fn(&DrawUnit, &DrawUnit) -> Ordering;

/// Priority, then nearest first, then insertion order.
#[must_use]
pub fn opaque_compare(a: &DrawUnit, b: &DrawUnit) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.depth.total_cmp(&b.depth))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

/// Priority, then farthest first, then insertion order.
#[must_use]
pub fn transparent_compare(a: &DrawUnit, b: &DrawUnit) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.depth.total_cmp(&a.depth))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

impl RenderQueueSortMode {
    #[must_use]
    pub fn compare_fn(self) -> RenderQueueSortFunc {
        match self {
            Self::FrontToBack => opaque_compare,
            Self::BackToFront => transparent_compare,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderQueueCreateInfo {
    pub is_transparent: bool,
    pub phases: PhaseMask,
    pub sort_func: RenderQueueSortFunc,
}

pub struct RenderQueue {
    info: RenderQueueCreateInfo,
    units: Vec<DrawUnit>,
}

impl RenderQueue {
    #[must_use]
    pub fn new(info: RenderQueueCreateInfo) -> Self {
        Self {
            info,
            units: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.info.is_transparent
    }

    #[must_use]
    pub fn phases(&self) -> PhaseMask {
        self.info.phases
    }

    pub fn clear(&mut self) {
        self.units.clear();
    }

    /// Appends the unit if the pass is in this queue's phases and its blend
    /// state matches the queue. Returns whether it was accepted.
    pub fn insert(
        &mut self,
        object_index: usize,
        render_object: &RenderObject,
        sub_model_index: usize,
        pass_index: usize,
    ) -> bool {
        let Some((_, pass)) = render_object.pass(sub_model_index, pass_index) else {
            log::error!(
                "RenderQueue::insert: object {object_index} has no pass ({sub_model_index}, {pass_index})"
            );
            return false;
        };

        if !self.info.phases.contains(pass.phase)
            || pass.is_transparent() != self.info.is_transparent
        {
            return false;
        }

        self.units.push(DrawUnit {
            object_index: object_index as u32,
            sub_model_index: sub_model_index as u32,
            pass_index: pass_index as u32,
            priority: pass.priority,
            depth: render_object.depth,
            sequence: self.units.len() as u32,
        });
        true
    }

    /// Stable sort with the configured comparison.
    pub fn sort(&mut self) {
        self.units.sort_by(self.info.sort_func);
    }

    #[must_use]
    pub fn units(&self) -> &[DrawUnit] {
        &self.units
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Records one draw per unit in sorted order.
    pub fn record_command_buffer(
        &self,
        device: &dyn RenderDevice,
        scene: &PipelineSceneData,
        render_pass: RenderPassId,
        cmd: &mut dyn CommandBuffer,
    ) {
        let mut cmd = TrackedCommandBuffer::new(cmd);

        for unit in &self.units {
            let resolved = scene
                .render_objects
                .get(unit.object_index as usize)
                .and_then(|ro| ro.pass(unit.sub_model_index as usize, unit.pass_index as usize));
            let Some((sub_model, pass)) = resolved else {
                debug_assert!(false, "draw unit {unit:?} references a missing pass");
                log::error!("RenderQueue: draw unit {unit:?} references a missing pass, skipping");
                continue;
            };

            let key = PipelineStateKey {
                pass: pass.id(),
                shader: pass.shader,
                render_pass,
                input_assembler: sub_model.input_assembler,
            };
            let Some(pipeline) = device.pipeline_state(&key) else {
                log::warn!("RenderQueue: no pipeline state for {key:?}, skipping draw");
                continue;
            };

            cmd.bind_pipeline_state(pipeline);
            cmd.bind_descriptor_set(MATERIAL_SET, pass.descriptor_set, &[]);
            cmd.bind_descriptor_set(LOCAL_SET, sub_model.descriptor_set, &[]);
            cmd.bind_input_assembler(sub_model.input_assembler, None);
            cmd.draw(1);
        }
    }
}
