//! State-tracking command buffer
//!
//! Wraps another [`CommandBuffer`] and drops binds that would not change the
//! bound state. Queues create one per recording, so tracking never spans two
//! queues: state bound by the stage between queues is always re-emitted.

use smallvec::SmallVec;

use super::{
    BlitTexture, BufferId, CommandBuffer, DescriptorSetId, InputAssemblerId, PipelineStateId,
    RenderPassBeginInfo,
};
use crate::errors::Result;

const MAX_SETS: usize = 4;

// Dynamic offsets are few per set; keep them inline.
#[derive(Clone, PartialEq)]
struct DescriptorSetState {
    id: DescriptorSetId,
    offsets: SmallVec<[u32; 4]>,
}

pub struct TrackedCommandBuffer<'a> {
    inner: &'a mut dyn CommandBuffer,
    current_pipeline: Option<PipelineStateId>,
    current_sets: [Option<DescriptorSetState>; MAX_SETS],
    current_input: Option<(InputAssemblerId, Option<BufferId>)>,
    skipped: u32,
}

impl<'a> TrackedCommandBuffer<'a> {
    #[must_use]
    pub fn new(inner: &'a mut dyn CommandBuffer) -> Self {
        Self {
            inner,
            current_pipeline: None,
            current_sets: Default::default(),
            current_input: None,
            skipped: 0,
        }
    }

    /// Forgets all bound state. The next bind of every kind is emitted.
    pub fn invalidate(&mut self) {
        self.current_pipeline = None;
        self.current_sets = Default::default();
        self.current_input = None;
    }

    /// Number of binds filtered so far.
    #[must_use]
    pub fn skipped_binds(&self) -> u32 {
        self.skipped
    }
}

impl CommandBuffer for TrackedCommandBuffer<'_> {
    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> Result<()> {
        self.invalidate();
        self.inner.begin_render_pass(info)
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.invalidate();
        self.inner.end_render_pass()
    }

    fn is_in_render_pass(&self) -> bool {
        self.inner.is_in_render_pass()
    }

    fn bind_pipeline_state(&mut self, pipeline: PipelineStateId) {
        if self.current_pipeline == Some(pipeline) {
            self.skipped += 1;
            return;
        }
        self.inner.bind_pipeline_state(pipeline);
        self.current_pipeline = Some(pipeline);
    }

    fn bind_descriptor_set(
        &mut self,
        set: u32,
        descriptor_set: DescriptorSetId,
        dynamic_offsets: &[u32],
    ) {
        let slot = set as usize;
        if slot >= MAX_SETS {
            self.inner
                .bind_descriptor_set(set, descriptor_set, dynamic_offsets);
            return;
        }

        let needs_update = match &self.current_sets[slot] {
            Some(state) => state.id != descriptor_set || state.offsets.as_slice() != dynamic_offsets,
            None => true,
        };

        if needs_update {
            self.inner
                .bind_descriptor_set(set, descriptor_set, dynamic_offsets);
            self.current_sets[slot] = Some(DescriptorSetState {
                id: descriptor_set,
                offsets: SmallVec::from_slice(dynamic_offsets),
            });
        } else {
            self.skipped += 1;
        }
    }

    fn bind_input_assembler(
        &mut self,
        input_assembler: InputAssemblerId,
        instance_buffer: Option<BufferId>,
    ) {
        let key = (input_assembler, instance_buffer);
        if self.current_input == Some(key) {
            self.skipped += 1;
            return;
        }
        self.inner
            .bind_input_assembler(input_assembler, instance_buffer);
        self.current_input = Some(key);
    }

    fn draw(&mut self, instance_count: u32) {
        self.inner.draw(instance_count);
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.update_buffer(buffer, offset, data)
    }

    fn blit_texture(&mut self, blit: &BlitTexture) {
        self.inner.blit_texture(blit);
    }

    fn push_debug_group(&mut self, label: &str) {
        self.inner.push_debug_group(label);
    }

    fn pop_debug_group(&mut self) {
        self.inner.pop_debug_group();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{Command, CommandCapture};
    use slotmap::KeyData;

    fn ds(n: u64) -> DescriptorSetId {
        DescriptorSetId::from(KeyData::from_ffi(n))
    }

    #[test]
    fn filters_repeated_binds() {
        let mut capture = CommandCapture::new();
        let pso = PipelineStateId::from(KeyData::from_ffi(1));
        let ia = InputAssemblerId::from(KeyData::from_ffi(1));
        {
            let mut cmd = TrackedCommandBuffer::new(&mut capture);
            cmd.bind_pipeline_state(pso);
            cmd.bind_pipeline_state(pso);
            cmd.bind_descriptor_set(1, ds(1), &[]);
            cmd.bind_descriptor_set(1, ds(1), &[]);
            cmd.bind_input_assembler(ia, None);
            cmd.bind_input_assembler(ia, None);
            cmd.draw(1);
            assert_eq!(cmd.skipped_binds(), 3);
        }
        assert_eq!(capture.commands().len(), 4);
    }

    #[test]
    fn offsets_are_part_of_the_state() {
        let mut capture = CommandCapture::new();
        {
            let mut cmd = TrackedCommandBuffer::new(&mut capture);
            cmd.bind_descriptor_set(0, ds(1), &[0]);
            cmd.bind_descriptor_set(0, ds(1), &[256]);
            cmd.bind_descriptor_set(0, ds(1), &[256]);
        }
        let binds: Vec<_> = capture
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::BindDescriptorSet { .. }))
            .collect();
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn invalidate_reemits_state() {
        let mut capture = CommandCapture::new();
        let pso = PipelineStateId::from(KeyData::from_ffi(1));
        {
            let mut cmd = TrackedCommandBuffer::new(&mut capture);
            cmd.bind_pipeline_state(pso);
            cmd.invalidate();
            cmd.bind_pipeline_state(pso);
        }
        assert_eq!(capture.commands().len(), 2);
    }
}
