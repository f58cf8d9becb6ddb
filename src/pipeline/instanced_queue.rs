//! Instanced draw queue
//!
//! Owns one [`InstancedBuffer`] per instancing pass, keyed by [`PassId`], and
//! the list of buffers that received instances this frame.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::instanced_buffer::InstancedBuffer;
use crate::errors::Result;
use crate::gfx::{
    CommandBuffer, LOCAL_SET, MATERIAL_SET, PipelineStateKey, RenderDevice, RenderPassId,
    ShaderId, TrackedCommandBuffer,
};
use crate::scene::{Pass, PassId, SubModel};
use crate::settings::MAX_INSTANCES_PER_ITEM;

pub struct InstancedQueue {
    buffers: FxHashMap<PassId, InstancedBuffer>,
    queue: Vec<PassId>,
    registered: FxHashSet<PassId>,
    max_instances_per_item: u32,
}

impl Default for InstancedQueue {
    fn default() -> Self {
        Self::new(MAX_INSTANCES_PER_ITEM)
    }
}

impl InstancedQueue {
    #[must_use]
    pub fn new(max_instances_per_item: u32) -> Self {
        Self {
            buffers: FxHashMap::default(),
            queue: Vec::new(),
            registered: FxHashSet::default(),
            max_instances_per_item,
        }
    }

    /// Empties every buffer and the frame's registration list.
    pub fn clear(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }
        self.queue.clear();
        self.registered.clear();
    }

    /// Merges the sub-model into the buffer of `pass`, drawn with the pass's
    /// own shader. The buffer is created on first use.
    pub fn merge(&mut self, sub_model: &SubModel, pass: &Arc<Pass>) -> bool {
        self.merge_with_shader(sub_model, pass, pass.shader)
    }

    /// Like [`merge`](Self::merge) with an explicit shader variant.
    pub fn merge_with_shader(
        &mut self,
        sub_model: &SubModel,
        pass: &Arc<Pass>,
        shader: ShaderId,
    ) -> bool {
        let max = self.max_instances_per_item;
        self.buffers
            .entry(pass.id())
            .or_insert_with(|| InstancedBuffer::new(pass.clone(), max))
            .merge(sub_model, shader)
    }

    /// Registers the buffer of `pass` for recording. Repeated calls within a
    /// frame are ignored.
    pub fn add(&mut self, pass: PassId) {
        if !self.buffers.contains_key(&pass) {
            log::warn!("InstancedQueue::add: no buffer for {pass:?}");
            return;
        }
        if self.registered.insert(pass) {
            self.queue.push(pass);
        }
    }

    /// Registration order, with opaque passes moved ahead of blended ones.
    pub fn sort(&mut self) {
        let buffers = &self.buffers;
        self.queue.sort_by_key(|id| {
            buffers
                .get(id)
                .is_some_and(|buffer| buffer.pass().is_transparent())
        });
    }

    /// Passes registered this frame, in recording order.
    #[must_use]
    pub fn registered(&self) -> &[PassId] {
        &self.queue
    }

    #[must_use]
    pub fn buffer(&self, pass: PassId) -> Option<&InstancedBuffer> {
        self.buffers.get(&pass)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Writes the instance data of every registered buffer. Must be called
    /// outside of a render pass.
    pub fn upload_buffers(
        &mut self,
        device: &dyn RenderDevice,
        cmd: &mut dyn CommandBuffer,
    ) -> Result<()> {
        for id in &self.queue {
            if let Some(buffer) = self.buffers.get_mut(id) {
                buffer.upload(device, cmd)?;
            }
        }
        Ok(())
    }

    /// One instanced draw per non-empty item of every registered buffer.
    pub fn record_command_buffer(
        &self,
        device: &dyn RenderDevice,
        render_pass: RenderPassId,
        cmd: &mut dyn CommandBuffer,
    ) {
        let mut cmd = TrackedCommandBuffer::new(cmd);

        for buffer in self.queue.iter().filter_map(|id| self.buffers.get(id)) {
            let pass = buffer.pass();
            for item in buffer.items() {
                let key = PipelineStateKey {
                    pass: pass.id(),
                    shader: item.shader,
                    render_pass,
                    input_assembler: item.input_assembler,
                };
                let Some(pipeline) = device.pipeline_state(&key) else {
                    log::warn!("InstancedQueue: no pipeline state for {key:?}, skipping draw");
                    continue;
                };

                cmd.bind_pipeline_state(pipeline);
                cmd.bind_descriptor_set(MATERIAL_SET, pass.descriptor_set, &[]);
                cmd.bind_descriptor_set(LOCAL_SET, item.descriptor_set, &[]);
                cmd.bind_input_assembler(item.input_assembler, item.buffer());
                cmd.draw(item.count());
            }
        }
    }

    /// Releases every GPU buffer. The queue can be reused afterwards.
    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        for buffer in self.buffers.values_mut() {
            buffer.destroy(device);
        }
        self.buffers.clear();
        self.queue.clear();
        self.registered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::{Command, CommandCapture, HeadlessDevice};
    use crate::scene::{BatchingScheme, BlendMode, PhaseRegistry};

    fn instancing_pass(device: &HeadlessDevice, blend: BlendMode) -> Arc<Pass> {
        let registry = PhaseRegistry::with_builtins();
        Arc::new(
            Pass::new(
                registry.resolve("default").unwrap(),
                device.create_shader("instanced"),
                device.create_descriptor_set("material"),
            )
            .with_batching(BatchingScheme::Instancing)
            .with_blend(blend),
        )
    }

    fn sub_model(device: &HeadlessDevice, pass: &Arc<Pass>) -> SubModel {
        SubModel::new(
            device.create_input_assembler("mesh"),
            device.create_descriptor_set("local"),
        )
        .with_pass(pass.clone())
        .with_instance_attributes(vec![1u8; 16])
    }

    #[test]
    fn add_registers_once() {
        let device = HeadlessDevice::new();
        let pass = instancing_pass(&device, BlendMode::Opaque);
        let sm = sub_model(&device, &pass);
        let mut queue = InstancedQueue::default();
        for _ in 0..3 {
            queue.merge(&sm, &pass);
            queue.add(pass.id());
        }
        assert_eq!(queue.registered(), &[pass.id()]);
        assert_eq!(queue.buffer(pass.id()).unwrap().instance_count(), 3);
    }

    #[test]
    fn sort_puts_opaque_first() {
        let device = HeadlessDevice::new();
        let blended = instancing_pass(&device, BlendMode::Transparent);
        let opaque_a = instancing_pass(&device, BlendMode::Opaque);
        let opaque_b = instancing_pass(&device, BlendMode::Opaque);
        let mut queue = InstancedQueue::default();
        for pass in [&blended, &opaque_a, &opaque_b] {
            queue.merge(&sub_model(&device, pass), pass);
            queue.add(pass.id());
        }
        queue.sort();
        assert_eq!(
            queue.registered(),
            &[opaque_a.id(), opaque_b.id(), blended.id()]
        );
    }

    #[test]
    fn records_one_draw_per_item() {
        let device = HeadlessDevice::new();
        let render_pass = device.create_render_pass("main");
        let pass = instancing_pass(&device, BlendMode::Opaque);
        let sm = sub_model(&device, &pass);
        let mut queue = InstancedQueue::default();
        for _ in 0..10 {
            queue.merge(&sm, &pass);
        }
        queue.add(pass.id());

        let mut cmd = CommandCapture::new();
        queue.upload_buffers(&device, &mut cmd).unwrap();
        queue.record_command_buffer(&device, render_pass, &mut cmd);

        let draws: Vec<_> = cmd
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .collect();
        assert_eq!(draws, vec![&Command::Draw { instance_count: 10 }]);
    }

    #[test]
    fn clear_resets_registration() {
        let device = HeadlessDevice::new();
        let pass = instancing_pass(&device, BlendMode::Opaque);
        let sm = sub_model(&device, &pass);
        let mut queue = InstancedQueue::default();
        queue.merge(&sm, &pass);
        queue.add(pass.id());
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.buffer(pass.id()).unwrap().is_empty());
    }
}
