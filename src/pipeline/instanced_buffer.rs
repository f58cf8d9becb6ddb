//! Per-pass instance data
//!
//! An [`InstancedBuffer`] collects the instance attributes of every sub-model
//! drawn with one instancing pass. Sub-models that share an input assembler,
//! local descriptor set, shader and attribute stride end up in the same
//! [`InstancedItem`] and are drawn with a single instanced call.

use std::sync::Arc;

use crate::errors::Result;
use crate::gfx::{
    BufferDesc, BufferId, BufferUsage, CommandBuffer, DescriptorSetId, InputAssemblerId,
    RenderDevice, ShaderId,
};
use crate::scene::{Pass, SubModel};

/// One instanced draw: a run of instances with identical bindings.
#[derive(Debug)]
pub struct InstancedItem {
    pub input_assembler: InputAssemblerId,
    pub descriptor_set: DescriptorSetId,
    pub shader: ShaderId,
    pub stride: u32,
    count: u32,
    data: Vec<u8>,
    buffer: Option<BufferId>,
    /// Instances the GPU buffer can hold.
    capacity: u32,
}

impl InstancedItem {
    fn matches(&self, sub_model: &SubModel, shader: ShaderId) -> bool {
        self.input_assembler == sub_model.input_assembler
            && self.descriptor_set == sub_model.descriptor_set
            && self.shader == shader
            && self.stride == sub_model.instance_stride()
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    fn ensure_capacity(&mut self, device: &dyn RenderDevice) {
        if self.buffer.is_some() && self.count <= self.capacity {
            return;
        }
        let mut capacity = self.capacity.max(1);
        while capacity < self.count {
            capacity = capacity.saturating_mul(2);
        }
        if let Some(old) = self.buffer.take() {
            device.destroy_buffer(old);
        }
        self.buffer = Some(device.create_buffer(&BufferDesc {
            label: "Instanced Attributes",
            size: u64::from(self.stride) * u64::from(capacity),
            usage: BufferUsage::Instance,
        }));
        self.capacity = capacity;
    }
}

pub struct InstancedBuffer {
    pass: Arc<Pass>,
    items: Vec<InstancedItem>,
    max_instances_per_item: u32,
}

impl InstancedBuffer {
    #[must_use]
    pub fn new(pass: Arc<Pass>, max_instances_per_item: u32) -> Self {
        Self {
            pass,
            items: Vec::new(),
            max_instances_per_item: max_instances_per_item.max(1),
        }
    }

    #[must_use]
    pub fn pass(&self) -> &Arc<Pass> {
        &self.pass
    }

    /// Appends the sub-model's instance attributes. Returns `false` if the
    /// sub-model has no attribute block and cannot be instanced.
    pub fn merge(&mut self, sub_model: &SubModel, shader: ShaderId) -> bool {
        if sub_model.instance_attributes.is_empty() {
            log::warn!(
                "Sub-model with input assembler {:?} has no instance attributes, not instancing",
                sub_model.input_assembler
            );
            return false;
        }

        let max = self.max_instances_per_item;
        let slot = self
            .items
            .iter()
            .position(|item| item.count < max && item.matches(sub_model, shader))
            .or_else(|| self.items.iter().position(|item| item.count == 0));

        let item = match slot {
            Some(index) => &mut self.items[index],
            None => {
                self.items.push(InstancedItem {
                    input_assembler: sub_model.input_assembler,
                    descriptor_set: sub_model.descriptor_set,
                    shader,
                    stride: sub_model.instance_stride(),
                    count: 0,
                    data: Vec::new(),
                    buffer: None,
                    capacity: 0,
                });
                let last = self.items.len() - 1;
                &mut self.items[last]
            }
        };

        if item.count == 0 && !item.matches(sub_model, shader) {
            // Reusing an idle item for a new binding combination.
            if item.stride != sub_model.instance_stride() {
                item.capacity = 0;
            }
            item.input_assembler = sub_model.input_assembler;
            item.descriptor_set = sub_model.descriptor_set;
            item.shader = shader;
            item.stride = sub_model.instance_stride();
        }

        item.data.extend_from_slice(&sub_model.instance_attributes);
        item.count += 1;
        true
    }

    /// Forgets merged instances; GPU buffers and CPU capacity are kept.
    pub fn clear(&mut self) {
        for item in &mut self.items {
            item.count = 0;
            item.data.clear();
        }
    }

    /// Items holding at least one instance.
    pub fn items(&self) -> impl Iterator<Item = &InstancedItem> {
        self.items.iter().filter(|item| item.count > 0)
    }

    #[must_use]
    pub fn instance_count(&self) -> u32 {
        self.items.iter().map(|item| item.count).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|item| item.count == 0)
    }

    pub fn upload(&mut self, device: &dyn RenderDevice, cmd: &mut dyn CommandBuffer) -> Result<()> {
        for item in self.items.iter_mut().filter(|item| item.count > 0) {
            item.ensure_capacity(device);
            if let Some(buffer) = item.buffer {
                cmd.update_buffer(buffer, 0, &item.data)?;
            }
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &dyn RenderDevice) {
        for item in &mut self.items {
            if let Some(buffer) = item.buffer.take() {
                device.destroy_buffer(buffer);
            }
        }
        self.items.clear();
    }
}
