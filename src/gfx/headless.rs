//! Headless capture backend
//!
//! [`HeadlessDevice`] allocates ids without touching a GPU and
//! [`CommandCapture`] records every command as a [`Command`] value. Together
//! they let tests and tools inspect exactly what a frame would submit.
//!
//! The capture enforces the same render-pass rules as a real backend: nested
//! passes, unmatched ends and uploads inside a pass are errors.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use slotmap::SlotMap;

use super::{
    BlitTexture, BufferDesc, BufferId, BufferUsage, CommandBuffer, DescriptorSetId,
    FramebufferId, InputAssemblerId, PipelineStateId, PipelineStateKey, RenderDevice,
    RenderPassBeginInfo, RenderPassId, ShaderId, TextureId,
};
use crate::errors::{Result, StageError};

// ============================================================================
// Device
// ============================================================================

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone)]
pub struct HeadlessDescriptorSet {
    pub label: String,
    /// Uniform buffer behind the set, if it was created for one.
    pub buffer: Option<BufferId>,
    pub binding_size: u64,
}

#[derive(Default)]
struct HeadlessResources {
    buffers: SlotMap<BufferId, HeadlessBuffer>,
    descriptor_sets: SlotMap<DescriptorSetId, HeadlessDescriptorSet>,
    input_assemblers: SlotMap<InputAssemblerId, String>,
    shaders: SlotMap<ShaderId, String>,
    render_passes: SlotMap<RenderPassId, String>,
    framebuffers: SlotMap<FramebufferId, RenderPassId>,
    textures: SlotMap<TextureId, (u32, u32)>,
    pipelines: SlotMap<PipelineStateId, PipelineStateKey>,
    pipeline_lookup: FxHashMap<PipelineStateKey, PipelineStateId>,
    unsupported_shaders: FxHashSet<ShaderId>,
}

/// A [`RenderDevice`] that only tracks ids.
///
/// Pipeline states are created on first request for every registered shader,
/// so each distinct [`PipelineStateKey`] maps to exactly one id.
pub struct HeadlessDevice {
    resources: Mutex<HeadlessResources>,
    uniform_alignment: u32,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::with_uniform_alignment(256)
    }

    #[must_use]
    pub fn with_uniform_alignment(alignment: u32) -> Self {
        Self {
            resources: Mutex::new(HeadlessResources::default()),
            uniform_alignment: alignment.max(1),
        }
    }

    pub fn create_input_assembler(&self, label: &str) -> InputAssemblerId {
        self.resources.lock().input_assemblers.insert(label.to_string())
    }

    pub fn create_shader(&self, label: &str) -> ShaderId {
        self.resources.lock().shaders.insert(label.to_string())
    }

    pub fn create_render_pass(&self, label: &str) -> RenderPassId {
        self.resources.lock().render_passes.insert(label.to_string())
    }

    pub fn create_framebuffer(&self, render_pass: RenderPassId) -> FramebufferId {
        self.resources.lock().framebuffers.insert(render_pass)
    }

    pub fn create_texture(&self, width: u32, height: u32) -> TextureId {
        self.resources.lock().textures.insert((width, height))
    }

    /// A descriptor set not backed by a uniform buffer (material or local
    /// bindings).
    pub fn create_descriptor_set(&self, label: &str) -> DescriptorSetId {
        self.resources
            .lock()
            .descriptor_sets
            .insert(HeadlessDescriptorSet {
                label: label.to_string(),
                buffer: None,
                binding_size: 0,
            })
    }

    /// Makes every later pipeline lookup with `shader` fail.
    pub fn mark_shader_unsupported(&self, shader: ShaderId) {
        self.resources.lock().unsupported_shaders.insert(shader);
    }

    /// The key a pipeline state was created for.
    #[must_use]
    pub fn pipeline_key(&self, pipeline: PipelineStateId) -> Option<PipelineStateKey> {
        self.resources.lock().pipelines.get(pipeline).copied()
    }

    #[must_use]
    pub fn buffer(&self, buffer: BufferId) -> Option<HeadlessBuffer> {
        self.resources.lock().buffers.get(buffer).cloned()
    }

    #[must_use]
    pub fn descriptor_set(&self, descriptor_set: DescriptorSetId) -> Option<HeadlessDescriptorSet> {
        self.resources
            .lock()
            .descriptor_sets
            .get(descriptor_set)
            .cloned()
    }

    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.resources.lock().buffers.len()
    }

    #[must_use]
    pub fn live_descriptor_set_count(&self) -> usize {
        self.resources.lock().descriptor_sets.len()
    }
}

impl RenderDevice for HeadlessDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> BufferId {
        self.resources.lock().buffers.insert(HeadlessBuffer {
            label: desc.label,
            size: desc.size,
            usage: desc.usage,
        })
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if self.resources.lock().buffers.remove(buffer).is_none() {
            log::warn!("Destroying unknown buffer {buffer:?}");
        }
    }

    fn create_uniform_descriptor_set(
        &self,
        buffer: BufferId,
        binding_size: u64,
    ) -> Result<DescriptorSetId> {
        let mut res = self.resources.lock();
        if !res.buffers.contains_key(buffer) {
            return Err(StageError::missing("buffer", buffer));
        }
        Ok(res.descriptor_sets.insert(HeadlessDescriptorSet {
            label: "uniform".to_string(),
            buffer: Some(buffer),
            binding_size,
        }))
    }

    fn destroy_descriptor_set(&self, descriptor_set: DescriptorSetId) {
        self.resources.lock().descriptor_sets.remove(descriptor_set);
    }

    fn uniform_offset_alignment(&self) -> u32 {
        self.uniform_alignment
    }

    fn pipeline_state(&self, key: &PipelineStateKey) -> Option<PipelineStateId> {
        let mut res = self.resources.lock();
        if !res.shaders.contains_key(key.shader) || res.unsupported_shaders.contains(&key.shader) {
            return None;
        }
        if let Some(&id) = res.pipeline_lookup.get(key) {
            return Some(id);
        }
        let id = res.pipelines.insert(*key);
        res.pipeline_lookup.insert(*key, id);
        Some(id)
    }
}

// ============================================================================
// Command capture
// ============================================================================

/// One recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass(RenderPassBeginInfo),
    EndRenderPass,
    BindPipelineState(PipelineStateId),
    BindDescriptorSet {
        set: u32,
        descriptor_set: DescriptorSetId,
        dynamic_offsets: Vec<u32>,
    },
    BindInputAssembler {
        input_assembler: InputAssemblerId,
        instance_buffer: Option<BufferId>,
    },
    Draw {
        instance_count: u32,
    },
    UpdateBuffer {
        buffer: BufferId,
        offset: u64,
        data: Vec<u8>,
    },
    BlitTexture(BlitTexture),
    PushDebugGroup(String),
    PopDebugGroup,
}

/// A [`CommandBuffer`] that records into a `Vec<Command>`.
#[derive(Debug, Default)]
pub struct CommandCapture {
    commands: Vec<Command>,
    in_render_pass: bool,
    debug_depth: u32,
}

impl CommandCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drops recorded commands. Fails if a render pass is still open.
    pub fn reset(&mut self) -> Result<()> {
        if self.in_render_pass {
            return Err(StageError::UnterminatedRenderPass);
        }
        self.commands.clear();
        self.debug_depth = 0;
        Ok(())
    }

    /// Takes the recorded commands. Fails if a render pass is still open.
    pub fn finish(&mut self) -> Result<Vec<Command>> {
        if self.in_render_pass {
            return Err(StageError::UnterminatedRenderPass);
        }
        self.debug_depth = 0;
        Ok(std::mem::take(&mut self.commands))
    }

    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }

    /// Labels of the debug groups, in push order.
    #[must_use]
    pub fn debug_groups(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::PushDebugGroup(label) => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Commands recorded inside the debug group named `label` (first match).
    #[must_use]
    pub fn commands_in_group(&self, label: &str) -> &[Command] {
        let Some(start) = self
            .commands
            .iter()
            .position(|c| matches!(c, Command::PushDebugGroup(l) if l == label))
        else {
            return &[];
        };

        let mut depth = 0u32;
        for (i, command) in self.commands[start + 1..].iter().enumerate() {
            match command {
                Command::PushDebugGroup(_) => depth += 1,
                Command::PopDebugGroup if depth == 0 => {
                    return &self.commands[start + 1..start + 1 + i];
                }
                Command::PopDebugGroup => depth -= 1,
                _ => {}
            }
        }
        &self.commands[start + 1..]
    }

    fn record_bind(&mut self, command: Command) {
        if !self.in_render_pass {
            log::warn!("{command:?} recorded outside of a render pass");
        }
        self.commands.push(command);
    }
}

impl CommandBuffer for CommandCapture {
    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> Result<()> {
        if self.in_render_pass {
            return Err(StageError::RenderPassActive);
        }
        self.in_render_pass = true;
        self.commands.push(Command::BeginRenderPass(info.clone()));
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        if !self.in_render_pass {
            return Err(StageError::NoActiveRenderPass);
        }
        self.in_render_pass = false;
        self.commands.push(Command::EndRenderPass);
        Ok(())
    }

    fn is_in_render_pass(&self) -> bool {
        self.in_render_pass
    }

    fn bind_pipeline_state(&mut self, pipeline: PipelineStateId) {
        self.record_bind(Command::BindPipelineState(pipeline));
    }

    fn bind_descriptor_set(
        &mut self,
        set: u32,
        descriptor_set: DescriptorSetId,
        dynamic_offsets: &[u32],
    ) {
        self.record_bind(Command::BindDescriptorSet {
            set,
            descriptor_set,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn bind_input_assembler(
        &mut self,
        input_assembler: InputAssemblerId,
        instance_buffer: Option<BufferId>,
    ) {
        self.record_bind(Command::BindInputAssembler {
            input_assembler,
            instance_buffer,
        });
    }

    fn draw(&mut self, instance_count: u32) {
        self.record_bind(Command::Draw { instance_count });
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        if self.in_render_pass {
            return Err(StageError::UploadInsideRenderPass);
        }
        self.commands.push(Command::UpdateBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn blit_texture(&mut self, blit: &BlitTexture) {
        self.commands.push(Command::BlitTexture(blit.clone()));
    }

    fn push_debug_group(&mut self, label: &str) {
        self.debug_depth += 1;
        self.commands.push(Command::PushDebugGroup(label.to_string()));
    }

    fn pop_debug_group(&mut self) {
        if self.debug_depth == 0 {
            log::warn!("pop_debug_group without a matching push");
            return;
        }
        self.debug_depth -= 1;
        self.commands.push(Command::PopDebugGroup);
    }
}
