//! wgpu backend
//!
//! [`WgpuDevice`] maps the stage's ids onto wgpu objects. Shader compilation and
//! pipeline creation stay with the application: compiled pipelines are
//! registered against a [`PipelineStateKey`] and looked up when a queue
//! records.
//!
//! [`WgpuCommandBuffer`] records into a `wgpu::CommandEncoder`. The open render
//! pass is detached from the encoder borrow with `forget_lifetime`, and blits
//! requested inside the pass are replayed as texture copies once it ends.
//!
//! Buffer uploads are staged and copied through the encoder rather than
//! written on the queue, so several cameras recorded into one command buffer
//! each read the data uploaded right before their own pass.

use std::borrow::Cow;
use std::num::NonZeroU64;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use wgpu::util::DeviceExt;

use super::{
    BlitTexture, BufferDesc, BufferId, BufferUsage, ClearFlags, CommandBuffer, DescriptorSetId,
    FramebufferId, InputAssemblerId, PipelineStateId, PipelineStateKey, RenderDevice,
    RenderPassBeginInfo, RenderPassId, ShaderId, TextureId,
};
use crate::errors::{Result, StageError};

/// Index stream of an input assembler.
#[derive(Debug, Clone)]
pub struct WgpuIndexBuffer {
    pub buffer: wgpu::Buffer,
    pub format: wgpu::IndexFormat,
    pub count: u32,
}

/// Vertex (and optional index) streams of one mesh section.
#[derive(Debug, Clone)]
pub struct WgpuInputAssembler {
    pub vertex_buffers: SmallVec<[wgpu::Buffer; 4]>,
    pub vertex_count: u32,
    pub index: Option<WgpuIndexBuffer>,
}

/// Attachments of a framebuffer.
#[derive(Debug, Clone)]
pub struct WgpuFramebuffer {
    pub render_pass: RenderPassId,
    pub color: wgpu::TextureView,
    pub depth_stencil: Option<wgpu::TextureView>,
}

#[derive(Default)]
struct WgpuResources {
    buffers: SlotMap<BufferId, wgpu::Buffer>,
    bind_groups: SlotMap<DescriptorSetId, wgpu::BindGroup>,
    input_assemblers: SlotMap<InputAssemblerId, WgpuInputAssembler>,
    shaders: SlotMap<ShaderId, String>,
    render_passes: SlotMap<RenderPassId, String>,
    framebuffers: SlotMap<FramebufferId, WgpuFramebuffer>,
    textures: SlotMap<TextureId, wgpu::Texture>,
    pipelines: SlotMap<PipelineStateId, wgpu::RenderPipeline>,
    pipeline_lookup: FxHashMap<PipelineStateKey, PipelineStateId>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    /// Layout of every uniform set created by the stage: one dynamically
    /// offset uniform block at binding 0.
    uniform_layout: wgpu::BindGroupLayout,
    resources: RwLock<WgpuResources>,
}

impl WgpuDevice {
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stage Dynamic Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        Self {
            device,
            queue,
            uniform_layout,
            resources: RwLock::new(WgpuResources::default()),
        }
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Layout pipelines must use for the global set (set 0).
    #[must_use]
    pub fn uniform_layout(&self) -> &wgpu::BindGroupLayout {
        &self.uniform_layout
    }

    pub fn register_shader(&self, label: &str) -> ShaderId {
        self.resources.write().shaders.insert(label.to_string())
    }

    pub fn register_render_pass(&self, label: &str) -> RenderPassId {
        self.resources.write().render_passes.insert(label.to_string())
    }

    pub fn register_framebuffer(&self, framebuffer: WgpuFramebuffer) -> FramebufferId {
        self.resources.write().framebuffers.insert(framebuffer)
    }

    pub fn register_texture(&self, texture: wgpu::Texture) -> TextureId {
        self.resources.write().textures.insert(texture)
    }

    pub fn register_input_assembler(&self, input_assembler: WgpuInputAssembler) -> InputAssemblerId {
        self.resources.write().input_assemblers.insert(input_assembler)
    }

    pub fn register_bind_group(&self, bind_group: wgpu::BindGroup) -> DescriptorSetId {
        self.resources.write().bind_groups.insert(bind_group)
    }

    /// Makes `pipeline` the state returned for `key`. Replaces any pipeline
    /// previously registered for the same key.
    pub fn register_pipeline(
        &self,
        key: PipelineStateKey,
        pipeline: wgpu::RenderPipeline,
    ) -> PipelineStateId {
        let mut res = self.resources.write();
        if let Some(old) = res.pipeline_lookup.get(&key).copied() {
            res.pipelines.remove(old);
        }
        let id = res.pipelines.insert(pipeline);
        res.pipeline_lookup.insert(key, id);
        id
    }

    #[must_use]
    pub fn buffer(&self, buffer: BufferId) -> Option<wgpu::Buffer> {
        self.resources.read().buffers.get(buffer).cloned()
    }
}

impl RenderDevice for WgpuDevice {
    fn create_buffer(&self, desc: &BufferDesc) -> BufferId {
        let usage = match desc.usage {
            BufferUsage::Instance => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        };
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage,
            mapped_at_creation: false,
        });
        self.resources.write().buffers.insert(buffer)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        if let Some(buffer) = self.resources.write().buffers.remove(buffer) {
            buffer.destroy();
        }
    }

    fn create_uniform_descriptor_set(
        &self,
        buffer: BufferId,
        binding_size: u64,
    ) -> Result<DescriptorSetId> {
        let mut res = self.resources.write();
        let gpu_buffer = res
            .buffers
            .get(buffer)
            .ok_or_else(|| StageError::missing("buffer", buffer))?;
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stage Dynamic Uniform"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: gpu_buffer,
                    offset: 0,
                    size: NonZeroU64::new(binding_size),
                }),
            }],
        });
        Ok(res.bind_groups.insert(bind_group))
    }

    fn destroy_descriptor_set(&self, descriptor_set: DescriptorSetId) {
        self.resources.write().bind_groups.remove(descriptor_set);
    }

    fn uniform_offset_alignment(&self) -> u32 {
        self.device.limits().min_uniform_buffer_offset_alignment
    }

    fn pipeline_state(&self, key: &PipelineStateKey) -> Option<PipelineStateId> {
        self.resources.read().pipeline_lookup.get(key).copied()
    }
}

// ============================================================================
// Command buffer
// ============================================================================

pub struct WgpuCommandBuffer<'a> {
    device: &'a WgpuDevice,
    encoder: wgpu::CommandEncoder,
    pass: Option<wgpu::RenderPass<'static>>,
    bound_input: Option<InputAssemblerId>,
    pending_blits: Vec<BlitTexture>,
    // `true` for groups pushed on the render pass, `false` for the encoder.
    debug_groups: Vec<bool>,
}

impl<'a> WgpuCommandBuffer<'a> {
    #[must_use]
    pub fn new(device: &'a WgpuDevice, label: &str) -> Self {
        let encoder = device
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self {
            device,
            encoder,
            pass: None,
            bound_input: None,
            pending_blits: Vec::new(),
            debug_groups: Vec::new(),
        }
    }

    /// Finishes encoding. Fails if a render pass is still open.
    pub fn finish(self) -> Result<wgpu::CommandBuffer> {
        if self.pass.is_some() {
            return Err(StageError::UnterminatedRenderPass);
        }
        Ok(self.encoder.finish())
    }

    /// Finishes encoding and submits to the device queue.
    pub fn submit(self) -> Result<wgpu::SubmissionIndex> {
        let device = self.device;
        let commands = self.finish()?;
        Ok(device.queue.submit(std::iter::once(commands)))
    }

    fn flush_blits(&mut self) {
        if self.pending_blits.is_empty() {
            return;
        }
        let res = self.device.resources.read();
        for blit in self.pending_blits.drain(..) {
            let (Some(src), Some(dst)) = (res.textures.get(blit.src), res.textures.get(blit.dst))
            else {
                log::warn!("Skipping blit with missing texture {:?} -> {:?}", blit.src, blit.dst);
                continue;
            };
            if (blit.src_region.width, blit.src_region.height)
                != (blit.dst_region.width, blit.dst_region.height)
            {
                log::warn!("Scaled blits are not supported, copying the source region size");
            }
            self.encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: src,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: blit.src_region.x.max(0) as u32,
                        y: blit.src_region.y.max(0) as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: dst,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: blit.dst_region.x.max(0) as u32,
                        y: blit.dst_region.y.max(0) as u32,
                        z: 0,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: blit.src_region.width,
                    height: blit.src_region.height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }
}

/// `data` zero-padded to the copy alignment.
fn padded_upload(data: &[u8]) -> Cow<'_, [u8]> {
    let padded_len = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize;
    if padded_len == data.len() {
        Cow::Borrowed(data)
    } else {
        let mut padded = data.to_vec();
        padded.resize(padded_len, 0);
        Cow::Owned(padded)
    }
}

fn check_upload(offset: u64, padded_size: u64, size: u64, capacity: u64) -> Result<()> {
    if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(StageError::MisalignedUpload {
            offset,
            alignment: wgpu::COPY_BUFFER_ALIGNMENT,
        });
    }
    if offset + padded_size > capacity {
        return Err(StageError::BufferOverflow {
            offset,
            size,
            capacity,
        });
    }
    Ok(())
}

fn color_ops(info: &RenderPassBeginInfo) -> wgpu::Operations<wgpu::Color> {
    wgpu::Operations {
        load: if info.clear_flags.contains(ClearFlags::COLOR) {
            wgpu::LoadOp::Clear(info.clear_color.into())
        } else {
            wgpu::LoadOp::Load
        },
        store: wgpu::StoreOp::Store,
    }
}

impl CommandBuffer for WgpuCommandBuffer<'_> {
    fn begin_render_pass(&mut self, info: &RenderPassBeginInfo) -> Result<()> {
        if self.pass.is_some() {
            return Err(StageError::RenderPassActive);
        }

        let res = self.device.resources.read();
        let framebuffer = res
            .framebuffers
            .get(info.framebuffer)
            .ok_or_else(|| StageError::missing("framebuffer", info.framebuffer))?;

        let depth_stencil_attachment =
            framebuffer
                .depth_stencil
                .as_ref()
                .map(|view| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: if info.clear_flags.contains(ClearFlags::DEPTH) {
                            wgpu::LoadOp::Clear(info.clear_depth)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

        let pass_desc = wgpu::RenderPassDescriptor {
            label: Some("Forward Stage"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &framebuffer.color,
                resolve_target: None,
                ops: color_ops(info),
                depth_slice: None,
            })],
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        };

        let mut pass = self.encoder.begin_render_pass(&pass_desc).forget_lifetime();

        let area = info.render_area;
        if area.width > 0 && area.height > 0 {
            pass.set_viewport(
                area.x as f32,
                area.y as f32,
                area.width as f32,
                area.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(area.x.max(0) as u32, area.y.max(0) as u32, area.width, area.height);
        }

        drop(res);
        self.pass = Some(pass);
        self.bound_input = None;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        let pass = self.pass.take().ok_or(StageError::NoActiveRenderPass)?;
        drop(pass);
        self.bound_input = None;
        self.debug_groups.retain(|on_pass| !on_pass);
        self.flush_blits();
        Ok(())
    }

    fn is_in_render_pass(&self) -> bool {
        self.pass.is_some()
    }

    fn bind_pipeline_state(&mut self, pipeline: PipelineStateId) {
        let Some(pass) = self.pass.as_mut() else {
            log::warn!("bind_pipeline_state outside of a render pass");
            return;
        };
        match self.device.resources.read().pipelines.get(pipeline) {
            Some(p) => pass.set_pipeline(p),
            None => log::warn!("Unknown pipeline state {pipeline:?}"),
        }
    }

    fn bind_descriptor_set(
        &mut self,
        set: u32,
        descriptor_set: DescriptorSetId,
        dynamic_offsets: &[u32],
    ) {
        let Some(pass) = self.pass.as_mut() else {
            log::warn!("bind_descriptor_set outside of a render pass");
            return;
        };
        match self.device.resources.read().bind_groups.get(descriptor_set) {
            Some(bg) => pass.set_bind_group(set, bg, dynamic_offsets),
            None => log::warn!("Unknown descriptor set {descriptor_set:?}"),
        }
    }

    fn bind_input_assembler(
        &mut self,
        input_assembler: InputAssemblerId,
        instance_buffer: Option<BufferId>,
    ) {
        let Some(pass) = self.pass.as_mut() else {
            log::warn!("bind_input_assembler outside of a render pass");
            return;
        };
        let res = self.device.resources.read();
        let Some(ia) = res.input_assemblers.get(input_assembler) else {
            log::warn!("Unknown input assembler {input_assembler:?}");
            self.bound_input = None;
            return;
        };

        for (slot, buffer) in ia.vertex_buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        if let Some(instance_buffer) = instance_buffer {
            match res.buffers.get(instance_buffer) {
                Some(buffer) => {
                    pass.set_vertex_buffer(ia.vertex_buffers.len() as u32, buffer.slice(..));
                }
                None => log::warn!("Unknown instance buffer {instance_buffer:?}"),
            }
        }
        if let Some(index) = &ia.index {
            pass.set_index_buffer(index.buffer.slice(..), index.format);
        }
        self.bound_input = Some(input_assembler);
    }

    fn draw(&mut self, instance_count: u32) {
        let (Some(pass), Some(input)) = (self.pass.as_mut(), self.bound_input) else {
            log::warn!("draw without an open render pass or bound input assembler");
            return;
        };
        let res = self.device.resources.read();
        let Some(ia) = res.input_assemblers.get(input) else {
            return;
        };
        match &ia.index {
            Some(index) => pass.draw_indexed(0..index.count, 0, 0..instance_count),
            None => pass.draw(0..ia.vertex_count, 0..instance_count),
        }
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        if self.pass.is_some() {
            return Err(StageError::UploadInsideRenderPass);
        }
        if data.is_empty() {
            return Ok(());
        }

        let device = self.device;
        let res = device.resources.read();
        let gpu_buffer = res
            .buffers
            .get(buffer)
            .ok_or_else(|| StageError::missing("buffer", buffer))?;

        let padded = padded_upload(data);
        let size = padded.len() as u64;
        check_upload(offset, size, data.len() as u64, gpu_buffer.size())?;

        // Staged through the encoder so the copy lands between the passes
        // recorded before and after it.
        let staging = device
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Stage Upload Staging"),
                contents: &padded,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        self.encoder
            .copy_buffer_to_buffer(&staging, 0, gpu_buffer, offset, size);
        Ok(())
    }

    fn blit_texture(&mut self, blit: &BlitTexture) {
        self.pending_blits.push(blit.clone());
        if self.pass.is_none() {
            self.flush_blits();
        }
    }

    fn push_debug_group(&mut self, label: &str) {
        if let Some(pass) = self.pass.as_mut() {
            pass.push_debug_group(label);
            self.debug_groups.push(true);
        } else {
            self.encoder.push_debug_group(label);
            self.debug_groups.push(false);
        }
    }

    fn pop_debug_group(&mut self) {
        match self.debug_groups.pop() {
            Some(true) => {
                if let Some(pass) = self.pass.as_mut() {
                    pass.pop_debug_group();
                }
            }
            Some(false) => self.encoder.pop_debug_group(),
            None => log::warn!("pop_debug_group without a matching push"),
        }
    }
}
