//! Shared builders for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;

use forward_stage::gfx::{
    Command, DescriptorSetId, FramebufferId, HeadlessDevice, RenderPassId, ShaderId,
};
use forward_stage::scene::{
    Aabb, BatchingScheme, BlendMode, Camera, Model, Pass, PhaseRegistry, RenderWindow, SubModel,
};

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 600;

pub struct Fixture {
    pub device: HeadlessDevice,
    pub phases: PhaseRegistry,
    pub render_pass: RenderPassId,
    pub framebuffer: FramebufferId,
    pub shader: ShaderId,
    pub material: DescriptorSetId,
}

impl Fixture {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let device = HeadlessDevice::new();
        let render_pass = device.create_render_pass("main");
        let framebuffer = device.create_framebuffer(render_pass);
        let shader = device.create_shader("standard");
        let material = device.create_descriptor_set("material");
        Self {
            device,
            phases: PhaseRegistry::with_builtins(),
            render_pass,
            framebuffer,
            shader,
            material,
        }
    }

    /// Camera at `(0, 0, 10)` looking at the origin.
    pub fn camera(&self) -> Camera {
        let mut camera = Camera::new_perspective(
            60.0,
            0.1,
            100.0,
            RenderWindow {
                width: WIDTH,
                height: HEIGHT,
                framebuffer: self.framebuffer,
                render_pass: self.render_pass,
            },
        );
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        camera
    }

    pub fn pass(&self, phase: &str, blend: BlendMode, batching: BatchingScheme) -> Arc<Pass> {
        Arc::new(
            Pass::new(self.phases.resolve(phase).unwrap(), self.shader, self.material)
                .with_blend(blend)
                .with_batching(batching),
        )
    }

    pub fn opaque_pass(&self) -> Arc<Pass> {
        self.pass("default", BlendMode::Opaque, BatchingScheme::None)
    }

    pub fn transparent_pass(&self) -> Arc<Pass> {
        self.pass("default", BlendMode::Transparent, BatchingScheme::None)
    }

    pub fn instancing_pass(&self) -> Arc<Pass> {
        self.pass("default", BlendMode::Opaque, BatchingScheme::Instancing)
    }

    /// A sub-model with its own input assembler and a 16-byte instance block.
    pub fn sub_model(&self, passes: &[&Arc<Pass>]) -> SubModel {
        let mut sub_model = SubModel::new(
            self.device.create_input_assembler("mesh"),
            self.device.create_descriptor_set("local"),
        )
        .with_instance_attributes(vec![0u8; 16]);
        for pass in passes {
            sub_model = sub_model.with_pass((*pass).clone());
        }
        sub_model
    }

    /// A unit-sized model centered at `position`.
    pub fn model_at(&self, position: Vec3, passes: &[&Arc<Pass>]) -> Model {
        Model::new(vec![self.sub_model(passes)])
            .at(position)
            .with_bounds(Aabb::from_center_half_extents(position, Vec3::splat(0.5)))
    }
}

pub fn draw_counts(commands: &[Command]) -> Vec<u32> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::Draw { instance_count } => Some(*instance_count),
            _ => None,
        })
        .collect()
}

pub fn position_of(commands: &[Command], pred: impl Fn(&Command) -> bool) -> Option<usize> {
    commands.iter().position(pred)
}

/// `count` models sharing one sub-model (and so one input assembler), spread
/// along the x axis.
pub fn shared_models(sub_model: &SubModel, count: usize) -> Vec<Model> {
    (0..count)
        .map(|i| {
            let position = Vec3::new(i as f32 * 0.1, 0.0, 0.0);
            Model::new(vec![sub_model.clone()])
                .at(position)
                .with_bounds(Aabb::from_center_half_extents(position, Vec3::splat(0.5)))
        })
        .collect()
}
