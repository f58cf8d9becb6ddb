//! # Forward Stage
//!
//! Per-frame draw dispatch for a forward renderer: classification of render
//! objects into sorted queues, GPU instancing, additive lights, planar shadows
//! and command recording inside a single render pass.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forward_stage::{ForwardPipeline, StageSettings};
//! use forward_stage::gfx::{CommandCapture, HeadlessDevice};
//!
//! let device = HeadlessDevice::new();
//! let mut pipeline = ForwardPipeline::new(StageSettings::default())?;
//! // ... populate pipeline.scene_mut() ...
//! let mut cmd = CommandCapture::new();
//! pipeline.render(&device, &mut cmd, &[&camera])?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod gfx;
pub mod pipeline;
pub mod scene;
pub mod settings;

pub use errors::{Result, StageError};
pub use pipeline::{ForwardPipeline, ForwardStage, FrameContext, OverlayRenderer};
pub use scene::{Camera, Light, Model, Pass, PhaseRegistry, PipelineSceneData, SubModel};
pub use settings::{RenderQueueDesc, RenderQueueSortMode, StageSettings};
