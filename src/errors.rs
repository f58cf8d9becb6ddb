//! Error Types
//!
//! This module defines the error type shared by the stage, its queues and the
//! bundled GPU backends.
//!
//! # Overview
//!
//! [`StageError`] covers two families of failures:
//! - Configuration errors, reported once at `initialize` / `activate` time
//!   (unknown phase names, lifecycle misuse).
//! - Frame errors, propagated from the command buffer while recording
//!   (render pass begin failures, uploads issued inside a render pass).
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, StageError>`.
//!
//! ```rust,ignore
//! use forward_stage::errors::Result;
//!
//! fn activate_stage() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The error type for the forward stage.
#[derive(Error, Debug)]
pub enum StageError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A phase name was referenced but never registered.
    #[error("Unknown render phase: {0:?}")]
    UnknownPhase(String),

    /// The phase registry ran out of bits.
    #[error("Cannot register phase {name:?}: at most {limit} phases are supported")]
    PhaseLimitExceeded {
        /// The phase that could not be registered
        name: String,
        /// Maximum number of phases
        limit: usize,
    },

    /// Settings were rejected before activation.
    #[error("Invalid stage configuration: {0}")]
    InvalidConfiguration(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// `activate` was called before `initialize`.
    #[error("Stage {0:?} has not been initialized")]
    NotInitialized(String),

    /// `render` was called before `activate`.
    #[error("Stage {0:?} has not been activated")]
    NotActivated(String),

    /// The stage was used after `destroy`.
    #[error("Stage {0:?} has been destroyed")]
    Destroyed(String),

    // ========================================================================
    // Command Recording Errors
    // ========================================================================
    /// `begin_render_pass` was called while another pass is open.
    #[error("A render pass is already active")]
    RenderPassActive,

    /// `end_render_pass` was called with no open pass.
    #[error("No render pass is active")]
    NoActiveRenderPass,

    /// A buffer upload was recorded while a render pass is open.
    #[error("Buffer uploads must be recorded outside of a render pass")]
    UploadInsideRenderPass,

    /// The command buffer was finished with an open render pass.
    #[error("Command buffer finished with an open render pass")]
    UnterminatedRenderPass,

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A GPU resource id did not resolve on the device.
    #[error("Missing {kind} resource: {id}")]
    MissingResource {
        /// Resource category (buffer, framebuffer, ...)
        kind: &'static str,
        /// Debug representation of the id
        id: String,
    },

    /// An upload does not fit into the destination buffer.
    #[error("Upload of {size} bytes at offset {offset} exceeds buffer capacity {capacity}")]
    BufferOverflow {
        /// Write offset in bytes
        offset: u64,
        /// Write size in bytes
        size: u64,
        /// Buffer capacity in bytes
        capacity: u64,
    },

    /// An upload offset is not a multiple of the copy alignment.
    #[error("Upload offset {offset} is not aligned to {alignment} bytes")]
    MisalignedUpload {
        /// Write offset in bytes
        offset: u64,
        /// Required alignment in bytes
        alignment: u64,
    },
}

impl StageError {
    pub(crate) fn missing(kind: &'static str, id: impl std::fmt::Debug) -> Self {
        Self::MissingResource {
            kind,
            id: format!("{id:?}"),
        }
    }
}

/// Alias for `Result<T, StageError>`.
pub type Result<T> = std::result::Result<T, StageError>;
