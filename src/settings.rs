//! Stage Settings & Queue Configuration
//!
//! This module defines the declarative configuration of a forward stage.
//!
//! A stage is described by a [`StageSettings`] value: which phase it accepts,
//! which phase marks additive light passes, and one [`RenderQueueDesc`] per
//! primary queue. Phase names are plain strings here and are only resolved
//! against the phase registry when the stage is activated, so settings can be
//! loaded from JSON before any phase has been registered.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use forward_stage::settings::{StageSettings, RenderQueueDesc, RenderQueueSortMode};
//!
//! // Default: opaque front-to-back + transparent back-to-front
//! let settings = StageSettings::default();
//!
//! // A stage with an additional overlay queue
//! let mut settings = StageSettings::default();
//! settings.render_queues.push(RenderQueueDesc {
//!     is_transparent: true,
//!     sort_mode: RenderQueueSortMode::BackToFront,
//!     phases: vec!["overlay".into()],
//! });
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StageError};

/// Phase accepted by the forward stage's classification.
pub const DEFAULT_PHASE: &str = "default";
/// Phase of the per-light additive passes.
pub const FORWARD_ADD_PHASE: &str = "forward-add";
/// Phase of shadow-map caster passes.
pub const SHADOW_CASTER_PHASE: &str = "shadow-caster";
/// Phase of the planar shadow material passes.
pub const PLANAR_SHADOW_PHASE: &str = "planarShadow";

/// Maximum number of instances merged into one instanced draw.
pub const MAX_INSTANCES_PER_ITEM: u32 = 1024;

// ---------------------------------------------------------------------------
// RenderQueueSortMode
// ---------------------------------------------------------------------------

/// Ordering policy of a render queue.
///
/// Both modes bucket draws by pass priority first. Inside a bucket, draws are
/// ordered by camera depth and ties keep insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderQueueSortMode {
    /// Ascending depth. Minimizes overdraw for opaque geometry.
    #[default]
    FrontToBack,
    /// Descending depth. Required for correct alpha blending.
    BackToFront,
}

// ---------------------------------------------------------------------------
// RenderQueueDesc
// ---------------------------------------------------------------------------

/// Declarative description of one primary render queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderQueueDesc {
    /// Only passes whose blend state matches this flag are accepted.
    #[serde(default)]
    pub is_transparent: bool,
    #[serde(default)]
    pub sort_mode: RenderQueueSortMode,
    /// Phase names accepted by the queue. Resolved at activation.
    pub phases: Vec<String>,
}

impl RenderQueueDesc {
    #[must_use]
    pub fn opaque() -> Self {
        Self {
            is_transparent: false,
            sort_mode: RenderQueueSortMode::FrontToBack,
            phases: vec![DEFAULT_PHASE.to_string()],
        }
    }

    #[must_use]
    pub fn transparent() -> Self {
        Self {
            is_transparent: true,
            sort_mode: RenderQueueSortMode::BackToFront,
            phases: vec![DEFAULT_PHASE.to_string(), PLANAR_SHADOW_PHASE.to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// StageSettings
// ---------------------------------------------------------------------------

/// Global configuration of a forward stage.
///
/// Passed to `ForwardStage::initialize`. The stage keeps its own copy; later
/// changes to the value have no effect on an initialized stage.
///
/// # Example
///
/// ```rust,ignore
/// let settings: StageSettings = serde_json::from_str(r#"{
///     "name": "ForwardStage",
///     "render_queues": [
///         { "sort_mode": "FRONT_TO_BACK", "phases": ["default"] }
///     ]
/// }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Display name, used in logs and debug groups.
    pub name: String,

    /// Execution priority among the stages of a pipeline (lower runs first).
    pub priority: u32,

    /// Phase a pass must declare to be classified by the stage.
    pub phase: String,

    /// Phase of the additive per-light passes gathered by the light queue.
    pub additive_phase: String,

    /// Primary queues. The first non-transparent queue is recorded before the
    /// instanced batch; every other queue is recorded after the planar
    /// shadows, in this order.
    pub render_queues: Vec<RenderQueueDesc>,

    /// Instance count at which an instanced item is split.
    ///
    /// Default: `1024`.
    pub max_instances_per_item: u32,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            name: "ForwardStage".to_string(),
            priority: 10,
            phase: DEFAULT_PHASE.to_string(),
            additive_phase: FORWARD_ADD_PHASE.to_string(),
            render_queues: vec![RenderQueueDesc::opaque(), RenderQueueDesc::transparent()],
            max_instances_per_item: MAX_INSTANCES_PER_ITEM,
        }
    }
}

impl StageSettings {
    /// Rejects settings that cannot produce a working stage.
    pub fn validate(&self) -> Result<()> {
        if self.max_instances_per_item == 0 {
            return Err(StageError::InvalidConfiguration(
                "max_instances_per_item must be greater than zero".into(),
            ));
        }
        if let Some(i) = self.render_queues.iter().position(|q| q.phases.is_empty()) {
            return Err(StageError::InvalidConfiguration(format!(
                "render queue {i} declares no phases"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_forward_layout() {
        let s = StageSettings::default();
        assert_eq!(s.phase, "default");
        assert_eq!(s.render_queues.len(), 2);
        assert!(!s.render_queues[0].is_transparent);
        assert_eq!(s.render_queues[0].sort_mode, RenderQueueSortMode::FrontToBack);
        assert!(s.render_queues[1].is_transparent);
        assert_eq!(s.render_queues[1].sort_mode, RenderQueueSortMode::BackToFront);
        assert_eq!(s.render_queues[1].phases, vec!["default", "planarShadow"]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_instances() {
        let s = StageSettings {
            max_instances_per_item: 0,
            ..Default::default()
        };
        assert!(matches!(
            s.validate(),
            Err(StageError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn validate_rejects_queue_without_phases() {
        let mut s = StageSettings::default();
        s.render_queues[0].phases.clear();
        assert!(s.validate().is_err());
    }
}
