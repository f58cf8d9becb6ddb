//! Render Phase Registry
//!
//! Passes declare the phase they belong to by name ("default", "forward-add",
//! ...). Names are interned once and mapped to a single bit so that queues can
//! filter passes with a mask test instead of string comparisons.

use lasso::{Key, Rodeo, Spur};

use crate::errors::{Result, StageError};
use crate::settings::{DEFAULT_PHASE, FORWARD_ADD_PHASE, PLANAR_SHADOW_PHASE, SHADOW_CASTER_PHASE};

/// Maximum number of distinct phases (one bit each).
pub const MAX_PHASES: usize = 32;

/// A registered phase, stored as its bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseId(u32);

impl PhaseId {
    #[inline]
    #[must_use]
    pub fn bit(self) -> u32 {
        self.0
    }
}

/// A set of phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhaseMask(u32);

impl PhaseMask {
    pub const EMPTY: Self = Self(0);

    #[inline]
    #[must_use]
    pub fn contains(self, phase: PhaseId) -> bool {
        self.0 & phase.0 != 0
    }

    #[inline]
    #[must_use]
    pub fn with(self, phase: PhaseId) -> Self {
        Self(self.0 | phase.0)
    }

    #[inline]
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<PhaseId> for PhaseMask {
    fn from(phase: PhaseId) -> Self {
        Self(phase.0)
    }
}

/// Interns phase names and hands out their bits.
#[derive(Debug)]
pub struct PhaseRegistry {
    names: Rodeo<Spur>,
}

impl Default for PhaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: Rodeo::new(),
        }
    }

    /// A registry with the phases used by the forward pipeline already
    /// registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for name in [
            DEFAULT_PHASE,
            FORWARD_ADD_PHASE,
            SHADOW_CASTER_PHASE,
            PLANAR_SHADOW_PHASE,
        ] {
            // The builtin set is far below the limit.
            let _ = registry.register(name);
        }
        registry
    }

    /// Registers `name` and returns its id. Registering an existing name
    /// returns the id it already has.
    pub fn register(&mut self, name: &str) -> Result<PhaseId> {
        if let Some(phase) = self.get(name) {
            return Ok(phase);
        }
        if self.names.len() >= MAX_PHASES {
            return Err(StageError::PhaseLimitExceeded {
                name: name.to_string(),
                limit: MAX_PHASES,
            });
        }
        let key = self.names.get_or_intern(name);
        Ok(Self::phase_of(key))
    }

    /// Looks up a registered phase without registering it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<PhaseId> {
        self.names.get(name).map(Self::phase_of)
    }

    /// Like [`get`](Self::get), but reports unknown names as an error.
    pub fn resolve(&self, name: &str) -> Result<PhaseId> {
        self.get(name)
            .ok_or_else(|| StageError::UnknownPhase(name.to_string()))
    }

    /// ORs the bits of every name together. Fails on the first unknown name.
    pub fn resolve_mask<S: AsRef<str>>(&self, names: &[S]) -> Result<PhaseMask> {
        names.iter().try_fold(PhaseMask::EMPTY, |mask, name| {
            Ok(mask.with(self.resolve(name.as_ref())?))
        })
    }

    /// The name a phase was registered under.
    #[must_use]
    pub fn name(&self, phase: PhaseId) -> Option<&str> {
        let index = phase.0.trailing_zeros() as usize;
        Spur::try_from_usize(index).and_then(|key| self.names.try_resolve(&key))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn phase_of(key: Spur) -> PhaseId {
        PhaseId(1 << key.into_usize())
    }
}
