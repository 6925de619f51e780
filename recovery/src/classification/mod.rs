//! Recovery classification
//!
//! Decides which failures are actionable, derives the fingerprint that keys
//! retry state, and resolves which classification the UI shows when both a
//! session-scoped probe result and a persisted override exist.

pub mod resolver;
pub mod store;

pub use resolver::{
    ClassificationResolver, NO_RECOVERY_FINGERPRINT, PROBE_ACTIONABLE_CLASSES,
    RESUME_GATE_CLASSES, derive_path_reason, is_actionable_for_probe_classification,
    recovery_fingerprint, should_use_recovery_gate_for_resume,
};
pub use store::{InMemoryOverrideStore, OverrideStore};
