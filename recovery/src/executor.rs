//! Contract for the recovery action itself.
//!
//! The coordinator only consumes the outcome; how an executor probes the
//! filesystem or talks to the daemon is its own business.

use crate::types::{Classification, EntitySnapshot, ErrorClass, PathReason};
use async_trait::async_trait;

/// What started an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryTrigger {
    /// Timer-driven retry or background poll.
    Background,
    /// User clicked resume / retry.
    Manual,
}

impl RecoveryTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub entity: EntitySnapshot,
    /// 1-based number of the attempt being executed.
    pub attempt: u32,
    pub trigger: RecoveryTrigger,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    Resolved,
    PathNeeded { reason: PathReason },
    /// The probe measured what is missing.
    Classified(Classification),
    Failed { error_class: ErrorClass },
}

impl RecoveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::PathNeeded { .. } => "path-needed",
            Self::Classified(_) => "classified",
            Self::Failed { .. } => "failed",
        }
    }
}

#[async_trait]
pub trait RecoveryExecutor: Send + Sync {
    async fn execute(&self, fingerprint: &str, context: &RecoveryContext) -> RecoveryOutcome;
}
