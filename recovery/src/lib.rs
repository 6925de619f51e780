//! Background recovery for entities stuck in a local-error state
//!
//! Decides when an automatic or user-requested recovery attempt may run,
//! spaces retries with a capped, jittered backoff, overlays optimistic status
//! on the display while operations are in progress, and resolves which
//! recovery classification (session, persisted, or none) applies.
//!
//! [`RecoveryCoordinator`] owns all of it; [`RecoveryScope`] makes it
//! available to code that should not thread it through by hand.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod backoff;
pub mod classification;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
#[cfg(feature = "dev-faults")]
pub mod faults;
pub mod projector;
pub mod scheduler;
pub mod scope;
pub mod timing;
pub mod types;

pub use backoff::{BackoffDelayPolicy, FingerprintJitter, FixedJitter, JitterSource, RandomJitter};
pub use classification::{
    ClassificationResolver, InMemoryOverrideStore, NO_RECOVERY_FINGERPRINT, OverrideStore,
    derive_path_reason, is_actionable_for_probe_classification, recovery_fingerprint,
    should_use_recovery_gate_for_resume,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{ConfigLoader, RecoveryConfig};
pub use coordinator::{
    RecoveryCoordinator, RecoveryCoordinatorBuilder, RecoveryReport, SnapshotReconciliation,
};
pub use error::{RecoveryError, Result};
pub use executor::{RecoveryContext, RecoveryExecutor, RecoveryOutcome, RecoveryTrigger};
pub use projector::{OptimisticStatusEntry, OptimisticStatusProjector, OptimisticStatusUpdate};
pub use scheduler::{AttemptStart, RetryScheduler, RetryState, ScheduledRetry};
pub use scope::RecoveryScope;
pub use types::{
    ByteCounts, Classification, Confidence, EntitySnapshot, EntityStatus, ErrorClass,
    ErrorEnvelope, OperationTag, PathReason,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
