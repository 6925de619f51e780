//! Fault injection for the retry paths
//!
//! Wraps a real executor and fails the first N attempts with a chosen error
//! class, so backoff, classification and timer re-arming can be exercised
//! against a daemon that is otherwise healthy.
//!
//! ```bash
//! TT_RECOVERY_FAULTS=missing:2,disk_full:1   # 2 missing-files failures, then 1 disk-full
//! ```

use crate::executor::{RecoveryContext, RecoveryExecutor, RecoveryOutcome};
use crate::types::ErrorClass;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

pub const FAULTS_ENV: &str = "TT_RECOVERY_FAULTS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FaultParseError {
    #[error("fault entry '{0}' is not in label:count form")]
    Malformed(String),

    #[error("unknown fault type '{0}'")]
    UnknownLabel(String),

    #[error("invalid fault count in '{0}'")]
    InvalidCount(String),
}

/// Remaining injected failures, drained in priority order.
#[derive(Debug, Default)]
pub struct FaultPlan {
    missing: AtomicUsize,
    permission: AtomicUsize,
    disk_full: AtomicUsize,
    local: AtomicUsize,
}

impl FaultPlan {
    /// Parse `label:count` pairs separated by commas.
    pub fn parse(spec: &str) -> Result<Self, FaultParseError> {
        let plan = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (label, count) = entry
                .split_once(':')
                .ok_or_else(|| FaultParseError::Malformed(entry.to_string()))?;
            let count: usize = count
                .trim()
                .parse()
                .map_err(|_| FaultParseError::InvalidCount(entry.to_string()))?;
            let counter = match label.trim() {
                "missing" | "missing_files" => &plan.missing,
                "permission" | "permission_denied" => &plan.permission,
                "disk_full" => &plan.disk_full,
                "local" | "local_error" => &plan.local,
                other => return Err(FaultParseError::UnknownLabel(other.to_string())),
            };
            counter.fetch_add(count, Ordering::Relaxed);
        }
        Ok(plan)
    }

    /// Plan from `TT_RECOVERY_FAULTS`; empty when unset or unparsable.
    pub fn from_env() -> Self {
        let Ok(spec) = std::env::var(FAULTS_ENV) else {
            return Self::default();
        };
        match Self::parse(&spec) {
            Ok(plan) => {
                tracing::info!(faults = %spec, "Recovery fault injection enabled");
                plan
            }
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring malformed {FAULTS_ENV}");
                Self::default()
            }
        }
    }

    pub fn remaining(&self) -> usize {
        [&self.missing, &self.permission, &self.disk_full, &self.local]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Consume one fault, if any remain.
    pub fn next_fault(&self) -> Option<ErrorClass> {
        let order = [
            (&self.missing, ErrorClass::MissingFiles),
            (&self.permission, ErrorClass::PermissionDenied),
            (&self.disk_full, ErrorClass::DiskFull),
            (&self.local, ErrorClass::LocalError),
        ];
        order.into_iter().find_map(|(counter, class)| {
            counter
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .ok()
                .map(|_| class)
        })
    }
}

/// Executor that fails with planned error classes before delegating.
pub struct FaultInjectingExecutor {
    inner: Arc<dyn RecoveryExecutor>,
    plan: FaultPlan,
}

impl FaultInjectingExecutor {
    pub fn new(inner: Arc<dyn RecoveryExecutor>, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }

    pub fn from_env(inner: Arc<dyn RecoveryExecutor>) -> Self {
        Self::new(inner, FaultPlan::from_env())
    }
}

#[async_trait]
impl RecoveryExecutor for FaultInjectingExecutor {
    async fn execute(&self, fingerprint: &str, context: &RecoveryContext) -> RecoveryOutcome {
        if let Some(error_class) = self.plan.next_fault() {
            tracing::warn!(
                fingerprint,
                attempt = context.attempt,
                error_class = error_class.as_str(),
                remaining = self.plan.remaining(),
                "[faults] Injecting recovery failure"
            );
            return RecoveryOutcome::Failed { error_class };
        }
        self.inner.execute(fingerprint, context).await
    }
}
