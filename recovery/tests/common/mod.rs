#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Mutex, Once};
use std::time::Duration;
use tt_recovery::{
    EntitySnapshot, EntityStatus, ErrorClass, ErrorEnvelope, RecoveryContext, RecoveryExecutor,
    RecoveryOutcome, RecoveryTrigger,
};

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub fingerprint: String,
    pub attempt: u32,
    pub trigger: RecoveryTrigger,
}

/// Executor that plays back outcomes in order, then resolves.
pub struct ScriptedExecutor {
    outcomes: Mutex<Vec<RecoveryOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: impl IntoIterator<Item = RecoveryOutcome>) -> Self {
        let mut outcomes: Vec<_> = outcomes.into_iter().collect();
        outcomes.reverse();
        Self {
            outcomes: Mutex::new(outcomes),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecoveryExecutor for ScriptedExecutor {
    async fn execute(&self, fingerprint: &str, context: &RecoveryContext) -> RecoveryOutcome {
        self.calls.lock().unwrap().push(RecordedCall {
            fingerprint: fingerprint.to_string(),
            attempt: context.attempt,
            trigger: context.trigger,
        });
        // Yield so racing triggers observe the attempt as in flight.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.outcomes
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(RecoveryOutcome::Resolved)
    }
}

pub fn paused_with(hash: &str, error_class: ErrorClass) -> EntitySnapshot {
    EntitySnapshot::new(EntityStatus::Paused)
        .with_hash(hash)
        .with_name(format!("entity-{hash}"))
        .with_error(ErrorEnvelope::new(error_class).with_message("probe failed"))
}

/// Let the paused clock run until `cond` holds, or panic after `limit`.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while !cond() {
        assert!(waited < limit, "condition not reached within {limit:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}
