//! Recovery coordinator
//!
//! Owns every piece of recovery state for one UI session: the retry gate, the
//! optimistic overlays, the session classifications and the armed retry
//! timers. Cheap to clone; all clones share the same state.
//!
//! Flow for one attempt:
//! resume gate -> `try_begin_attempt` -> executor (raced against shutdown)
//! -> outcome -> `clear_schedule` on success, `schedule_retry` plus a timer
//! otherwise -> `finish_attempt` on every exit path.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await, so the in-flight check-and-set stays atomic even when a timer and a
//! user click race for the same fingerprint.

use crate::backoff::BackoffDelayPolicy;
use crate::classification::{
    ClassificationResolver, InMemoryOverrideStore, OverrideStore, derive_path_reason,
    is_actionable_for_probe_classification, recovery_fingerprint,
    should_use_recovery_gate_for_resume,
};
use crate::clock::{Clock, TokioClock};
use crate::config::RecoveryConfig;
use crate::executor::{RecoveryContext, RecoveryExecutor, RecoveryOutcome, RecoveryTrigger};
use crate::projector::{OptimisticStatusEntry, OptimisticStatusProjector, OptimisticStatusUpdate};
use crate::scheduler::{AttemptStart, RetryScheduler, RetryState};
use crate::types::{Classification, EntitySnapshot, EntityStatus, OperationTag};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tt_async_utils::{CancelErr, OrCancelExt, TimerDriver, TimerHandle, TokioTimer};

/// What happened to one `request_recovery` call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryReport {
    /// The entity does not route through the recovery gate.
    NotActionable,
    /// A retry window is still open for this fingerprint.
    Cooldown,
    /// Another attempt for this fingerprint is running.
    InFlight,
    Resolved,
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        classification: Option<Classification>,
    },
    /// The coordinator shut down while the attempt ran.
    Cancelled,
    /// The schedule was cleared while the attempt ran; its result was dropped.
    Superseded,
}

/// Result of folding a fresh authoritative snapshot into the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotReconciliation {
    pub cleared_overlays: Vec<String>,
    pub forgotten_fingerprints: Vec<String>,
}

/// A pending timed retry. `id` tells a fired timer whether it is still the
/// current arm for its fingerprint.
struct ArmedRetry {
    id: u64,
    handle: TimerHandle,
}

struct CoordinatorState {
    scheduler: RetryScheduler,
    projector: OptimisticStatusProjector,
    resolver: ClassificationResolver,
    armed: HashMap<String, ArmedRetry>,
    /// fingerprint -> id of the attempt currently allowed to report back
    active: HashMap<String, u64>,
    latest: HashMap<String, EntitySnapshot>,
    next_attempt_id: u64,
    next_arm_id: u64,
}

impl CoordinatorState {
    fn forget(&mut self, fingerprint: &str) {
        self.scheduler.clear_schedule(fingerprint);
        self.resolver.end_session(fingerprint);
        self.armed.remove(fingerprint);
        self.active.remove(fingerprint);
    }

    /// Drop the recheck overlay this coordinator put up, leaving user overlays alone.
    fn clear_recheck_overlay(&mut self, overlay_key: Option<&str>) {
        let Some(key) = overlay_key else {
            return;
        };
        let ours = self
            .projector
            .entry(key)
            .is_some_and(|entry| entry.operation == Some(OperationTag::Recheck));
        if ours {
            self.projector
                .update_optimistic_statuses([OptimisticStatusUpdate::clear(key)]);
        }
    }

    /// True unless a newer attempt for `fingerprint` has started since `attempt_id`.
    fn owns_fingerprint(&self, fingerprint: &str, attempt_id: u64) -> bool {
        self.active
            .get(fingerprint)
            .is_none_or(|active| *active == attempt_id)
    }
}

struct Inner {
    state: Mutex<CoordinatorState>,
    executor: Arc<dyn RecoveryExecutor>,
    timer: Arc<dyn TimerDriver>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    forget_missing_entities: bool,
    _cancel_on_drop: DropGuard,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the in-flight flag and takes down the recheck overlay if the
/// attempt future is dropped or unwinds before reporting an outcome.
struct AttemptGuard {
    inner: Arc<Inner>,
    fingerprint: String,
    overlay_key: Option<String>,
    attempt_id: u64,
    armed: bool,
}

impl AttemptGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.lock();
        if !state.owns_fingerprint(&self.fingerprint, self.attempt_id) {
            return;
        }
        if state.active.remove(&self.fingerprint).is_some() {
            state.scheduler.finish_attempt(&self.fingerprint);
        }
        state.clear_recheck_overlay(self.overlay_key.as_deref());
        tracing::debug!(
            fingerprint = %self.fingerprint,
            "Recovery attempt abandoned; in-flight flag released"
        );
    }
}

pub struct RecoveryCoordinatorBuilder {
    config: RecoveryConfig,
    executor: Arc<dyn RecoveryExecutor>,
    store: Option<Arc<dyn OverrideStore>>,
    clock: Option<Arc<dyn Clock>>,
    timer: Option<Arc<dyn TimerDriver>>,
    policy: Option<BackoffDelayPolicy>,
}

impl RecoveryCoordinatorBuilder {
    pub fn override_store(mut self, store: Arc<dyn OverrideStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Timer driver for scheduled retries. Defaults to a tokio timer whose
    /// timeouts are children of the coordinator's shutdown token.
    pub fn timer(mut self, timer: Arc<dyn TimerDriver>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Override the delay policy derived from the configuration.
    pub fn delay_policy(mut self, policy: BackoffDelayPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> RecoveryCoordinator {
        let shutdown = CancellationToken::new();
        let clock = self.clock.unwrap_or_else(|| Arc::new(TokioClock));
        let timer = self
            .timer
            .unwrap_or_else(|| Arc::new(TokioTimer::new(shutdown.child_token())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryOverrideStore::new()));
        let policy = self.policy.unwrap_or_else(|| self.config.delay_policy());

        tracing::debug!(
            cooldown_ms = policy.cooldown().as_millis() as u64,
            "Recovery coordinator created"
        );

        let state = CoordinatorState {
            scheduler: RetryScheduler::new(policy, Arc::clone(&clock)),
            projector: OptimisticStatusProjector::new(),
            resolver: ClassificationResolver::new(store),
            armed: HashMap::new(),
            active: HashMap::new(),
            latest: HashMap::new(),
            next_attempt_id: 0,
            next_arm_id: 0,
        };

        RecoveryCoordinator {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                executor: self.executor,
                timer,
                clock,
                _cancel_on_drop: shutdown.clone().drop_guard(),
                shutdown,
                forget_missing_entities: self.config.forget_missing_entities,
            }),
        }
    }
}

#[derive(Clone)]
pub struct RecoveryCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RecoveryCoordinator {
    pub fn builder(
        config: RecoveryConfig,
        executor: Arc<dyn RecoveryExecutor>,
    ) -> RecoveryCoordinatorBuilder {
        RecoveryCoordinatorBuilder {
            config,
            executor,
            store: None,
            clock: None,
            timer: None,
            policy: None,
        }
    }

    pub fn new(config: RecoveryConfig, executor: Arc<dyn RecoveryExecutor>) -> Self {
        Self::builder(config, executor).build()
    }

    // ------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------

    /// Run one recovery attempt for `entity` if the gate and the scheduler allow it.
    pub async fn request_recovery(
        &self,
        entity: &EntitySnapshot,
        trigger: RecoveryTrigger,
    ) -> RecoveryReport {
        self.run_attempt(entity.clone(), trigger).await
    }

    /// Attempt every gate-eligible entity of a background poll, in order.
    pub async fn recover_eligible(
        &self,
        entities: &[EntitySnapshot],
    ) -> Vec<(String, RecoveryReport)> {
        let mut reports = Vec::new();
        for entity in entities
            .iter()
            .filter(|e| should_use_recovery_gate_for_resume(e))
        {
            let report = self
                .request_recovery(entity, RecoveryTrigger::Background)
                .await;
            reports.push((recovery_fingerprint(entity), report));
        }
        reports
    }

    // Boxed so the retry timer can re-enter it without a recursive opaque type.
    fn run_attempt(
        &self,
        entity: EntitySnapshot,
        trigger: RecoveryTrigger,
    ) -> BoxFuture<'static, RecoveryReport> {
        let this = self.clone();
        Box::pin(async move { this.attempt(entity, trigger).await })
    }

    async fn attempt(&self, entity: EntitySnapshot, trigger: RecoveryTrigger) -> RecoveryReport {
        let fingerprint = recovery_fingerprint(&entity);

        if self.inner.shutdown.is_cancelled() {
            return RecoveryReport::Cancelled;
        }
        if !should_use_recovery_gate_for_resume(&entity) {
            tracing::debug!(
                fingerprint = %fingerprint,
                status = entity.status.as_str(),
                error_class = ?entity.error_class(),
                "Entity not routed through recovery gate"
            );
            return RecoveryReport::NotActionable;
        }

        let (attempt_id, attempt) = match self.begin(&fingerprint, &entity, trigger) {
            Ok(started) => started,
            Err(report) => return report,
        };
        let guard = AttemptGuard {
            inner: Arc::clone(&self.inner),
            fingerprint: fingerprint.clone(),
            overlay_key: entity.entity_key(),
            attempt_id,
            armed: true,
        };

        tracing::info!(
            fingerprint = %fingerprint,
            attempt,
            trigger = trigger.as_str(),
            "Recovery attempt started"
        );

        let context = RecoveryContext {
            entity: entity.clone(),
            attempt,
            trigger,
        };
        let executor = Arc::clone(&self.inner.executor);
        let outcome = crate::measure_time_async!(
            "recovery_attempt",
            executor
                .execute(&fingerprint, &context)
                .or_cancel(&self.inner.shutdown),
            fingerprint = fingerprint.as_str()
        )
        .await;

        match outcome {
            Ok(outcome) => self.complete(guard, &entity, outcome),
            Err(CancelErr::Cancelled) => {
                // The guard unwinds the in-flight flag and the overlay.
                drop(guard);
                tracing::warn!(
                    fingerprint = %fingerprint,
                    attempt,
                    "Recovery attempt abandoned on shutdown"
                );
                RecoveryReport::Cancelled
            }
        }
    }

    fn begin(
        &self,
        fingerprint: &str,
        entity: &EntitySnapshot,
        trigger: RecoveryTrigger,
    ) -> Result<(u64, u32), RecoveryReport> {
        let mut state = self.inner.lock();
        state.latest.insert(fingerprint.to_string(), entity.clone());

        match state.scheduler.try_begin_attempt(fingerprint) {
            AttemptStart::InFlight => {
                tracing::debug!(fingerprint, trigger = trigger.as_str(), "Attempt already in flight");
                Err(RecoveryReport::InFlight)
            }
            AttemptStart::Cooldown => {
                // Re-arm for the remaining window so an early timer or poll cannot lose the retry.
                if trigger == RecoveryTrigger::Background {
                    let now = self.inner.clock.now();
                    let remaining = state
                        .scheduler
                        .state(fingerprint)
                        .and_then(|s| s.next_retry_at)
                        .map(|at| at.saturating_duration_since(now))
                        .unwrap_or_default();
                    self.arm_retry(&mut state, fingerprint, entity, remaining);
                }
                tracing::debug!(fingerprint, trigger = trigger.as_str(), "Attempt gated by cooldown");
                Err(RecoveryReport::Cooldown)
            }
            AttemptStart::Started => {
                state.next_attempt_id += 1;
                let attempt_id = state.next_attempt_id;
                state.active.insert(fingerprint.to_string(), attempt_id);
                // This attempt supersedes any pending timed retry.
                state.armed.remove(fingerprint);

                if let Some(key) = entity.entity_key() {
                    state.projector.update_optimistic_statuses([OptimisticStatusUpdate::set(
                        key,
                        EntityStatus::Checking,
                    )
                    .with_operation(OperationTag::Recheck)]);
                }

                let attempt = state.scheduler.attempt_count(fingerprint).saturating_add(1);
                Ok((attempt_id, attempt))
            }
        }
    }

    fn complete(
        &self,
        mut guard: AttemptGuard,
        entity: &EntitySnapshot,
        outcome: RecoveryOutcome,
    ) -> RecoveryReport {
        let fingerprint = guard.fingerprint.clone();
        let mut state = self.inner.lock();
        guard.disarm();

        if state.active.get(&fingerprint) != Some(&guard.attempt_id) {
            if state.owns_fingerprint(&fingerprint, guard.attempt_id) {
                state.clear_recheck_overlay(guard.overlay_key.as_deref());
            }
            tracing::info!(
                fingerprint = %fingerprint,
                outcome = outcome.label(),
                "Recovery attempt finished after its schedule was cleared; result dropped"
            );
            return RecoveryReport::Superseded;
        }

        let report = match outcome {
            RecoveryOutcome::Resolved => {
                state.scheduler.clear_schedule(&fingerprint);
                state.resolver.end_session(&fingerprint);
                state.resolver.set_persisted_override(entity, None);
                state.armed.remove(&fingerprint);
                tracing::info!(fingerprint = %fingerprint, "Recovery resolved");
                RecoveryReport::Resolved
            }
            outcome => {
                let classification = match &outcome {
                    RecoveryOutcome::PathNeeded { reason } => {
                        Some(Classification::PathNeeded { reason: *reason })
                    }
                    RecoveryOutcome::Classified(classification) => Some(classification.clone()),
                    RecoveryOutcome::Failed { error_class }
                        if is_actionable_for_probe_classification(Some(*error_class)) =>
                    {
                        Some(Classification::PathNeeded {
                            reason: derive_path_reason(Some(*error_class)),
                        })
                    }
                    RecoveryOutcome::Failed { .. } | RecoveryOutcome::Resolved => None,
                };
                if let Some(classification) = &classification {
                    state
                        .resolver
                        .record_session_classification(&fingerprint, classification.clone());
                }

                let scheduled = state.scheduler.schedule_retry(&fingerprint);
                state.clear_recheck_overlay(guard.overlay_key.as_deref());
                self.arm_retry(&mut state, &fingerprint, entity, scheduled.delay);

                tracing::warn!(
                    fingerprint = %fingerprint,
                    attempt = scheduled.attempt,
                    delay_ms = scheduled.delay.as_millis() as u64,
                    outcome = outcome.label(),
                    classification = classification.as_ref().map(Classification::kind),
                    "Recovery attempt failed; retry scheduled"
                );

                RecoveryReport::RetryScheduled {
                    attempt: scheduled.attempt,
                    delay: scheduled.delay,
                    classification,
                }
            }
        };

        state.active.remove(&fingerprint);
        state.scheduler.finish_attempt(&fingerprint);
        report
    }

    /// Arm (or re-arm) the timed retry for `fingerprint`. Replacing the handle
    /// cancels the previous timeout, so at most one future attempt is pending.
    fn arm_retry(
        &self,
        state: &mut CoordinatorState,
        fingerprint: &str,
        entity: &EntitySnapshot,
        delay: Duration,
    ) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        state.next_arm_id += 1;
        let arm_id = state.next_arm_id;

        let weak = Arc::downgrade(&self.inner);
        let key = fingerprint.to_string();
        let fallback = entity.clone();
        let task: BoxFuture<'static, ()> = Box::pin(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let coordinator = RecoveryCoordinator { inner };
            coordinator.disarm_fired(&key, arm_id);
            let entity = coordinator.latest_entity(&key).unwrap_or(fallback);
            let report = coordinator
                .run_attempt(entity, RecoveryTrigger::Background)
                .await;
            tracing::debug!(fingerprint = %key, report = ?report, "Timed recovery retry finished");
        });

        let handle = self.inner.timer.schedule_timeout(delay, task);
        state.armed.insert(
            fingerprint.to_string(),
            ArmedRetry { id: arm_id, handle },
        );
    }

    /// A fired timer leaves the armed map, unless a newer arm replaced it.
    fn disarm_fired(&self, fingerprint: &str, arm_id: u64) {
        let mut state = self.inner.lock();
        if state
            .armed
            .get(fingerprint)
            .is_some_and(|armed| armed.id == arm_id)
        {
            state.armed.remove(fingerprint);
        }
    }

    fn latest_entity(&self, fingerprint: &str) -> Option<EntitySnapshot> {
        self.inner.lock().latest.get(fingerprint).cloned()
    }

    // ------------------------------------------------------------------
    // Retry state
    // ------------------------------------------------------------------

    pub fn retry_state(&self, fingerprint: &str) -> Option<RetryState> {
        self.inner.lock().scheduler.state(fingerprint)
    }

    pub fn is_retry_armed(&self, fingerprint: &str) -> bool {
        self.inner
            .lock()
            .armed
            .get(fingerprint)
            .is_some_and(|armed| !armed.handle.is_cancelled())
    }

    /// Cancel the pending retry for `fingerprint` and drop its session
    /// classification. An attempt already running is left to finish, but
    /// its result is discarded.
    pub fn clear_schedule(&self, fingerprint: &str) {
        self.inner.lock().forget(fingerprint);
        tracing::debug!(fingerprint, "Recovery schedule cleared");
    }

    /// The entity was removed: forget retry state, overlay and timers.
    pub fn forget_entity(&self, entity: &EntitySnapshot) {
        let fingerprint = recovery_fingerprint(entity);
        let mut state = self.inner.lock();
        state.forget(&fingerprint);
        state.latest.remove(&fingerprint);
        if let Some(key) = entity.entity_key() {
            state.projector.remove(&key);
        }
    }

    // ------------------------------------------------------------------
    // Optimistic overlays
    // ------------------------------------------------------------------

    pub fn update_optimistic_statuses<I>(&self, updates: I)
    where
        I: IntoIterator<Item = OptimisticStatusUpdate>,
    {
        self.inner.lock().projector.update_optimistic_statuses(updates);
    }

    pub fn optimistic_entry(&self, id: &str) -> Option<OptimisticStatusEntry> {
        self.inner.lock().projector.entry(id).copied()
    }

    pub fn display_status(&self, entity: &EntitySnapshot) -> EntityStatus {
        self.inner.lock().projector.display_status(entity)
    }

    /// Fold a fresh authoritative snapshot in: reconcile overlays, forget
    /// fingerprints whose entity left the resume gate while idle and, when
    /// configured, those whose entity disappeared.
    pub fn apply_snapshot(&self, entities: &[EntitySnapshot]) -> SnapshotReconciliation {
        let mut state = self.inner.lock();

        state.latest = entities
            .iter()
            .map(|entity| (recovery_fingerprint(entity), entity.clone()))
            .collect();
        let cleared_overlays = state.projector.reconcile(entities);

        let tracked: HashSet<String> = state
            .scheduler
            .fingerprints()
            .into_iter()
            .chain(state.armed.keys().cloned())
            .collect();
        let mut forgotten_fingerprints = Vec::new();
        for fingerprint in tracked {
            let stale = match state.latest.get(&fingerprint) {
                None => self.inner.forget_missing_entities,
                // Recovered (or changed) outside the coordinator.
                Some(entity) => {
                    !should_use_recovery_gate_for_resume(entity)
                        && !state.scheduler.is_in_flight(&fingerprint)
                }
            };
            if stale {
                state.forget(&fingerprint);
                forgotten_fingerprints.push(fingerprint);
            }
        }
        forgotten_fingerprints.sort();

        if !forgotten_fingerprints.is_empty() {
            tracing::info!(
                forgotten = ?forgotten_fingerprints,
                "Dropped recovery state for entities no longer needing it"
            );
        }

        SnapshotReconciliation {
            cleared_overlays,
            forgotten_fingerprints,
        }
    }

    // ------------------------------------------------------------------
    // Classification
    // ------------------------------------------------------------------

    pub fn resolve_classification(&self, entity: &EntitySnapshot) -> Option<Classification> {
        self.inner.lock().resolver.resolve_classification(entity)
    }

    pub fn session_classification(&self, fingerprint: &str) -> Option<Classification> {
        self.inner
            .lock()
            .resolver
            .session_classification(fingerprint)
            .cloned()
    }

    /// Persist (or with `None`, clear) a user-chosen classification.
    pub fn set_persisted_override(
        &self,
        entity: &EntitySnapshot,
        value: Option<Classification>,
    ) -> bool {
        self.inner
            .lock()
            .resolver
            .set_persisted_override(entity, value)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Cancel every pending timer and unwind in-flight attempts. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.lock();
        let pending = state.armed.len();
        state.armed.clear();
        tracing::info!(pending_timers = pending, "Recovery coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedJitter;
    use crate::types::{ErrorClass, ErrorEnvelope, PathReason};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const COOLDOWN: Duration = Duration::from_secs(10);

    struct ScriptedExecutor {
        outcomes: Mutex<Vec<RecoveryOutcome>>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(mut outcomes: Vec<RecoveryOutcome>) -> Arc<Self> {
            outcomes.reverse();
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecoveryExecutor for ScriptedExecutor {
        async fn execute(&self, _fingerprint: &str, _context: &RecoveryContext) -> RecoveryOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(RecoveryOutcome::Resolved)
        }
    }

    /// Blocks until released, to hold an attempt in flight.
    struct GatedExecutor {
        release: Notify,
        started: Notify,
    }

    #[async_trait]
    impl RecoveryExecutor for GatedExecutor {
        async fn execute(&self, _fingerprint: &str, _context: &RecoveryContext) -> RecoveryOutcome {
            self.started.notify_one();
            self.release.notified().await;
            RecoveryOutcome::Failed {
                error_class: ErrorClass::MissingFiles,
            }
        }
    }

    fn coordinator(executor: Arc<dyn RecoveryExecutor>) -> RecoveryCoordinator {
        RecoveryCoordinator::builder(RecoveryConfig::default(), executor)
            .delay_policy(BackoffDelayPolicy::new(COOLDOWN).with_jitter(FixedJitter(0.5)))
            .build()
    }

    fn paused_missing(hash: &str) -> EntitySnapshot {
        EntitySnapshot::new(EntityStatus::Paused)
            .with_hash(hash)
            .with_error(ErrorEnvelope::new(ErrorClass::MissingFiles))
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_attempt_clears_everything() {
        let executor = ScriptedExecutor::new(vec![RecoveryOutcome::Resolved]);
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        let report = coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;

        assert_eq!(report, RecoveryReport::Resolved);
        assert_eq!(coordinator.retry_state("h1"), None);
        assert!(!coordinator.is_retry_armed("h1"));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_schedules_and_classifies() {
        let executor = ScriptedExecutor::new(vec![RecoveryOutcome::Failed {
            error_class: ErrorClass::PermissionDenied,
        }]);
        let coordinator = coordinator(executor);
        let entity = paused_missing("h1");

        let report = coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;

        let expected = Classification::PathNeeded {
            reason: PathReason::Unwritable,
        };
        assert_eq!(
            report,
            RecoveryReport::RetryScheduled {
                attempt: 1,
                delay: COOLDOWN,
                classification: Some(expected.clone()),
            }
        );
        assert_eq!(coordinator.resolve_classification(&entity), Some(expected));
        let state = coordinator.retry_state("h1").expect("retry state");
        assert!(!state.in_flight);
        assert_eq!(state.attempt_count, 1);
        assert!(coordinator.is_retry_armed("h1"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_actionable_failure_schedules_without_classification() {
        let executor = ScriptedExecutor::new(vec![RecoveryOutcome::Failed {
            error_class: ErrorClass::LocalError,
        }]);
        let coordinator = coordinator(executor);
        let entity = EntitySnapshot::new(EntityStatus::Paused)
            .with_hash("h1")
            .with_error(ErrorEnvelope::new(ErrorClass::LocalError));

        let report = coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;

        assert!(matches!(
            report,
            RecoveryReport::RetryScheduled {
                classification: None,
                ..
            }
        ));
        assert_eq!(coordinator.resolve_classification(&entity), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entity_outside_gate_is_not_attempted() {
        let executor = ScriptedExecutor::new(vec![]);
        let coordinator = coordinator(executor.clone());
        let mut entity = paused_missing("h1");
        entity.status = EntityStatus::Downloading;

        let report = coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;

        assert_eq!(report, RecoveryReport::NotActionable);
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_triggers_run_one_attempt() {
        let executor = Arc::new(GatedExecutor {
            release: Notify::new(),
            started: Notify::new(),
        });
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            let entity = entity.clone();
            async move {
                coordinator
                    .request_recovery(&entity, RecoveryTrigger::Background)
                    .await
            }
        });
        executor.started.notified().await;

        let second = coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;
        assert_eq!(second, RecoveryReport::InFlight);

        executor.release.notify_one();
        let first = first.await.expect("attempt task");
        assert!(matches!(first, RecoveryReport::RetryScheduled { attempt: 1, .. }));

        let third = coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;
        assert_eq!(third, RecoveryReport::Cooldown);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unwinds_in_flight_attempt() {
        let executor = Arc::new(GatedExecutor {
            release: Notify::new(),
            started: Notify::new(),
        });
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        let attempt = tokio::spawn({
            let coordinator = coordinator.clone();
            let entity = entity.clone();
            async move {
                coordinator
                    .request_recovery(&entity, RecoveryTrigger::Manual)
                    .await
            }
        });
        executor.started.notified().await;
        assert!(coordinator.retry_state("h1").is_some_and(|s| s.in_flight));

        coordinator.shutdown();

        assert_eq!(attempt.await.expect("attempt task"), RecoveryReport::Cancelled);
        assert_eq!(coordinator.retry_state("h1"), None);
        assert!(!coordinator.is_retry_armed("h1"));
        assert_eq!(coordinator.optimistic_entry("h1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_schedule_mid_flight_discards_result() {
        let executor = Arc::new(GatedExecutor {
            release: Notify::new(),
            started: Notify::new(),
        });
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        let attempt = tokio::spawn({
            let coordinator = coordinator.clone();
            let entity = entity.clone();
            async move {
                coordinator
                    .request_recovery(&entity, RecoveryTrigger::Manual)
                    .await
            }
        });
        executor.started.notified().await;

        coordinator.clear_schedule("h1");
        executor.release.notify_one();

        assert_eq!(attempt.await.expect("attempt task"), RecoveryReport::Superseded);
        assert_eq!(coordinator.retry_state("h1"), None);
        assert!(!coordinator.is_retry_armed("h1"));
        assert_eq!(coordinator.optimistic_entry("h1"), None);
        assert_eq!(coordinator.display_status(&entity), EntityStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_attempt_future_releases_in_flight() {
        let executor = Arc::new(GatedExecutor {
            release: Notify::new(),
            started: Notify::new(),
        });
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        let attempt = tokio::spawn({
            let coordinator = coordinator.clone();
            let entity = entity.clone();
            async move {
                coordinator
                    .request_recovery(&entity, RecoveryTrigger::Manual)
                    .await
            }
        });
        executor.started.notified().await;

        attempt.abort();
        let _ = attempt.await;

        assert_eq!(coordinator.retry_state("h1"), None);
        assert_eq!(coordinator.optimistic_entry("h1"), None);
        assert_eq!(coordinator.display_status(&entity), EntityStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn fired_timer_is_no_longer_armed_when_retry_is_skipped() {
        let executor = ScriptedExecutor::new(vec![RecoveryOutcome::Failed {
            error_class: ErrorClass::MissingFiles,
        }]);
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        coordinator
            .request_recovery(&entity, RecoveryTrigger::Background)
            .await;
        assert!(coordinator.is_retry_armed("h1"));

        // Latest view says the entity runs again; the retry will not pass the gate.
        let mut running = entity.clone();
        running.status = EntityStatus::Downloading;
        coordinator
            .inner
            .lock()
            .latest
            .insert("h1".to_string(), running);

        tokio::time::sleep(COOLDOWN * 2).await;

        assert_eq!(executor.calls(), 1);
        assert!(!coordinator.is_retry_armed("h1"));
    }

    #[tokio::test(start_paused = true)]
    async fn fired_timer_keeps_a_newer_arm() {
        let executor = ScriptedExecutor::new(vec![]);
        let coordinator = coordinator(executor);
        let entity = paused_missing("h1");

        let first = {
            let mut state = coordinator.inner.lock();
            coordinator.arm_retry(&mut state, "h1", &entity, COOLDOWN);
            state.next_arm_id
        };
        {
            let mut state = coordinator.inner.lock();
            coordinator.arm_retry(&mut state, "h1", &entity, COOLDOWN * 5);
        }

        coordinator.disarm_fired("h1", first);

        assert!(coordinator.is_retry_armed("h1"));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_puts_up_recheck_overlay_and_failure_takes_it_down() {
        let executor = Arc::new(GatedExecutor {
            release: Notify::new(),
            started: Notify::new(),
        });
        let coordinator = coordinator(executor.clone());
        let entity = paused_missing("h1");

        let attempt = tokio::spawn({
            let coordinator = coordinator.clone();
            let entity = entity.clone();
            async move {
                coordinator
                    .request_recovery(&entity, RecoveryTrigger::Manual)
                    .await
            }
        });
        executor.started.notified().await;

        assert_eq!(coordinator.display_status(&entity), EntityStatus::Checking);
        assert_eq!(
            coordinator.optimistic_entry("h1").and_then(|e| e.operation),
            Some(OperationTag::Recheck)
        );

        executor.release.notify_one();
        attempt.await.expect("attempt task");

        assert_eq!(coordinator.optimistic_entry("h1"), None);
        assert_eq!(coordinator.display_status(&entity), EntityStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_without_entity_forgets_it() {
        let executor = ScriptedExecutor::new(vec![RecoveryOutcome::Failed {
            error_class: ErrorClass::MissingFiles,
        }]);
        let coordinator = coordinator(executor);
        let entity = paused_missing("h1");

        coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;
        assert!(coordinator.is_retry_armed("h1"));

        let reconciliation = coordinator.apply_snapshot(&[paused_missing("h2")]);

        assert_eq!(reconciliation.forgotten_fingerprints, vec!["h1".to_string()]);
        assert_eq!(coordinator.retry_state("h1"), None);
        assert!(!coordinator.is_retry_armed("h1"));
        assert_eq!(coordinator.session_classification("h1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_clears_persisted_override() {
        let executor = ScriptedExecutor::new(vec![RecoveryOutcome::Resolved]);
        let coordinator = coordinator(executor);
        let entity = paused_missing("h1");

        coordinator.set_persisted_override(
            &entity,
            Some(Classification::PathNeeded {
                reason: PathReason::DiskFull,
            }),
        );

        coordinator
            .request_recovery(&entity, RecoveryTrigger::Manual)
            .await;

        assert_eq!(coordinator.resolve_classification(&entity), None);
    }
}
