//! Per-fingerprint retry gate
//!
//! The scheduler never retries anything itself. It answers one question,
//! "may an attempt for this fingerprint start now?", and records the
//! bookkeeping the caller reports back (`schedule_retry`, `finish_attempt`,
//! `clear_schedule`). There is no attempt ceiling; only the delay is capped.

use crate::backoff::BackoffDelayPolicy;
use crate::clock::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Bookkeeping for one fingerprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub in_flight: bool,
    pub next_retry_at: Option<Instant>,
    pub attempt_count: u32,
}

impl RetryState {
    fn is_idle(&self) -> bool {
        !self.in_flight && self.next_retry_at.is_none() && self.attempt_count == 0
    }
}

/// Outcome of [`RetryScheduler::try_begin_attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStart {
    Started,
    Cooldown,
    InFlight,
}

impl AttemptStart {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Cooldown => "cooldown",
            Self::InFlight => "in_flight",
        }
    }
}

/// What [`RetryScheduler::schedule_retry`] recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub attempt: u32,
    pub delay: Duration,
    pub next_retry_at: Instant,
}

pub struct RetryScheduler {
    states: HashMap<String, RetryState>,
    policy: BackoffDelayPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryScheduler {
    pub fn new(policy: BackoffDelayPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: HashMap::new(),
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &BackoffDelayPolicy {
        &self.policy
    }

    /// Check-and-set on the in-flight guard. In-flight is checked before cooldown.
    pub fn try_begin_attempt(&mut self, fingerprint: &str) -> AttemptStart {
        let now = self.clock.now();
        let state = self.states.entry(fingerprint.to_string()).or_default();

        if state.in_flight {
            return AttemptStart::InFlight;
        }
        if state.next_retry_at.is_some_and(|at| now < at) {
            return AttemptStart::Cooldown;
        }

        state.in_flight = true;
        AttemptStart::Started
    }

    /// Bump the attempt count and push `next_retry_at` out by the backoff delay.
    /// Leaves the in-flight flag untouched.
    pub fn schedule_retry(&mut self, fingerprint: &str) -> ScheduledRetry {
        let now = self.clock.now();
        let state = self.states.entry(fingerprint.to_string()).or_default();

        let attempt = state.attempt_count.saturating_add(1);
        state.attempt_count = attempt;
        let delay = self.policy.compute_delay(fingerprint, attempt);
        let next_retry_at = now + delay;
        state.next_retry_at = Some(next_retry_at);

        ScheduledRetry {
            attempt,
            delay,
            next_retry_at,
        }
    }

    /// Clear the in-flight flag, whatever the attempt's outcome was.
    pub fn finish_attempt(&mut self, fingerprint: &str) {
        if let Some(state) = self.states.get_mut(fingerprint) {
            state.in_flight = false;
            if state.is_idle() {
                self.states.remove(fingerprint);
            }
        }
    }

    /// Forget everything about `fingerprint`.
    ///
    /// Cancels a pending retry window; an attempt that is already running keeps
    /// running but its in-flight record is gone, so the caller must treat its
    /// result as stale.
    pub fn clear_schedule(&mut self, fingerprint: &str) {
        self.states.remove(fingerprint);
    }

    pub fn state(&self, fingerprint: &str) -> Option<RetryState> {
        self.states.get(fingerprint).copied()
    }

    pub fn attempt_count(&self, fingerprint: &str) -> u32 {
        self.states
            .get(fingerprint)
            .map(|s| s.attempt_count)
            .unwrap_or_default()
    }

    pub fn is_in_flight(&self, fingerprint: &str) -> bool {
        self.states.get(fingerprint).is_some_and(|s| s.in_flight)
    }

    pub fn tracked_fingerprints(&self) -> usize {
        self.states.len()
    }

    pub fn fingerprints(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }
}
