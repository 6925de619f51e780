//! Cancellable one-shot timeouts.

use crate::OrCancelExt;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Schedules `task` to run once after `delay`.
///
/// Implementations must guarantee that `task` never starts once the returned
/// handle has been cancelled or dropped.
pub trait TimerDriver: Send + Sync {
    fn schedule_timeout(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;
}

/// Cancellation handle for a scheduled timeout. Cancels on drop.
#[derive(Debug)]
#[must_use = "dropping a TimerHandle cancels the timeout"]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A handle whose timeout will never fire.
    pub fn inert() -> Self {
        let token = CancellationToken::new();
        token.cancel();
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Tokio-backed timer. Every timeout is a child of `root`, so cancelling the
/// root tears down all pending timeouts at once.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    root: CancellationToken,
}

impl TokioTimer {
    pub fn new(root: CancellationToken) -> Self {
        Self { root }
    }
}

impl TimerDriver for TokioTimer {
    fn schedule_timeout(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let token = self.root.child_token();

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(
                delay_ms = delay.as_millis() as u64,
                "No tokio runtime available; timeout dropped"
            );
            return TimerHandle::inert();
        };

        let wait_token = token.clone();
        runtime.spawn(async move {
            if tokio::time::sleep(delay).or_cancel(&wait_token).await.is_ok() {
                task.await;
            }
        });

        TimerHandle::new(token)
    }
}
