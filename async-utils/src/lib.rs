//! Async building blocks shared by the recovery subsystem.
//!
//! - [`OrCancelExt`] races any future against a `CancellationToken`.
//! - [`TimerDriver`] is the `schedule_timeout(task, delay)` primitive; the
//!   handle it returns cancels the pending timeout when dropped, so a timer
//!   can never outlive the scope that armed it.

mod timer;

pub use timer::{TimerDriver, TimerHandle, TokioTimer};

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Returned when the token fired before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelErr {
    Cancelled,
}

/// Extension trait for making futures cancellable.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Resolve to `Ok(output)` if the future wins, `Err(CancelErr::Cancelled)`
    /// if the token is (or already was) cancelled first.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, CancelErr> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CancelErr::Cancelled),
            res = self => Ok(res),
        }
    }
}
