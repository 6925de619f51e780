//! Required-context access to the coordinator.
//!
//! UI code deep in a component tree should not thread the coordinator through
//! every call. `RecoveryScope::enter` installs it for the duration of a future;
//! lookups outside that future fail loudly instead of falling back to some
//! default instance.

use crate::coordinator::RecoveryCoordinator;
use crate::error::{RecoveryError, Result};
use std::future::Future;

tokio::task_local! {
    static CURRENT: RecoveryCoordinator;
}

pub struct RecoveryScope;

impl RecoveryScope {
    /// Run `future` with `coordinator` installed as the current scope.
    pub async fn enter<F>(coordinator: RecoveryCoordinator, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(coordinator, future).await
    }

    /// Synchronous variant of [`RecoveryScope::enter`].
    pub fn enter_sync<R>(coordinator: RecoveryCoordinator, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(coordinator, f)
    }

    /// The coordinator of the enclosing scope.
    pub fn current() -> Result<RecoveryCoordinator> {
        Self::with(RecoveryCoordinator::clone)
    }

    /// Borrow the coordinator of the enclosing scope.
    pub fn with<R>(f: impl FnOnce(&RecoveryCoordinator) -> R) -> Result<R> {
        CURRENT
            .try_with(f)
            .map_err(|_| RecoveryError::ScopeMissing {
                lookup: "recovery coordinator",
            })
    }

    pub fn is_active() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }
}
