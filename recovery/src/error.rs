//! Error types for the recovery subsystem
//!
//! Recovery-action failures are not errors here; they are outcomes that turn
//! into scheduled retries. What remains is programmer misuse and setup.

use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A scoped lookup ran outside `RecoveryScope::enter`.
    #[error(
        "{lookup} requested outside a recovery scope; wrap the caller in RecoveryScope::enter"
    )]
    ScopeMissing { lookup: &'static str },

    #[error("Recovery configuration invalid: {0}")]
    Config(#[from] ConfigError),
}
