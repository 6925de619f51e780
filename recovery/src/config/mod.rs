/// Configuration for the recovery subsystem
///
/// Layered the 12-factor way:
/// 1. Defaults (from code)
/// 2. Config file (tt-recovery.toml)
/// 3. Environment variables (TT_RECOVERY_* prefix)
///
/// # Example
///
/// ```no_run
/// use tt_recovery::config::ConfigLoader;
///
/// let config = ConfigLoader::load_default().expect("Failed to load config");
/// let policy = config.delay_policy();
/// ```
pub mod error;
pub mod loader;
pub mod validator;

pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, ENV_PREFIX, JitterMode, RecoveryConfig};
pub use validator::SchemaValidator;
