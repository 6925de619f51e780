use crate::backoff::{BackoffDelayPolicy, RandomJitter};
use crate::config::error::{ConfigError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix; `TT_RECOVERY_COOLDOWN_MS=5000` overrides `cooldown_ms`.
pub const ENV_PREFIX: &str = "TT_RECOVERY";

/// Recovery subsystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Cooldown unit in milliseconds; backoff is computed relative to it
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Jitter source for retry delays
    #[serde(default)]
    pub jitter: JitterMode,

    /// Drop retry state and timers for entities absent from a fresh snapshot
    #[serde(default = "default_true")]
    pub forget_missing_entities: bool,

    /// Validate the merged configuration against the embedded schema
    #[serde(default = "default_true")]
    pub schema_validation: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    /// Hash of fingerprint and attempt; same inputs, same delay
    #[default]
    Fingerprint,
    /// Thread RNG
    Random,
}

fn default_cooldown_ms() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: default_cooldown_ms(),
            jitter: JitterMode::default(),
            forget_missing_entities: default_true(),
            schema_validation: default_true(),
        }
    }
}

impl RecoveryConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Delay policy described by this configuration.
    pub fn delay_policy(&self) -> BackoffDelayPolicy {
        let policy = BackoffDelayPolicy::new(self.cooldown());
        match self.jitter {
            JitterMode::Fingerprint => policy,
            JitterMode::Random => policy.with_jitter(RandomJitter),
        }
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path (TOML, JSON or YAML by extension)
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Defaults
    /// 2. Config file, if provided
    /// 3. Environment variables (`TT_RECOVERY_` prefix, `__` for nesting)
    pub fn load(&self) -> Result<RecoveryConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&RecoveryConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let recovery_config: RecoveryConfig = config.try_deserialize()?;

        if recovery_config.schema_validation {
            let validator = crate::config::validator::SchemaValidator::new()?;
            validator.validate(&recovery_config)?;
        }

        tracing::debug!(
            cooldown_ms = recovery_config.cooldown_ms,
            jitter = ?recovery_config.jitter,
            "Loaded recovery configuration"
        );

        Ok(recovery_config)
    }

    /// Locate the default config file:
    /// 1. `./tt-recovery.toml`
    /// 2. `<config dir>/tt-recovery/config.toml`
    /// 3. `~/.tt-recovery.toml`
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./tt-recovery.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("tt-recovery").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".tt-recovery.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<RecoveryConfig> {
        let loader = match Self::find_config_file() {
            Some(config_path) => ConfigLoader::new().with_file(config_path),
            None => ConfigLoader::new(),
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
