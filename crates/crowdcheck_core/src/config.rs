//! Engine configuration.
//!
//! # Responsibility
//! - Describe where packages are stored, how logging is set up and which policy new
//!   packages get by default.
//! - Load that description from JSON.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - Unknown keys are rejected.

use crate::db::DEFAULT_BUSY_TIMEOUT;
use crate::logging::default_log_level;
use crate::model::policy::PackageProcessingPolicy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Processing policy applied to newly ingested packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub task_size: usize,
    pub group_size: usize,
    pub expiration_timeout_ms: u64,
}

impl PolicyConfig {
    pub fn to_policy(&self) -> Result<PackageProcessingPolicy, ConfigError> {
        PackageProcessingPolicy::new(
            self.task_size,
            self.group_size,
            Duration::from_millis(self.expiration_timeout_ms),
        )
        .map_err(|err| ConfigError::Invalid(format!("default_policy: {err}")))
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = PackageProcessingPolicy::default();
        Self {
            task_size: policy.task_size(),
            group_size: policy.group_size(),
            expiration_timeout_ms: u64::try_from(policy.expiration_timeout().as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

/// Top-level configuration for `Engine::open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// SQLite file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Longest wait on a locked database before a storage call fails.
    pub busy_timeout_ms: u64,
    /// `None` falls back to `default_log_level()`.
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files; `None` leaves logging untouched.
    pub log_dir: Option<PathBuf>,
    pub default_policy: PolicyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: u64::try_from(DEFAULT_BUSY_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            log_level: None,
            log_dir: None,
            default_policy: PolicyConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(default_log_level())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_policy.to_policy()?;
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "busy_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(log_dir) = &self.log_dir {
            if !log_dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    log_dir.display()
                )));
            }
        }
        Ok(())
    }
}
