//! `cadence.toml` loading.
//!
//! Every section is optional; a missing file means all defaults. Environment
//! overrides are applied after parsing:
//! - `CADENCE_MAX_WORKERS` (or `MAX_WORKERS`) -> `scheduler.workers`
//! - `CADENCE_DISPATCH_MODE` -> `scheduler.dispatch_mode`
//! - `CADENCE_DB_PATH` -> `store.path`

use std::path::{Path, PathBuf};

use cadence_core::{DispatchMode, SchedulerConfig};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "cadence.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub executor: ExecutorConfig,
    pub log: LogConfig,
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tasks.db"),
        }
    }
}

/// Simulated task body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    /// Probability in `[0, 1]` that a body fails.
    pub failure_rate: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 1_000,
            max_duration_ms: 5_000,
            failure_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// SMTP settings. Credentials come from `SMTP_USERNAME` / `SMTP_PASSWORD`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub tls: Option<bool>,
    pub from: String,
    pub to: Vec<String>,
}

impl AppConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        Ok(config)
    }

    /// Load `path`, or `cadence.toml` in the working directory if it exists.
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let workers = lookup("CADENCE_MAX_WORKERS").or_else(|| lookup("MAX_WORKERS"));
        if let Some(v) = workers {
            self.scheduler.workers = v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("worker count must be a positive integer, got {v:?}"))
            })?;
        }
        if let Some(v) = lookup("CADENCE_DISPATCH_MODE") {
            self.scheduler.dispatch_mode = v
                .parse::<DispatchMode>()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(v) = lookup("CADENCE_DB_PATH") {
            self.store.path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let executor = &self.executor;
        if executor.min_duration_ms > executor.max_duration_ms {
            return Err(ConfigError::Invalid(format!(
                "executor.min_duration_ms ({}) is greater than max_duration_ms ({})",
                executor.min_duration_ms, executor.max_duration_ms
            )));
        }
        if !(0.0..=1.0).contains(&executor.failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "executor.failure_rate must be within 0..=1, got {}",
                executor.failure_rate
            )));
        }
        if let Some(email) = &self.email {
            if email.to.is_empty() {
                return Err(ConfigError::Invalid(
                    "email.to needs at least one recipient".to_string(),
                ));
            }
        }
        Ok(())
    }
}
