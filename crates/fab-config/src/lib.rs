// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {name}")]
    MissingEnv {
        /// Variable name.
        name: String,
    },

    /// An environment variable has an unusable value.
    #[error("invalid value for {name}: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// What was wrong.
        reason: String,
    },

    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

impl From<ConfigError> for fab_error::FabricError {
    fn from(err: ConfigError) -> Self {
        fab_error::FabricError::new(fab_error::ErrorCode::ConfigInvalid, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The default execution timeout is unusually large.
    LargeTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
    /// Per-tenant parallelism above 1 weakens FIFO ordering guarantees.
    ParallelismAboveOne {
        /// Configured parallelism.
        parallelism: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::LargeTimeout { secs } => {
                write!(f, "default timeout is large ({secs}s)")
            }
            ConfigWarning::ParallelismAboveOne { parallelism } => {
                write!(
                    f,
                    "per-tenant parallelism {parallelism} relaxes FIFO ordering within tenants"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// The required runtime environment. Missing values fail startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EnvConfig {
    /// Port the edge listens on.
    pub runtime_port: u16,
    /// Pub/sub endpoint.
    pub redis_url: String,
    /// Blob store endpoint.
    pub blob_endpoint: String,
    /// Row store DSN.
    pub row_dsn: String,
    /// Graph/vector store endpoint.
    pub graph_endpoint: String,
    /// Log level (defaults to `info`).
    pub log_level: String,
}

impl EnvConfig {
    /// Read the environment from the process.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingEnv`] / [`ConfigError::InvalidEnv`]; the
    /// core does not degrade gracefully.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the environment through a lookup function (testable).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| ConfigError::MissingEnv {
                name: name.to_string(),
            })
        };

        let port_raw = required("RUNTIME_PORT")?;
        let runtime_port = port_raw.parse::<u16>().map_err(|_| ConfigError::InvalidEnv {
            name: "RUNTIME_PORT".into(),
            reason: format!("'{port_raw}' is not a port number"),
        })?;

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        if !VALID_LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(ConfigError::InvalidEnv {
                name: "LOG_LEVEL".into(),
                reason: format!("'{log_level}' is not one of {VALID_LOG_LEVELS:?}"),
            });
        }

        Ok(Self {
            runtime_port,
            redis_url: required("REDIS_URL")?,
            blob_endpoint: required("BLOB_ENDPOINT")?,
            row_dsn: required("ROW_DSN")?,
            graph_endpoint: required("GRAPH_ENDPOINT")?,
            log_level,
        })
    }
}

// ---------------------------------------------------------------------------
// TOML overlay
// ---------------------------------------------------------------------------

/// Maximum allowed default timeout in seconds (24 hours).
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Threshold above which a timeout generates a warning.
const LARGE_TIMEOUT_THRESHOLD: u64 = 3_600;

/// Dispatcher and retry knobs loadable from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FabricConfig {
    /// Concurrent executions per tenant.
    #[serde(default = "default_parallelism")]
    pub per_tenant_parallelism: usize,
    /// Queue depth beyond which admission rejects with `overloaded`.
    #[serde(default = "default_high_water")]
    pub queue_high_water: usize,
    /// Execution budget when the intent type declares none, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retry attempt bound for retriable failure classes.
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,
    /// Base retry delay in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_parallelism() -> usize {
    1
}
fn default_high_water() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    100
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            per_tenant_parallelism: default_parallelism(),
            queue_high_water: default_high_water(),
            default_timeout_secs: default_timeout_secs(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_ms(),
        }
    }
}

impl FabricConfig {
    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] listing every problem found.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut reasons = Vec::new();
        if self.per_tenant_parallelism == 0 {
            reasons.push("per_tenant_parallelism must be at least 1".to_string());
        }
        if self.queue_high_water == 0 {
            reasons.push("queue_high_water must be at least 1".to_string());
        }
        if self.default_timeout_secs == 0 || self.default_timeout_secs > MAX_TIMEOUT_SECS {
            reasons.push(format!(
                "default_timeout_secs must be in 1..={MAX_TIMEOUT_SECS}"
            ));
        }
        if self.retry_max_attempts == 0 {
            reasons.push("retry_max_attempts must be at least 1".to_string());
        }
        if !reasons.is_empty() {
            return Err(ConfigError::ValidationError { reasons });
        }

        let mut warnings = Vec::new();
        if self.default_timeout_secs > LARGE_TIMEOUT_THRESHOLD {
            warnings.push(ConfigWarning::LargeTimeout {
                secs: self.default_timeout_secs,
            });
        }
        if self.per_tenant_parallelism > 1 {
            warnings.push(ConfigWarning::ParallelismAboveOne {
                parallelism: self.per_tenant_parallelism,
            });
        }
        Ok(warnings)
    }
}

/// Load a [`FabricConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`FabricConfig::default()`].
///
/// # Errors
///
/// [`ConfigError::FileNotFound`] / [`ConfigError::ParseError`] /
/// [`ConfigError::ValidationError`].
pub fn load_config(path: Option<&Path>) -> Result<FabricConfig, ConfigError> {
    let config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => FabricConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Parse a TOML string into a [`FabricConfig`].
///
/// # Errors
///
/// [`ConfigError::ParseError`] on malformed TOML.
pub fn parse_toml(content: &str) -> Result<FabricConfig, ConfigError> {
    toml::from_str::<FabricConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}
