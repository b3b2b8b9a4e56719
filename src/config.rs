//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (--config, or STEPFLOW_CONFIG read by the CLI)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use stepflow_core::{EngineConfig, Limits, RetryPolicy};

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Definition size and identifier limits.
    pub limits: Limits,
    /// Conflict retry schedule.
    pub retry: RetryPolicy,
    /// Storage configuration.
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from `path`, then applies environment variable
    /// overrides. The CLI resolves `--config` and STEPFLOW_CONFIG into `path`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    fn load_with(
        path: Option<&Path>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(var);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies overrides from a variable lookup, normally the process
    /// environment. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let parsed = |name: &str| var(name).and_then(|v| parse_value(&v));

        if let Some(n) = parsed("STEPFLOW_MAX_STATES") {
            self.limits.max_states = n;
        }
        if let Some(n) = parsed("STEPFLOW_MAX_TRANSITIONS") {
            self.limits.max_transitions = n;
        }
        if let Some(n) = parsed("STEPFLOW_MAX_IDENTIFIER_LENGTH") {
            self.limits.max_identifier_length = n;
        }
        if let Some(n) = parsed("STEPFLOW_MAX_SOURCES") {
            self.limits.max_sources_per_transition = n;
        }

        if let Some(n) = var("STEPFLOW_RETRY_ATTEMPTS").and_then(|v| parse_value(&v)) {
            self.retry.max_attempts = n;
        }
        if let Some(ms) = var("STEPFLOW_RETRY_BASE_MS").and_then(|v| parse_value(&v)) {
            self.retry.base_delay_ms = ms;
        }
        if let Some(ms) = var("STEPFLOW_RETRY_MAX_MS").and_then(|v| parse_value(&v)) {
            self.retry.max_delay_ms = ms;
        }

        if let Some(backend) = var("STEPFLOW_BACKEND").and_then(|v| v.parse().ok()) {
            self.storage.backend = backend;
        }
        if let Some(dir) = var("STEPFLOW_DATA") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        let zero = [
            ("limits.max_states", limits.max_states),
            ("limits.max_transitions", limits.max_transitions),
            ("limits.max_identifier_length", limits.max_identifier_length),
            (
                "limits.max_sources_per_transition",
                limits.max_sources_per_transition,
            ),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);

        if let Some((name, _)) = zero {
            return Err(ConfigError::ValidationError(format!(
                "{} must be at least 1",
                name
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            limits: self.limits,
            retry: self.retry,
        }
    }
}

fn parse_value<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

/// Which store backs the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// JSON files under `data_dir`.
    #[default]
    File,
    /// Process memory; nothing survives exit.
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Backend::File),
            "memory" | "mem" => Ok(Backend::Memory),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Base directory for the file backend.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::File,
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
