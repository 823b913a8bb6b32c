use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ImageError, Result};

/// Default registry used to qualify short image names.
pub const DEFAULT_SEARCH_REGISTRY: &str = "docker.io";

/// Default maximum image cache size: 10 GB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Image pull configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Registries tried, in order, when a reference has no registry host
    pub search_registries: Vec<String>,

    /// Registries contacted over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Directory holding pulled images (a leading `~` is expanded)
    pub store_dir: PathBuf,

    /// Maximum total size of the image store in bytes
    pub max_cache_bytes: u64,

    /// Per-request pull deadline in seconds (unset = no deadline)
    pub pull_timeout_secs: Option<u64>,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            search_registries: vec![DEFAULT_SEARCH_REGISTRY.to_string()],
            insecure_registries: Vec::new(),
            store_dir: PathBuf::from("~/.stevedore/images"),
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            pull_timeout_secs: None,
            log_level: LogLevel::Info,
        }
    }
}

impl PullConfig {
    /// Load a YAML configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ImageError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: PullConfig = serde_yaml::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the puller cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.search_registries.iter().all(|r| r.trim().is_empty()) {
            return Err(ImageError::ConfigError(
                "search_registries must name at least one registry".to_string(),
            ));
        }
        if self.pull_timeout_secs == Some(0) {
            return Err(ImageError::ConfigError(
                "pull_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Store directory with `~` expanded to the home directory.
    pub fn resolved_store_dir(&self) -> PathBuf {
        expand_home(&self.store_dir)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
