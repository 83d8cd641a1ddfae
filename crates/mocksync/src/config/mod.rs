//! Configuration for mocksync.
//!
//! Two sources feed a run: the CLI config file (`~/.mocksync/config.yaml`
//! unless `--config` points elsewhere) and command line flags. Flags always
//! win; the file fills in what the flags leave unset.

mod engine;
mod upstream;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use engine::{
    CrashPolicy, EngineType, PullPolicy, StartOptions, DEFAULT_ENGINE_BINARY, DEFAULT_LOG_LEVEL,
    DEFAULT_PORT, DEFAULT_VERSION,
};
pub use upstream::{ConnectionPoolConfig, ProxyConfig};

/// Suffixes that mark a file as mock engine configuration.
pub const CONFIG_FILE_SUFFIXES: [&str; 3] = ["-config.yaml", "-config.yml", "-config.json"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("cannot find config dir: {0}")]
    NotFound(PathBuf),
    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("no mock configuration files found in: {0}")]
    NoConfigFiles(PathBuf),
    #[error("invalid engine type '{0}' (valid: docker, process)")]
    InvalidEngine(String),
}

/// Settings read from the CLI config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_binary: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engine_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<PullPolicy>,
    #[serde(default)]
    pub crash_policy: CrashPolicy,
    /// Quiet period after a config change before a restart is triggered
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

fn default_watch_debounce_ms() -> u64 {
    500
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            engine: None,
            version: None,
            log_level: None,
            engine_binary: None,
            engine_args: Vec::new(),
            pull_policy: None,
            crash_policy: CrashPolicy::default(),
            watch_debounce_ms: default_watch_debounce_ms(),
            connection_pool: ConnectionPoolConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load `explicit` if given, otherwise the default location if it exists,
    /// otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".mocksync").join("config.yaml"))
    }
}

/// First value that is set: flag, then configured, then `default`.
pub fn get_or_default<T>(flag: Option<T>, configured: Option<T>, default: T) -> T {
    flag.or(configured).unwrap_or(default)
}

/// Returns true if `file_name` looks like a mock engine configuration file.
pub fn matches_config_file(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    CONFIG_FILE_SUFFIXES
        .iter()
        .any(|suffix| lower.ends_with(suffix))
}

/// Check that `dir` exists, is a directory, and directly contains at least one
/// configuration file.
pub fn validate_config_dir(dir: &Path) -> Result<(), ConfigError> {
    let metadata = std::fs::metadata(dir).map_err(|_| ConfigError::NotFound(dir.to_path_buf()))?;
    if !metadata.is_dir() {
        return Err(ConfigError::NotADirectory(dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    let found = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .any(|entry| matches_config_file(&entry.file_name().to_string_lossy()));

    if found {
        Ok(())
    } else {
        Err(ConfigError::NoConfigFiles(dir.to_path_buf()))
    }
}
