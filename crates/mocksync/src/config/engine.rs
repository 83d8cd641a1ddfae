//! Engine selection and launch options.

use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_VERSION: &str = "latest";
pub const DEFAULT_ENGINE_BINARY: &str = "imposter-engine";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How the mock engine is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Engine image run as a container through the docker CLI
    #[default]
    Docker,
    /// Engine launched as a local child process
    Process,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Docker => "docker",
            EngineType::Process => "process",
        }
    }

    /// Flag value wins over the configured value, which wins over the default.
    pub fn resolve(flag: Option<&str>, configured: Option<&str>) -> Result<Self, ConfigError> {
        match flag.or(configured) {
            Some(value) => value.parse(),
            None => Ok(EngineType::default()),
        }
    }
}

impl FromStr for EngineType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(EngineType::Docker),
            // "jvm" is what older configs call a locally launched engine
            "process" | "local" | "jvm" => Ok(EngineType::Process),
            other => Err(ConfigError::InvalidEngine(other.to_string())),
        }
    }
}

/// When to pull the engine image before starting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
}

/// What the control loop does when the engine stops on its own with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CrashPolicy {
    /// Report the failure and shut down
    #[default]
    Exit,
    /// Report the failure and start a fresh instance
    Restart,
}

/// Everything an engine needs to launch an instance.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub config_dir: PathBuf,
    pub port: u16,
    pub version: String,
    pub pull_policy: PullPolicy,
    pub log_level: String,
    /// Program run by the process engine
    pub engine_binary: PathBuf,
    /// Arguments placed before `--configDir`/`--listenPort` by the process engine
    pub engine_args: Vec<String>,
    /// How long to poll the engine status endpoint after launch; `None` skips it
    pub ready_timeout: Option<Duration>,
    /// Time an instance gets to exit after a polite stop before it is killed
    pub stop_grace: Duration,
}

impl StartOptions {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            port: DEFAULT_PORT,
            version: DEFAULT_VERSION.to_string(),
            pull_policy: PullPolicy::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            engine_binary: PathBuf::from(DEFAULT_ENGINE_BINARY),
            engine_args: Vec::new(),
            ready_timeout: Some(Duration::from_secs(60)),
            stop_grace: Duration::from_secs(10),
        }
    }

    /// Base URL on which the engine serves once running.
    pub fn engine_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}
