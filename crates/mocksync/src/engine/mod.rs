//! Mock engine handles.
//!
//! A [`MockEngine`] owns at most one running instance of the external mock
//! server. Stops of that instance, asked for or not, are reported through a
//! [`StopChannel`](crate::debounce::StopChannel).

mod builder;
mod docker;
mod instance;
mod managed;
mod probe;
mod process;

use crate::debounce::StopChannel;
use async_trait::async_trait;

pub use builder::build_engine;
pub use docker::{image_name, DockerBackend, CONTAINER_CONFIG_DIR, CONTAINER_PORT, IMAGE_REPOSITORY};
pub use instance::{Exit, Instance};
pub use managed::{Backend, ManagedEngine};
pub use probe::{status_url, wait_until_up};
pub use process::ProcessBackend;

/// Errors raised while provisioning or running an engine instance.
///
/// Fields are plain strings so a failure can travel inside a cloned
/// [`StopEvent`](crate::debounce::StopEvent).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
    #[error("failed to pull image {image}: {reason}")]
    Pull { image: String, reason: String },
    #[error("engine instance {instance} exited unexpectedly: {detail}")]
    Exited { instance: String, detail: String },
    #[error("engine I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Lifecycle operations the control loop drives.
#[async_trait]
pub trait MockEngine: Send + Sync {
    /// Launch an instance. Returns once the launch has been issued.
    async fn start(&self) -> Result<(), EngineError>;

    /// Stop the current instance and launch a replacement. Exactly one stop is
    /// reported on `stop`: the old instance's, or a synthetic one when no
    /// instance was there to stop.
    async fn restart(&self, stop: &StopChannel) -> Result<(), EngineError>;

    /// Tear the current instance down and report its stop on `stop`. With no
    /// instance running a stop is reported anyway.
    async fn trigger_removal_and_notify(&self, stop: &StopChannel);

    /// Report the current instance's stop on `stop` when it happens.
    async fn notify_on_stop(&self, stop: &StopChannel);
}
