//! Engine selection.

use super::docker::DockerBackend;
use super::managed::ManagedEngine;
use super::process::ProcessBackend;
use super::MockEngine;
use crate::config::{EngineType, StartOptions};
use std::sync::Arc;
use tracing::debug;

/// Build the engine for `engine_type`.
pub fn build_engine(engine_type: EngineType, options: StartOptions) -> Arc<dyn MockEngine> {
    debug!(
        "using {} engine for {}",
        engine_type.as_str(),
        options.config_dir.display()
    );
    match engine_type {
        EngineType::Docker => Arc::new(ManagedEngine::new(DockerBackend::new(), options)),
        EngineType::Process => Arc::new(ManagedEngine::new(ProcessBackend::new(), options)),
    }
}
