//! Engine lifecycle shared by every way of running an instance.

use super::instance::Instance;
use super::probe;
use super::{EngineError, MockEngine};
use crate::config::StartOptions;
use crate::debounce::{StopChannel, StopEvent};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

static SYNTHETIC_SEQ: AtomicU64 = AtomicU64::new(1);

/// Report a stop that has no instance behind it, under a fresh id.
fn report_synthetic_stop(stop: &StopChannel, kind: &str) {
    let id = format!("{kind}-{}", SYNTHETIC_SEQ.fetch_add(1, Ordering::Relaxed));
    debug!("no engine instance running, reporting stop as {id}");
    stop.notify(StopEvent::new(id, None));
}

/// Launches and stops instances one way (container, local process).
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One-off work before the first launch, such as pulling an image.
    async fn prepare(&self, _options: &StartOptions) -> Result<(), EngineError> {
        Ok(())
    }

    async fn launch(&self, options: &StartOptions) -> Result<Instance, EngineError>;

    /// Stop `instance` and return once it is gone.
    async fn terminate(&self, instance: &Instance, options: &StartOptions);
}

#[derive(Default)]
struct EngineState {
    current: Option<Instance>,
    prepared: bool,
    removed: bool,
}

/// [`MockEngine`] over a [`Backend`].
pub struct ManagedEngine<B> {
    backend: B,
    options: StartOptions,
    state: Mutex<EngineState>,
}

impl<B: Backend> ManagedEngine<B> {
    pub fn new(backend: B, options: StartOptions) -> Self {
        Self {
            backend,
            options,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn options(&self) -> &StartOptions {
        &self.options
    }

    /// Id of the current instance while it is running.
    pub async fn current_instance(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .filter(|instance| instance.is_running())
            .map(|instance| instance.id().to_string())
    }

    async fn launch(&self, state: &mut EngineState) -> Result<(), EngineError> {
        if !state.prepared {
            self.backend.prepare(&self.options).await?;
            state.prepared = true;
        }

        let instance = self.backend.launch(&self.options).await?;
        info!(
            "started {} engine instance {} on port {}",
            self.backend.name(),
            instance.id(),
            self.options.port
        );

        if let Some(timeout) = self.options.ready_timeout {
            let port = self.options.port;
            tokio::spawn(async move {
                probe::wait_until_up(port, timeout).await;
            });
        }

        state.current = Some(instance);
        Ok(())
    }
}

#[async_trait]
impl<B: Backend> MockEngine for ManagedEngine<B> {
    async fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.removed {
            debug!("engine removed, not starting");
            return Ok(());
        }
        if state.current.as_ref().is_some_and(Instance::is_running) {
            debug!("engine instance already running");
            return Ok(());
        }
        self.launch(&mut state).await
    }

    async fn restart(&self, stop: &StopChannel) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        match state.current.take() {
            Some(old) => {
                old.notify_on_stop(stop);
                debug!("stopping engine instance {} for restart", old.id());
                self.backend.terminate(&old, &self.options).await;
            }
            // Removed, or never started: the caller still waits for one stop.
            None => report_synthetic_stop(stop, "restart"),
        }
        if state.removed {
            return Ok(());
        }
        self.launch(&mut state).await
    }

    async fn trigger_removal_and_notify(&self, stop: &StopChannel) {
        let mut state = self.state.lock().await;
        state.removed = true;

        match state.current.take() {
            Some(instance) if instance.is_running() => {
                instance.notify_on_stop(stop);
                info!("stopping engine instance {}", instance.id());
                self.backend.terminate(&instance, &self.options).await;
            }
            _ => report_synthetic_stop(stop, "removal"),
        }
    }

    async fn notify_on_stop(&self, stop: &StopChannel) {
        let state = self.state.lock().await;
        if let Some(instance) = &state.current {
            instance.notify_on_stop(stop);
        }
    }
}
