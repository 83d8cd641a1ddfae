//! Engine control loop.
//!
//! Keeps one engine instance running, restarts it when the config directory
//! changes, and ends when the engine stops for any other reason or the
//! process is interrupted.

use crate::config::CrashPolicy;
use crate::debounce::{StopChannel, StopEvent};
use crate::engine::{EngineError, MockEngine};
use crate::watch::DirWatcher;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopPhase {
    /// Starting the first instance
    #[default]
    Running,
    AwaitingEvent,
    Restarting,
    Terminated,
}

/// Flags shared between the loop and the interrupt handler.
#[derive(Debug, Default)]
pub struct LoopState {
    terminating: AtomicBool,
    restarts_pending: AtomicUsize,
    phase: Mutex<LoopPhase>,
}

impl LoopState {
    pub fn phase(&self) -> LoopPhase {
        *self.phase.lock()
    }

    fn enter(&self, phase: LoopPhase) {
        *self.phase.lock() = phase;
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    /// Restarts whose stop has not been seen yet.
    pub fn restarts_pending(&self) -> usize {
        self.restarts_pending.load(Ordering::SeqCst)
    }

    /// Set `terminating`, returning the previous value.
    fn begin_termination(&self) -> bool {
        self.terminating.swap(true, Ordering::SeqCst)
    }

    fn add_pending(&self) {
        self.restarts_pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Consume one pending restart if there is one.
    fn take_pending(&self) -> bool {
        self.restarts_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Summary of a finished [`ControlLoop::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub restarts: usize,
    pub unexpected_stops: usize,
    pub interrupted: bool,
}

enum LoopEvent {
    Changed,
    WatcherClosed,
    Stopped(StopEvent),
}

pub struct ControlLoop {
    engine: Arc<dyn MockEngine>,
    stop: StopChannel,
    state: Arc<LoopState>,
    label: String,
    crash_policy: CrashPolicy,
}

impl ControlLoop {
    pub fn new(engine: Arc<dyn MockEngine>) -> Self {
        Self {
            engine,
            stop: StopChannel::new(),
            state: Arc::new(LoopState::default()),
            label: "config dir".to_string(),
            crash_policy: CrashPolicy::default(),
        }
    }

    pub fn with_crash_policy(mut self, crash_policy: CrashPolicy) -> Self {
        self.crash_policy = crash_policy;
        self
    }

    /// Name used for the watched directory in log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn state(&self) -> Arc<LoopState> {
        Arc::clone(&self.state)
    }

    pub fn stop_channel(&self) -> StopChannel {
        self.stop.clone()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            engine: Arc::clone(&self.engine),
            stop: self.stop.clone(),
            state: Arc::clone(&self.state),
        }
    }

    /// Start the engine and drive it until it stops for good.
    ///
    /// Errors starting or restarting the engine end the loop.
    pub async fn run(&self, mut watcher: Option<DirWatcher>) -> Result<LoopOutcome, EngineError> {
        self.state.enter(LoopPhase::Running);
        if let Err(e) = self.engine.start().await {
            self.state.enter(LoopPhase::Terminated);
            return Err(e);
        }

        let mut outcome = LoopOutcome::default();
        let result = loop {
            self.engine.notify_on_stop(&self.stop).await;
            self.state.enter(LoopPhase::AwaitingEvent);

            let event = match watcher.as_mut() {
                Some(watcher) => tokio::select! {
                    changed = watcher.changed() => match changed {
                        Some(()) => LoopEvent::Changed,
                        None => LoopEvent::WatcherClosed,
                    },
                    stopped = self.stop.recv() => LoopEvent::Stopped(stopped),
                },
                None => LoopEvent::Stopped(self.stop.recv().await),
            };

            match event {
                LoopEvent::Changed => {
                    if self.state.is_terminating() {
                        debug!("ignoring change in {} while shutting down", self.label);
                        continue;
                    }
                    info!("detected change in: {} - triggering restart", self.label);
                    self.state.add_pending();
                    self.state.enter(LoopPhase::Restarting);
                    outcome.restarts += 1;
                    if let Err(e) = self.engine.restart(&self.stop).await {
                        break Err(e);
                    }
                }
                LoopEvent::WatcherClosed => {
                    warn!(
                        "stopped watching {}, changes will not restart the engine",
                        self.label
                    );
                    watcher = None;
                }
                LoopEvent::Stopped(event) => {
                    let terminating = self.state.is_terminating();
                    let crash = event.error.as_ref().filter(|_| !terminating);
                    if let Some(e) = crash {
                        warn!("mock engine stopped unexpectedly: {e}");
                        outcome.unexpected_stops += 1;
                    }

                    if self.state.take_pending() {
                        debug!("engine instance {} stopped for restart", event.instance);
                        continue;
                    }

                    if crash.is_some() && self.crash_policy == CrashPolicy::Restart {
                        info!("starting a new mock engine instance after crash");
                        self.state.enter(LoopPhase::Running);
                        if let Err(e) = self.engine.start().await {
                            break Err(e);
                        }
                        continue;
                    }

                    debug!("engine instance {} stopped", event.instance);
                    break Ok(());
                }
            }
        };

        outcome.interrupted = self.state.begin_termination();
        self.state.enter(LoopPhase::Terminated);
        debug!("control loop shutting down");
        result.map(|()| outcome)
    }
}

/// Stops the engine on behalf of a signal handler.
#[derive(Clone)]
pub struct InterruptHandle {
    engine: Arc<dyn MockEngine>,
    stop: StopChannel,
    state: Arc<LoopState>,
}

impl InterruptHandle {
    /// Begin shutdown. Only the first call removes the engine; later calls
    /// return `false` and do nothing.
    pub async fn interrupt(&self) -> bool {
        if self.state.begin_termination() {
            debug!("already shutting down");
            return false;
        }
        info!("stopping mock engine");
        self.engine.trigger_removal_and_notify(&self.stop).await;
        true
    }
}

/// Call [`InterruptHandle::interrupt`] every time `signal` yields.
pub fn trap_exit<F, Fut>(handle: InterruptHandle, mut signal: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            signal().await;
            handle.interrupt().await;
        }
    })
}
