//! A single supervised engine instance.

use super::EngineError;
use crate::debounce::{StopChannel, StopEvent};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::debug;

/// How a supervised instance ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    Success,
    Failure(String),
}

type ExitState = Option<Option<EngineError>>;

/// Handle to a running instance.
///
/// A supervisor task owns the underlying process and publishes its outcome on
/// a watch channel. The outcome is `None` if the stop was requested through
/// [`Instance::mark_stopping`] or the instance exited cleanly, and the error
/// otherwise.
pub struct Instance {
    id: String,
    pid: Option<u32>,
    stop_requested: Arc<AtomicBool>,
    exit: watch::Receiver<ExitState>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    /// Channels a stop waiter is already registered for.
    watchers: Mutex<Vec<StopChannel>>,
}

impl Instance {
    /// Spawn the supervisor. `run` receives a kill signal and resolves when the
    /// instance is gone.
    pub fn supervise<F, Fut>(id: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = Result<Exit, EngineError>> + Send + 'static,
    {
        let id = id.into();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        let supervised = run(kill_rx);
        let requested = Arc::clone(&stop_requested);
        let task_id = id.clone();
        tokio::spawn(async move {
            let result = supervised.await;
            let error = if requested.load(Ordering::SeqCst) {
                debug!("engine instance {task_id} stopped on request");
                None
            } else {
                match result {
                    Ok(Exit::Success) => {
                        debug!("engine instance {task_id} exited cleanly");
                        None
                    }
                    Ok(Exit::Failure(detail)) => Some(EngineError::Exited {
                        instance: task_id.clone(),
                        detail,
                    }),
                    Err(e) => Some(e),
                }
            };
            let _ = exit_tx.send(Some(error));
        });

        Self {
            id,
            pid: None,
            stop_requested,
            exit: exit_rx,
            kill: Mutex::new(Some(kill_tx)),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Record the OS process id behind this instance.
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// Mark the coming stop as requested so it is not reported as an error.
    pub fn mark_stopping(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Ask the supervisor to kill the instance outright.
    pub fn kill(&self) {
        if let Some(tx) = self.kill.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Wait until the instance is gone and return the stop error, if any.
    pub async fn wait(&self) -> Option<EngineError> {
        wait_exit(self.exit.clone()).await
    }

    /// Report this instance's stop on `stop` once it happens. At most one
    /// waiter runs per channel, later calls for the same channel do nothing.
    pub fn notify_on_stop(&self, stop: &StopChannel) {
        {
            let mut watchers = self.watchers.lock();
            if watchers.iter().any(|watched| watched.same_channel(stop)) {
                return;
            }
            watchers.push(stop.clone());
        }

        let exit = self.exit.clone();
        let id = self.id.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let error = wait_exit(exit).await;
            debug!("engine instance {id} gone, reporting stop");
            stop.notify(StopEvent::new(id, error));
        });
    }
}

async fn wait_exit(mut exit: watch::Receiver<ExitState>) -> Option<EngineError> {
    match exit.wait_for(Option::is_some).await {
        Ok(state) => state.clone().flatten(),
        // Supervisor went away without publishing; treat it as gone.
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pending_until_killed() -> Instance {
        Instance::supervise("test-1", |kill| async move {
            let _ = kill.await;
            Ok(Exit::Failure("killed".to_string()))
        })
    }

    #[tokio::test]
    async fn test_requested_stop_has_no_error() {
        let instance = pending_until_killed();
        assert!(instance.is_running());
        instance.mark_stopping();
        instance.kill();
        assert_eq!(instance.wait().await, None);
        assert!(!instance.is_running());
    }

    #[tokio::test]
    async fn test_unrequested_failure_is_reported() {
        let instance = pending_until_killed();
        instance.kill();
        let error = instance.wait().await.unwrap();
        assert!(matches!(error, EngineError::Exited { ref detail, .. } if detail == "killed"));
    }

    #[tokio::test]
    async fn test_clean_exit_has_no_error() {
        let instance = Instance::supervise("test-2", |_kill| async { Ok(Exit::Success) });
        assert_eq!(instance.wait().await, None);
    }

    #[tokio::test]
    async fn test_notify_on_stop_delivers_once_per_instance() {
        let instance = pending_until_killed();
        let channel = StopChannel::new();
        instance.notify_on_stop(&channel);
        instance.notify_on_stop(&channel);
        instance.mark_stopping();
        instance.kill();

        let event = timeout(Duration::from_secs(1), channel.recv())
            .await
            .unwrap();
        assert_eq!(event.instance, "test-1");
        assert!(event.error.is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(channel.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_notify_on_stop_registers_one_waiter_per_channel() {
        let instance = pending_until_killed();
        let first = StopChannel::new();
        let second = StopChannel::new();
        for _ in 0..5 {
            instance.notify_on_stop(&first);
        }
        instance.notify_on_stop(&second);
        assert_eq!(instance.watchers.lock().len(), 2);

        instance.mark_stopping();
        instance.kill();
        for channel in [&first, &second] {
            let event = timeout(Duration::from_secs(1), channel.recv())
                .await
                .unwrap();
            assert_eq!(event.instance, "test-1");
        }
    }
}
