//! Single-delivery stop channel.
//!
//! Engine instances report their stop here. Reports are keyed by instance id:
//! the first report for an id is queued, repeats are dropped, so a stop that
//! is observed by several watchers still reaches the control loop once. Only
//! the most recent [`DELIVERED_HISTORY`] ids are remembered.

use crate::engine::EngineError;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Number of recent instance ids kept for duplicate detection.
pub const DELIVERED_HISTORY: usize = 64;

/// An engine instance stopped. `error` is set when the stop was not asked for.
#[derive(Debug, Clone)]
pub struct StopEvent {
    pub instance: String,
    pub error: Option<EngineError>,
}

impl StopEvent {
    pub fn new(instance: impl Into<String>, error: Option<EngineError>) -> Self {
        Self {
            instance: instance.into(),
            error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Default)]
struct State {
    delivered: HashSet<String>,
    delivered_order: VecDeque<String>,
    queue: VecDeque<StopEvent>,
}

impl State {
    /// Remember `instance`, forgetting the oldest id past the history limit.
    /// Returns false if it was already known.
    fn remember(&mut self, instance: &str) -> bool {
        if !self.delivered.insert(instance.to_string()) {
            return false;
        }
        self.delivered_order.push_back(instance.to_string());
        if self.delivered_order.len() > DELIVERED_HISTORY {
            if let Some(oldest) = self.delivered_order.pop_front() {
                self.delivered.remove(&oldest);
            }
        }
        true
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Cloneable handle; all clones share one queue.
#[derive(Clone, Default)]
pub struct StopChannel {
    inner: Arc<Shared>,
}

impl StopChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` unless a stop for the same instance was already seen.
    /// Returns whether the event was queued.
    pub fn notify(&self, event: StopEvent) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.remember(&event.instance) {
                debug!("dropping repeated stop for instance {}", event.instance);
                return false;
            }
            debug!("queued stop for instance {}", event.instance);
            state.queue.push_back(event);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Wait for the next stop. Each event goes to exactly one receiver.
    ///
    /// Dropping the returned future before it completes leaves the queue
    /// untouched.
    pub async fn recv(&self) -> StopEvent {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a notify between the check and the
            // await is not lost.
            notified.as_mut().enable();

            if let Some(event) = self.try_recv() {
                return event;
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<StopEvent> {
        self.inner.state.lock().queue.pop_front()
    }

    /// Forget every delivered id and drop anything still queued.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.delivered.clear();
        state.delivered_order.clear();
        state.queue.clear();
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// True if `other` is a clone of this channel.
    pub fn same_channel(&self, other: &StopChannel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
