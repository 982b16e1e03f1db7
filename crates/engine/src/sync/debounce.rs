//! Burst-collapsing wrapper.
//!
//! A debouncer feeds triggering calls to a worker task. Calls arriving
//! within `wait` of each other belong to one burst; the burst yields one
//! invocation on its leading edge, its trailing edge, or both, and
//! `max_wait` bounds how long a continuously-retriggered burst can postpone
//! the trailing invocation.

use std::time::Duration;

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::trace;

use super::{WrapperBody, WrapperSignal};

/// Edge configuration for a debounced body.
#[derive(Debug, Clone, Copy)]
pub struct DebounceOptions {
    /// Invoke on the first call of a burst.
    pub leading: bool,
    /// Invoke after the quiet period.
    pub trailing: bool,
    /// Upper bound on how long a retriggered burst may delay the trailing
    /// invocation.
    pub max_wait: Option<Duration>,
}

impl Default for DebounceOptions {
    fn default() -> Self {
        DebounceOptions {
            leading: false,
            trailing: true,
            max_wait: None,
        }
    }
}

/// Shared, keyed debouncer instance.
pub struct Debouncer {
    sender: UnboundedSender<WrapperSignal>,
    worker: JoinHandle<()>,
}

impl Debouncer {
    /// Creates a debouncer that schedules `body` according to `options`.
    pub fn new(wait: Duration, options: DebounceOptions, body: WrapperBody) -> Debouncer {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(receiver, wait, options, body));
        Debouncer { sender, worker }
    }

    /// Registers a triggering call carrying the parent state.
    pub fn call(&self, state: serde_json::Value) {
        let _ = self.sender.send(WrapperSignal::Call(state));
    }

    /// Runs any pending trailing invocation immediately.
    pub fn flush(&self) {
        let _ = self.sender.send(WrapperSignal::Flush);
    }

    /// Drops any pending trailing invocation.
    pub fn cancel(&self) {
        let _ = self.sender.send(WrapperSignal::Cancel);
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(mut receiver: UnboundedReceiver<WrapperSignal>, wait: Duration, options: DebounceOptions, body: WrapperBody) {
    while let Some(signal) = receiver.recv().await {
        let WrapperSignal::Call(state) = signal else {
            // Nothing pending outside a burst; flush/cancel are no-ops.
            continue;
        };

        let mut pending = None;
        if options.leading {
            trace!("debounce leading invocation");
            body(state).await;
        } else if options.trailing {
            pending = Some(state);
        }

        let burst_started = Instant::now();
        let mut deadline = burst_started + wait;
        loop {
            let effective_deadline = match options.max_wait {
                Some(max_wait) => deadline.min(burst_started + max_wait),
                None => deadline,
            };
            match timeout_at(effective_deadline, receiver.recv()).await {
                Ok(Some(WrapperSignal::Call(state))) => {
                    if options.trailing {
                        pending = Some(state);
                    }
                    deadline = Instant::now() + wait;
                }
                Ok(Some(WrapperSignal::Flush)) => {
                    if let Some(state) = pending.take() {
                        body(state).await;
                    }
                    break;
                }
                Ok(Some(WrapperSignal::Cancel)) => {
                    pending = None;
                    break;
                }
                Ok(None) => {
                    if let Some(state) = pending.take() {
                        body(state).await;
                    }
                    return;
                }
                Err(_elapsed) => {
                    // Quiet period over, or max_wait tripped.
                    if let Some(state) = pending.take() {
                        trace!("debounce trailing invocation");
                        body(state).await;
                    }
                    break;
                }
            }
        }
    }
}
