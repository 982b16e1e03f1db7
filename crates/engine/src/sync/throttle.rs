//! Rate-limiting wrapper: at most one invocation per window.

use std::time::Duration;

use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{Instant, timeout_at},
};
use tracing::trace;

use super::{WrapperBody, WrapperSignal};

/// Edge configuration for a throttled body.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleOptions {
    /// Invoke immediately on the call that opens a window.
    pub leading: bool,
    /// Coalesce calls inside the window into one invocation at its end.
    pub trailing: bool,
}

impl Default for ThrottleOptions {
    fn default() -> Self {
        ThrottleOptions {
            leading: true,
            trailing: true,
        }
    }
}

/// Shared, keyed throttler instance.
pub struct Throttler {
    sender: UnboundedSender<WrapperSignal>,
    worker: JoinHandle<()>,
}

impl Throttler {
    /// Creates a throttler that schedules `body` at most once per `wait`.
    pub fn new(wait: Duration, options: ThrottleOptions, body: WrapperBody) -> Throttler {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(receiver, wait, options, body));
        Throttler { sender, worker }
    }

    /// Registers a triggering call carrying the parent state.
    pub fn call(&self, state: serde_json::Value) {
        let _ = self.sender.send(WrapperSignal::Call(state));
    }

    /// Runs any coalesced invocation immediately, closing the window.
    pub fn flush(&self) {
        let _ = self.sender.send(WrapperSignal::Flush);
    }

    /// Drops any coalesced invocation.
    pub fn cancel(&self) {
        let _ = self.sender.send(WrapperSignal::Cancel);
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(mut receiver: UnboundedReceiver<WrapperSignal>, wait: Duration, options: ThrottleOptions, body: WrapperBody) {
    while let Some(signal) = receiver.recv().await {
        let WrapperSignal::Call(state) = signal else {
            continue;
        };

        let window_end = Instant::now() + wait;
        let mut pending = None;
        if options.leading {
            trace!("throttle leading invocation");
            body(state).await;
        } else if options.trailing {
            pending = Some(state);
        }

        loop {
            match timeout_at(window_end, receiver.recv()).await {
                Ok(Some(WrapperSignal::Call(state))) => {
                    if options.trailing {
                        pending = Some(state);
                    }
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
                    if let Some(state) = pending.take() {
                        trace!("throttle trailing invocation");
                        body(state).await;
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn counting_body(counter: Arc<AtomicUsize>) -> WrapperBody {
        Arc::new(move |_state: Value| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn calls_inside_a_window_coalesce_to_one_trailing_invocation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = Throttler::new(Duration::from_millis(100), ThrottleOptions::default(), counting_body(counter.clone()));

        for _ in 0..5 {
            throttler.call(Value::Null);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        // One leading invocation plus one trailing coalesced invocation.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn a_lone_call_invokes_once_on_the_leading_edge() {
        let counter = Arc::new(AtomicUsize::new(0));
        let throttler = Throttler::new(Duration::from_millis(100), ThrottleOptions::default(), counting_body(counter.clone()));

        throttler.call(Value::Null);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_leading_the_window_yields_a_single_trailing_invocation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let options = ThrottleOptions {
            leading: false,
            trailing: true,
        };
        let throttler = Throttler::new(Duration::from_millis(100), options, counting_body(counter.clone()));

        for _ in 0..5 {
            throttler.call(Value::Null);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
