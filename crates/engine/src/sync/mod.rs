//! Keyed concurrency wrappers.
//!
//! Mutex-lock, debounce, and throttle state is shared process-wide through
//! keyed registries so independent call sites naming the same key attach to
//! one instance. Registration is first-caller-wins: concurrent first use
//! installs a single shared entry.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use once_cell::sync::Lazy;
use serde_json::Value;

mod debounce;
mod throttle;

pub use debounce::{DebounceOptions, Debouncer};
pub use throttle::{ThrottleOptions, Throttler};

/// The async body scheduled by a debouncer or throttler.
pub type WrapperBody = Arc<dyn Fn(Value) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync>;

/// Control messages fed to a wrapper's worker task.
#[derive(Debug)]
pub(crate) enum WrapperSignal {
    /// A triggering call carrying the parent state.
    Call(Value),
    /// Run any pending invocation now.
    Flush,
    /// Drop any pending invocation.
    Cancel,
}

static LOCKS: Lazy<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static DEBOUNCERS: Lazy<Mutex<HashMap<String, Arc<Debouncer>>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static THROTTLERS: Lazy<Mutex<HashMap<String, Arc<Throttler>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns the shared mutex for `name`, installing it on first use.
///
/// The returned tokio mutex queues waiters fairly, so invocations acquire
/// the guard in submission order.
pub fn keyed_lock(name: &str) -> Arc<tokio::sync::Mutex<()>> {
    guard(&LOCKS).entry(name.to_string()).or_default().clone()
}

/// Returns the shared debouncer for `name`, creating it with `create` on
/// first use. Later callers share the first caller's instance.
pub fn obtain_debouncer(name: &str, create: impl FnOnce() -> Debouncer) -> Arc<Debouncer> {
    guard(&DEBOUNCERS)
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(create()))
        .clone()
}

/// Looks up an installed debouncer without creating one.
pub fn debouncer(name: &str) -> Option<Arc<Debouncer>> {
    guard(&DEBOUNCERS).get(name).cloned()
}

/// Cancels and removes the debouncer for `name`.
pub fn remove_debouncer(name: &str) -> bool {
    let removed = guard(&DEBOUNCERS).remove(name);
    match removed {
        Some(entry) => {
            entry.cancel();
            true
        }
        None => false,
    }
}

/// Returns the shared throttler for `name`, creating it on first use.
pub fn obtain_throttler(name: &str, create: impl FnOnce() -> Throttler) -> Arc<Throttler> {
    guard(&THROTTLERS)
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(create()))
        .clone()
}

/// Looks up an installed throttler without creating one.
pub fn throttler(name: &str) -> Option<Arc<Throttler>> {
    guard(&THROTTLERS).get(name).cloned()
}

/// Cancels and removes the throttler for `name`.
pub fn remove_throttler(name: &str) -> bool {
    let removed = guard(&THROTTLERS).remove(name);
    match removed {
        Some(entry) => {
            entry.cancel();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn keyed_locks_are_shared_by_name() {
        let first = keyed_lock("sync-tests-shared");
        let second = keyed_lock("sync-tests-shared");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &keyed_lock("sync-tests-other")));
    }

    #[tokio::test]
    async fn keyed_lock_serializes_overlapping_bodies() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let lock = keyed_lock("sync-tests-serialize");
                let _guard = lock.lock().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
