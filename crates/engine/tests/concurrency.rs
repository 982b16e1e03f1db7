//! Dispatch disciplines: async batches, detached jobs, and the keyed
//! mutex/debounce wrappers driven end to end through playbooks.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use runbook_engine::{Element, ProxyContext, RootScene, RootSceneOptions, TagRegistry};
use serde_json::{Value, json};

async fn run_with_registry(content: &str, registry: Arc<TagRegistry>) -> Result<Vec<Value>> {
    let options = RootSceneOptions {
        registry: Some(registry),
        ..RootSceneOptions::default()
    };
    let root = RootScene::from_content(content, options)?;
    let outcome = root.execute().await;
    root.dispose().await;
    outcome
}

#[tokio::test]
async fn async_batch_results_keep_descriptor_order() {
    let registry = TagRegistry::builtin();
    let results = run_with_registry(
        "
- ~sleep: 30
- ~echo: a
- ~echo: b
- echo: c
",
        registry,
    )
    .await
    .expect("playbook runs");
    assert_eq!(results, vec![Value::Null, json!("a"), json!("b"), json!("c")]);
}

/// Tracks how many bodies run at once and the highest overlap observed.
struct Span {
    hold: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Element for Span {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

fn span_registry(hold: Duration) -> (Arc<TagRegistry>, Arc<AtomicUsize>) {
    let registry = TagRegistry::builtin();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (active_for_factory, peak_for_factory) = (active.clone(), peak.clone());
    registry.register("span", move |_| {
        Ok(Box::new(Span {
            hold,
            active: active_for_factory.clone(),
            peak: peak_for_factory.clone(),
        }))
    });
    (registry, peak)
}

#[tokio::test]
async fn async_steps_overlap_but_join_before_the_next_sequential_step() {
    let (registry, peak) = span_registry(Duration::from_millis(40));
    run_with_registry(
        "
- ~span:
- ~span:
- name: barrier
",
        registry,
    )
    .await
    .expect("playbook runs");
    assert!(peak.load(Ordering::SeqCst) >= 2, "async siblings never overlapped");
}

#[tokio::test]
async fn mutex_guarded_bodies_never_run_concurrently() {
    let (registry, peak) = span_registry(Duration::from_millis(60));

    let started_at = Instant::now();
    run_with_registry(
        "
- async: true
  fn-lock:
    name: concurrency-test-lock
  runs:
    - span:
- async: true
  fn-lock:
    name: concurrency-test-lock
  runs:
    - span:
",
        registry,
    )
    .await
    .expect("playbook runs");

    assert_eq!(peak.load(Ordering::SeqCst), 1, "guarded bodies overlapped");
    assert!(
        started_at.elapsed() >= Duration::from_millis(120),
        "wall clock shorter than the sum of both bodies"
    );
}

/// Counts executed increments for the debounce property.
struct Tick(Arc<AtomicUsize>);

#[async_trait]
impl Element for Tick {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn rapid_debounce_triggers_collapse_to_one_invocation_per_quiet_period() {
    let registry = TagRegistry::builtin();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    registry.register("tick", move |_| Ok(Box::new(Tick(counter.clone()))));

    let options = RootSceneOptions {
        registry: Some(registry),
        ..RootSceneOptions::default()
    };
    let root = RootScene::from_content(
        "
- loop: [0, 1, 2, 3]
  fn-debounce:
    name: concurrency-test-debounce
    wait: 80ms
  runs:
    - tick:
",
        options,
    )
    .expect("load playbook");
    root.execute().await.expect("playbook runs");

    // The scheduled body resolves scopes through the root, so it must stay
    // alive across the quiet period.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 1, "a burst of four triggers must coalesce");

    // Disposal runs the registered exit hooks, which tear the shared
    // debouncer out of the keyed registry.
    root.dispose().await;
    assert!(runbook_engine::sync::debouncer("concurrency-test-debounce").is_none());
}

#[tokio::test]
async fn throttled_triggers_run_at_most_once_per_window_plus_trailing() {
    let registry = TagRegistry::builtin();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    registry.register("tick", move |_| Ok(Box::new(Tick(counter.clone()))));

    let options = RootSceneOptions {
        registry: Some(registry),
        ..RootSceneOptions::default()
    };
    let root = RootScene::from_content(
        "
- loop: [0, 1, 2, 3]
  fn-throttle:
    name: concurrency-test-throttle
    wait: 80ms
  runs:
    - tick:
",
        options,
    )
    .expect("load playbook");
    root.execute().await.expect("playbook runs");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let observed = ticks.load(Ordering::SeqCst);
    root.dispose().await;
    assert!(observed <= 2, "throttle allowed {observed} invocations in one window");
    assert!(observed >= 1, "throttle never invoked the body");
}

/// Completes after a delay and flips a flag, to observe detached lifetimes.
struct SlowFlag {
    delay: Duration,
    flag: Arc<AtomicBool>,
}

#[async_trait]
impl Element for SlowFlag {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        tokio::time::sleep(self.delay).await;
        self.flag.store(true, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

#[tokio::test]
async fn detached_steps_outlive_the_pass_and_root_disposal_waits_for_them() {
    let registry = TagRegistry::builtin();
    let flag = Arc::new(AtomicBool::new(false));
    let flag_for_factory = flag.clone();
    registry.register("slow-flag", move |_| {
        Ok(Box::new(SlowFlag {
            delay: Duration::from_millis(80),
            flag: flag_for_factory.clone(),
        }))
    });

    let options = RootSceneOptions {
        registry: Some(registry),
        ..RootSceneOptions::default()
    };
    let root = RootScene::from_content(
        "
- detach: true
  slow-flag:
- echo: immediate
",
        options,
    )
    .expect("load playbook");

    let results = root.execute().await.expect("playbook runs");
    // The pass finished without waiting for the detached job.
    assert_eq!(results, vec![json!("immediate")]);
    assert!(!flag.load(Ordering::SeqCst), "execute waited for the detached job");

    root.dispose().await;
    assert!(flag.load(Ordering::SeqCst), "disposal did not wait for the detached job");
}

#[tokio::test]
async fn aborting_background_jobs_lets_disposal_return_immediately() {
    let registry = TagRegistry::builtin();
    let flag = Arc::new(AtomicBool::new(false));
    let flag_for_factory = flag.clone();
    registry.register("slow-flag", move |_| {
        Ok(Box::new(SlowFlag {
            delay: Duration::from_secs(30),
            flag: flag_for_factory.clone(),
        }))
    });

    let options = RootSceneOptions {
        registry: Some(registry),
        ..RootSceneOptions::default()
    };
    let root = RootScene::from_content("- detach: true\n  slow-flag:\n", options).expect("load playbook");
    root.execute().await.expect("playbook runs");

    root.abort_background_jobs();
    let started_at = Instant::now();
    root.dispose().await;
    assert!(started_at.elapsed() < Duration::from_secs(5), "disposal waited for an aborted job");
    assert!(!flag.load(Ordering::SeqCst));
}

/// Always fails; detached failures must not propagate.
struct AlwaysFail;

#[async_trait]
impl Element for AlwaysFail {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        anyhow::bail!("detached failure")
    }
}

#[tokio::test]
async fn detached_failures_are_recorded_but_never_propagated() {
    let registry = TagRegistry::builtin();
    registry.register("always-fail", |_| Ok(Box::new(AlwaysFail)));

    let results = run_with_registry(
        "
- detach: true
  always-fail:
- echo: unaffected
",
        registry,
    )
    .await
    .expect("detached failure must not fail the pass");
    assert_eq!(results, vec![json!("unaffected")]);
}

#[tokio::test]
async fn async_batch_failures_surface_at_the_join_after_all_members_finish() {
    let registry = TagRegistry::builtin();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    registry.register("tick", move |_| Ok(Box::new(Tick(counter.clone()))));
    registry.register("always-fail", |_| Ok(Box::new(AlwaysFail)));

    let outcome = run_with_registry(
        "
- ~always-fail:
- ~tick:
- ~tick:
",
        registry,
    )
    .await;

    assert!(outcome.is_err(), "batch failure must surface at the join");
    assert_eq!(ticks.load(Ordering::SeqCst), 2, "join must wait for every member");
}
