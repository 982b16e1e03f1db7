//! # Runbook Engine
//!
//! Interprets an ordered tree of step descriptors and executes each step as
//! a unit of work, with conditionals, loops, nested scopes, and several
//! concurrency disciplines (sequential, async-batch, detached, mutex,
//! debounce, throttle).
//!
//! ## Architecture
//!
//! - **`scope` / `scene` / `root`**: per-level variable scopes with
//!   copy-on-create inheritance, the scene tree, and the root's bootstrap
//!   concerns (environment overrides, encrypted persistence, background
//!   jobs, template exports).
//! - **`proxy`**: the control-flow and lifecycle wrapper around one element.
//! - **`group`**: the composite interpreter walking a descriptor list.
//! - **`registry`**: tag name → element constructor resolution.
//! - **`sync`**: keyed mutex/debounce/throttle wrappers.
//! - **`elements`**: the built-in leaf catalogue.
//!
//! ## Usage
//!
//! ```rust
//! use runbook_engine::{RootScene, RootSceneOptions};
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! runtime.block_on(async {
//!     let root = RootScene::from_content("- echo: hello", RootSceneOptions::default())?;
//!     let results = root.execute().await?;
//!     assert_eq!(results.len(), 1);
//!     root.dispose().await;
//!     Ok::<(), anyhow::Error>(())
//! })?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod crypto;
pub mod element;
pub mod elements;
pub mod group;
pub mod proxy;
pub mod registry;
pub mod resolve;
pub mod root;
pub mod scene;
pub mod scope;
pub mod sync;
pub mod time;

pub use element::{Element, ElementFactory, missing_attribute, require_attribute};
pub use group::Group;
pub use proxy::{ElementProxy, ProxyContext};
pub use registry::{TagRegistry, TagResolver};
pub use resolve::ScopeContext;
pub use root::{RootScene, RootSceneOptions};
pub use runbook_types::{PlaybookDocument, PlaybookManifest, RunbookError, StepDescriptor};
pub use scene::Scene;
pub use scope::VariableScope;
