//! Built-in element catalogue.
//!
//! These are the leaf operations and wrapper tags shipped with the engine;
//! the core treats them the same as any embedder-registered element.

mod base;
mod echo;
mod exec;
mod fn_debounce;
mod fn_lock;
mod fn_throttle;
mod scene_tag;
mod sleep;
mod vars;

pub use base::Base;
pub use echo::Echo;
pub use exec::Exec;
pub use fn_debounce::FnDebounce;
pub use fn_lock::FnLock;
pub use fn_throttle::FnThrottle;
pub use scene_tag::SceneTag;
pub use sleep::Sleep;
pub use vars::Vars;
