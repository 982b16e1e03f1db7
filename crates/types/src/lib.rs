//! Shared type definitions for the runbook engine and front ends.
//!
//! The models here mirror the document semantics the interpreter executes:
//! ordered step descriptors with a reserved control-attribute set, the
//! playbook manifest wrapper, the typed failure taxonomy, and the explicit
//! coercion applied during environment-override bootstrap. Authoring order is
//! preserved (via `IndexMap`) because tag classification is an ordered scan.

pub mod coerce;
pub mod descriptor;
pub mod error;

pub use coerce::coerce_to_declared_type;
pub use descriptor::{ASYNC_PREFIX, PlaybookDocument, PlaybookManifest, RESERVED_KEYS, StepDescriptor};
pub use error::RunbookError;
