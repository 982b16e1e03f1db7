//! Typed failure taxonomy shared across the engine.

use thiserror::Error;

/// Errors with contractual meaning to callers of the engine.
///
/// Operational flows wrap these in `anyhow::Error`; tests and callers that
/// need to distinguish the classes downcast to this enum.
#[derive(Debug, Error)]
pub enum RunbookError {
    /// A required step attribute was not provided.
    #[error("required attribute '{attribute}' is missing for tag '{tag}'")]
    Assertion {
        /// Tag the step was constructing.
        tag: String,
        /// Attribute the tag needs.
        attribute: String,
    },
    /// A tag name could not be resolved to an element constructor.
    #[error("tag '{0}' could not be resolved")]
    UnknownTag(String),
    /// A compiled playbook artifact could not be decrypted.
    #[error("failed to decrypt playbook artifact: {0}")]
    Decryption(String),
    /// A step body failed while executing.
    #[error("step '{step}' failed: {message}")]
    Execution {
        /// Display name or tag of the failing step.
        step: String,
        /// Failure detail from the element.
        message: String,
    },
}
