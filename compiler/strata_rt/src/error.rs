//! Errors surfaced by kernel execution.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// An `assert` statement failed; carries the formatted message.
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    /// A launch argument did not fit the context layout.
    #[error("invalid launch argument: {0}")]
    InvalidArgument(String),
}
