//! Compile-time failures.
//!
//! Every variant is fatal: lowering stops at the first error and no partial
//! kernel is returned.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// A statement, operator/type combination or node kind with no lowering.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A runtime helper name that the runtime library does not define.
    #[error("runtime symbol `{0}` is not defined")]
    MissingRuntimeSymbol(String),
    /// A call whose operands disagree with the callee's declared signature.
    #[error("call to `{callee}` does not match its signature: {detail}")]
    SignatureMismatch { callee: String, detail: String },
    /// An internal invariant of the IR, the layout or the backend broke.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// The emitted module failed verification.
    #[error("module verification failed: {0}")]
    Verify(String),
}

impl CodegenError {
    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        CodegenError::Unsupported(what.into())
    }

    pub(crate) fn invariant(what: impl Into<String>) -> Self {
        CodegenError::Invariant(what.into())
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;
