//! Strata runtime support library.
//!
//! Generated kernels call into this crate by symbol ([`RuntimeFn`]); the
//! executor in `strata_codegen` routes those calls to [`natives::call`].
//!
//! # Modules
//!
//! - [`memory`]: simulated device memory (atomic words, byte addresses)
//! - [`abi`]: record layouts shared with generated code
//! - [`symbols`]: the closed set of runtime entry points
//! - [`host`]: the callback seam for calling compiled functions by address
//! - [`runtime`]: the runtime object, contexts and host-side field access
//! - [`natives`]: entry point dispatch
//!
//! Node methods, active-list generation, loop drivers and math helpers are
//! internal to the dispatch.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::cast_precision_loss,
    reason = "runtime values travel as raw 64-bit words and are reinterpreted at the ABI boundary"
)]

pub mod abi;
mod bits;
mod error;
mod format;
pub mod host;
mod lists;
mod math;
pub mod memory;
pub mod natives;
mod nodes;
mod parallel;
pub mod runtime;
pub mod symbols;

#[cfg(test)]
mod testing;

pub use error::RuntimeError;
pub use host::{Host, Lane, NativeCx};
pub use memory::Memory;
pub use runtime::{Runtime, RuntimeConfig};
pub use symbols::{MathFn, NodeMethod, RuntimeFn};
