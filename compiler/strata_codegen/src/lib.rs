//! Strata code generation: lowers kernel IR into offloaded tasks.
//!
//! A kernel arrives as a list of offloaded tasks over a structure tree.
//! Lowering turns each task into a backend function, links the module and
//! runs it against the `strata_rt` runtime on a CPU worker pool or as a
//! simulated GPU grid.
//!
//! # Modules
//!
//! - [`backend`]: typed SSA module, builder, verifier, linker and executor
//! - [`codegen`]: statement lowering, bit-packed codecs, task emission
//! - [`kernel`]: `compile_kernel` and kernel launches
//! - [`config`]: target architecture and launch defaults
//! - [`error`]: compile-time failures
//!
//! # Debug Environment Variables
//!
//! - `STRATA_DEBUG_IR`: print the module text to stderr before linking.
//! - `STRATA_NUM_THREADS`: default worker count for CPU parallel tasks.
//! - `RUST_LOG=strata_codegen=debug`: task emission and launches.
//! - `RUST_LOG=strata_codegen=trace`: every declared function.

#![allow(
    // Machine words, indices and bit widths move between u32/u64/i32/i64
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    clippy::cast_precision_loss,
    // Lowering helpers thread values, pointers and node ids together
    clippy::too_many_arguments,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
)]

pub mod backend;
pub mod codegen;
pub mod config;
pub mod error;
pub mod kernel;

use std::sync::Once;

pub use codegen::{KernelCodegen, OffloadedTask};
pub use config::{Arch, CompileConfig};
pub use error::{CodegenError, CodegenResult};
pub use kernel::{compile_kernel, CompiledKernel, KernelArgs};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Does nothing when `RUST_LOG` is unset. Safe to call more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
