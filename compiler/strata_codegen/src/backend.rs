//! Target-independent machine layer.
//!
//! Lowering writes into a [`Module`] through an [`IrBuilder`]. A finished
//! module is verified, linked into a [`Program`], and run by a [`Machine`]
//! on top of a `strata_rt` runtime.

pub mod exec;
pub mod ir;
pub mod ir_builder;
pub mod link;
mod print;
mod verify;
pub mod value_id;

pub use exec::{LaunchShape, Machine};
pub use ir::{
    BinOp, Callee, CastOp, FloatPredicate, IntPredicate, Intrinsic, Module, Op, RmwOp, Ty, UnOp,
};
pub use ir_builder::IrBuilder;
pub use link::{link, Program};
pub use value_id::{BlockId, FunctionId, ValueId};

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
