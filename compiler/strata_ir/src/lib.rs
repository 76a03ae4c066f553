//! Strata IR: the input data model of the lowering engine.
//!
//! - [`types`]: primitive scalars and custom bit-packed int/float types
//! - [`snode`]: the SNode arena describing the sparse data layout
//! - [`stmt`]: IR statements, offloaded tasks and the statement arena
//! - [`ops`]: operator tags
//! - [`builder`]: `KernelBuilder` for constructing kernels
//!
//! The IR arriving here is assumed type-checked. Constructors assert
//! structural invariants (disjoint bit ranges, field widths) so that a
//! malformed tree fails at construction rather than during lowering.

pub mod builder;
pub mod ops;
pub mod snode;
pub mod stmt;
pub mod types;

pub use builder::{KernelBuilder, KernelIr};
pub use ops::{AtomicOpType, BinaryOpType, SNodeOpType, UnaryOpType};
pub use snode::{Axis, SNode, SNodeId, SNodeKind, SNodeLayout, SNodeTree, MAX_NUM_AXES};
pub use stmt::{Block, IrGraph, Offload, PrintItem, RangeBound, Stmt, StmtId, StmtKind, TaskKind};
pub use types::{CustomFloatType, CustomIntType, DataType, PrimitiveType};
