//! IR statements and the statement arena.
//!
//! A kernel is a flat arena of [`Stmt`]s plus a root [`Block`] of offloaded
//! tasks. Operands are [`StmtId`]s of statements that precede their users in
//! a pre-order walk of the block tree; nested control flow owns its blocks
//! directly.

use std::fmt;

use smallvec::SmallVec;

use crate::ops::{AtomicOpType, BinaryOpType, SNodeOpType, UnaryOpType};
use crate::snode::SNodeId;
use crate::types::{DataType, PrimitiveType};

/// Index into the statement arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(u32);

impl StmtId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        StmtId(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Ordered statement list.
pub type Block = Vec<StmtId>;

/// One segment of a print statement.
#[derive(Clone, Debug, PartialEq)]
pub enum PrintItem {
    Str(String),
    Value(StmtId),
}

/// Loop bound of an offloaded range-for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RangeBound {
    Const(i32),
    /// `i32` stored in the global temporary buffer at this byte offset.
    Temporary(u64),
}

/// Kind of an offloaded task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Serial,
    RangeFor,
    StructFor,
    Listgen,
    Gc,
}

impl TaskKind {
    pub const fn name(self) -> &'static str {
        match self {
            TaskKind::Serial => "serial",
            TaskKind::RangeFor => "range_for",
            TaskKind::StructFor => "struct_for",
            TaskKind::Listgen => "listgen",
            TaskKind::Gc => "gc",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An offloaded task: one independently compiled fragment of a kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct Offload {
    pub kind: TaskKind,
    pub body: Block,
    /// Leaf node of a struct-for, target of listgen and gc.
    pub snode: Option<SNodeId>,
    pub begin: RangeBound,
    pub end: RangeBound,
    /// Requested block dimension; zero selects the configured default.
    pub block_dim: u32,
    /// Worker thread hint; zero selects the configured default.
    pub num_cpu_threads: u32,
    pub tls_prologue: Option<Block>,
    pub tls_epilogue: Option<Block>,
    pub bls_prologue: Option<Block>,
    pub bls_epilogue: Option<Block>,
    pub tls_size: u32,
    pub bls_size: u32,
}

impl Offload {
    pub fn new(kind: TaskKind) -> Self {
        Offload {
            kind,
            body: Block::new(),
            snode: None,
            begin: RangeBound::Const(0),
            end: RangeBound::Const(0),
            block_dim: 0,
            num_cpu_threads: 0,
            tls_prologue: None,
            tls_epilogue: None,
            bls_prologue: None,
            bls_epilogue: None,
            tls_size: 0,
            bls_size: 0,
        }
    }
}

/// Statement payloads.
#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    // -- Values --
    /// Constant of the result type, stored as raw bits.
    Const { bits: u64 },
    Rand,
    ArgLoad { arg_id: u32, is_ptr: bool },
    KernelReturn { value: StmtId },
    UnaryOp { op: UnaryOpType, operand: StmtId },
    BinaryOp { op: BinaryOpType, lhs: StmtId, rhs: StmtId },
    /// `cond != 0 ? lhs : rhs`
    Select { cond: StmtId, lhs: StmtId, rhs: StmtId },
    BitExtract { input: StmtId, begin: u32, end: u32 },
    /// `((in0 * s1 + in1) * s2 + in2) ...`
    Linearize { inputs: SmallVec<[StmtId; 4]>, strides: SmallVec<[u32; 4]> },
    RangeAssumption { input: StmtId, base: StmtId, low: i32, high: i32 },
    LoopUnique { input: StmtId },

    // -- Locals --
    Alloca,
    LocalLoad { ptr: StmtId },
    LocalStore { ptr: StmtId, value: StmtId },

    // -- Control flow --
    If { cond: StmtId, true_block: Option<Block>, false_block: Option<Block> },
    While { body: Block },
    /// Leave the innermost `while` when `cond == 0`.
    WhileControl { cond: StmtId },
    /// Skip to the next iteration of `scope` (a loop or an offloaded task).
    Continue { scope: StmtId },
    RangeFor { begin: StmtId, end: StmtId, reversed: bool, body: Block },

    // -- Diagnostics --
    Print { contents: Vec<PrintItem> },
    Assert { cond: StmtId, message: String, args: Vec<StmtId> },

    // -- Global memory --
    GetRoot,
    SNodeLookup { snode: SNodeId, input_snode: StmtId, input_index: StmtId, activate: bool },
    GetCh { input_ptr: StmtId, input_snode: SNodeId, chid: usize },
    GlobalLoad { ptr: StmtId },
    GlobalStore { ptr: StmtId, value: StmtId },
    /// Store several fields of one `bit_struct` at once.
    BitStructStore { ptr: StmtId, bit_struct: SNodeId, ch_ids: Vec<usize>, values: Vec<StmtId> },
    AtomicOp { op: AtomicOpType, dest: StmtId, value: StmtId },
    SNodeOp { op: SNodeOpType, snode: SNodeId, ptr: StmtId, index: Option<StmtId>, value: Option<StmtId> },
    ExternalPtr { base: StmtId, indices: SmallVec<[StmtId; 4]> },
    ExternalTensorShapeAlongAxis { arg_id: u32, axis: u32 },
    GlobalTemporary { offset: u64 },
    ThreadLocalPtr { offset: u64 },
    BlockLocalPtr { offset: StmtId },

    // -- Loop context --
    LoopIndex { loop_: StmtId, index: usize },
    LoopLinearIndex { loop_: StmtId },
    BlockCornerIndex { loop_: StmtId, index: usize },
    BlockDim,

    // -- Runtime services --
    ClearList { snode: SNodeId },
    InternalFunc { name: String },
    StackAlloca { max_size: u32, element: PrimitiveType },
    StackPush { stack: StmtId, value: StmtId },
    StackPop { stack: StmtId },
    StackLoadTop { stack: StmtId },
    StackLoadTopAdj { stack: StmtId },
    StackAccAdjoint { stack: StmtId, value: StmtId },

    // -- Tasks --
    Offloaded(Box<Offload>),
}

/// A statement: payload plus declared result type.
#[derive(Clone, Debug, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub ret_type: DataType,
}

/// Arena owning every statement of one kernel.
#[derive(Clone, Debug, Default)]
pub struct IrGraph {
    stmts: Vec<Stmt>,
}

impl IrGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: StmtKind, ret_type: DataType) -> StmtId {
        let id = StmtId::new(self.stmts.len() as u32);
        self.stmts.push(Stmt { kind, ret_type });
        id
    }

    pub fn get(&self, id: StmtId) -> &Stmt {
        debug_assert!(
            id.index() < self.stmts.len(),
            "StmtId {} out of bounds (graph has {} statements)",
            id.raw(),
            self.stmts.len()
        );
        &self.stmts[id.index()]
    }

    pub(crate) fn get_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index()]
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// The offload payload of `id`, if it is an offloaded task.
    pub fn offload(&self, id: StmtId) -> Option<&Offload> {
        match &self.get(id).kind {
            StmtKind::Offloaded(o) => Some(o),
            _ => None,
        }
    }
}

impl std::ops::Index<StmtId> for IrGraph {
    type Output = Stmt;

    fn index(&self, id: StmtId) -> &Stmt {
        self.get(id)
    }
}
