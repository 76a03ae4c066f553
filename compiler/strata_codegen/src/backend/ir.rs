//! Module representation: typed SSA values inside basic blocks.
//!
//! Everything lives in three module-wide arenas (values, blocks,
//! functions). Values carry their [`Ty`]; instructions refer to operands by
//! [`ValueId`] and to branch targets by [`BlockId`].

use std::fmt;

use smallvec::SmallVec;
use strata_ir::PrimitiveType;
use strata_rt::RuntimeFn;

use super::value_id::{BlockId, FunctionId, ValueId};

/// Machine types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

impl Ty {
    pub const fn bits(self) -> u32 {
        match self {
            Ty::Void => 0,
            Ty::I1 => 1,
            Ty::I8 => 8,
            Ty::I16 => 16,
            Ty::I32 | Ty::F32 => 32,
            Ty::I64 | Ty::F64 | Ty::Ptr => 64,
        }
    }

    /// Memory footprint; `i1` occupies a byte.
    pub const fn bytes(self) -> u64 {
        match self {
            Ty::Void => 0,
            Ty::I1 => 1,
            other => other.bits() as u64 / 8,
        }
    }

    pub const fn is_int(self) -> bool {
        matches!(self, Ty::I1 | Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    /// Integer type of exactly `bits` bits.
    pub const fn int(bits: u32) -> Option<Ty> {
        match bits {
            1 => Some(Ty::I1),
            8 => Some(Ty::I8),
            16 => Some(Ty::I16),
            32 => Some(Ty::I32),
            64 => Some(Ty::I64),
            _ => None,
        }
    }

    /// Machine type of a scalar; signedness lives in the instructions.
    pub const fn of_primitive(p: PrimitiveType) -> Ty {
        match p {
            PrimitiveType::U1 => Ty::I1,
            PrimitiveType::I8 | PrimitiveType::U8 => Ty::I8,
            PrimitiveType::I16 | PrimitiveType::U16 => Ty::I16,
            PrimitiveType::I32 | PrimitiveType::U32 => Ty::I32,
            PrimitiveType::I64 | PrimitiveType::U64 => Ty::I64,
            PrimitiveType::F32 => Ty::F32,
            PrimitiveType::F64 => Ty::F64,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Ty::Void => "void",
            Ty::I1 => "i1",
            Ty::I8 => "i8",
            Ty::I16 => "i16",
            Ty::I32 => "i32",
            Ty::I64 => "i64",
            Ty::F32 => "f32",
            Ty::F64 => "f64",
            Ty::Ptr => "ptr",
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    pub const fn is_float(self) -> bool {
        matches!(self, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem)
    }

    pub const fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::SDiv => "sdiv",
            BinOp::UDiv => "udiv",
            BinOp::SRem => "srem",
            BinOp::URem => "urem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::FAdd => "fadd",
            BinOp::FSub => "fsub",
            BinOp::FMul => "fmul",
            BinOp::FDiv => "fdiv",
            BinOp::FRem => "frem",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    FNeg,
    Not,
}

impl UnOp {
    pub const fn name(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::FNeg => "fneg",
            UnOp::Not => "not",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntPredicate {
    pub const fn name(self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
        }
    }
}

/// Ordered float comparisons (false when either side is NaN).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    /// Either operand is NaN.
    Uno,
}

impl FloatPredicate {
    pub const fn name(self) -> &'static str {
        match self {
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::One => "one",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
            FloatPredicate::Uno => "uno",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
    Bitcast,
    PtrToInt,
    IntToPtr,
}

impl CastOp {
    pub const fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::FpToSi => "fptosi",
            CastOp::FpToUi => "fptoui",
            CastOp::SiToFp => "sitofp",
            CastOp::UiToFp => "uitofp",
            CastOp::Bitcast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Sqrt,
    Floor,
    Ceil,
    Fabs,
    /// Count leading zeros; defined as the bit width for zero.
    Ctlz,
    ThreadIdx,
    BlockIdx,
    BlockDim,
    GridDim,
    /// Base address of the block-local buffer.
    BlsBase,
}

impl Intrinsic {
    pub const fn name(self) -> &'static str {
        match self {
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Floor => "floor",
            Intrinsic::Ceil => "ceil",
            Intrinsic::Fabs => "fabs",
            Intrinsic::Ctlz => "ctlz",
            Intrinsic::ThreadIdx => "thread_idx",
            Intrinsic::BlockIdx => "block_idx",
            Intrinsic::BlockDim => "block_dim",
            Intrinsic::GridDim => "grid_dim",
            Intrinsic::BlsBase => "bls_base",
        }
    }

    pub const fn arity(self) -> usize {
        match self {
            Intrinsic::Sqrt
            | Intrinsic::Floor
            | Intrinsic::Ceil
            | Intrinsic::Fabs
            | Intrinsic::Ctlz => 1,
            Intrinsic::ThreadIdx
            | Intrinsic::BlockIdx
            | Intrinsic::BlockDim
            | Intrinsic::GridDim
            | Intrinsic::BlsBase => 0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RmwOp {
    Add,
    FAdd,
    Min,
    Max,
    UMin,
    UMax,
    And,
    Or,
    Xor,
    Xchg,
}

impl RmwOp {
    pub const fn name(self) -> &'static str {
        match self {
            RmwOp::Add => "add",
            RmwOp::FAdd => "fadd",
            RmwOp::Min => "min",
            RmwOp::Max => "max",
            RmwOp::UMin => "umin",
            RmwOp::UMax => "umax",
            RmwOp::And => "and",
            RmwOp::Or => "or",
            RmwOp::Xor => "xor",
            RmwOp::Xchg => "xchg",
        }
    }
}

/// Call target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    Function(FunctionId),
    Runtime(RuntimeFn),
    /// Function pointer held in a value.
    Indirect(ValueId),
}

/// Instruction payloads. The result type is the type of the instruction's
/// result value.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Raw bits of a constant of the result type.
    Const(u64),
    Bin(BinOp, ValueId, ValueId),
    Un(UnOp, ValueId),
    ICmp(IntPredicate, ValueId, ValueId),
    FCmp(FloatPredicate, ValueId, ValueId),
    Cast(CastOp, ValueId),
    Select(ValueId, ValueId, ValueId),
    Intrinsic(Intrinsic, SmallVec<[ValueId; 2]>),
    /// `count` elements of `ty`.
    Alloca { ty: Ty, count: u32, align: u32 },
    Load(ValueId),
    Store { ptr: ValueId, value: ValueId },
    /// Byte offset from a pointer.
    PtrAdd(ValueId, ValueId),
    AtomicRmw(RmwOp, ValueId, ValueId),
    Call { callee: Callee, args: SmallVec<[ValueId; 4]> },
    FuncAddr(FunctionId),
    RuntimeAddr(RuntimeFn),
    /// Address of a NUL-terminated string constant.
    GlobalStr(String),
    Br(BlockId),
    CondBr(ValueId, BlockId, BlockId),
    Ret(Option<ValueId>),
    Unreachable,
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Br(_) | Op::CondBr(..) | Op::Ret(_) | Op::Unreachable)
    }

    /// Value operands in evaluation order.
    pub fn operands(&self) -> SmallVec<[ValueId; 4]> {
        let mut out = SmallVec::new();
        match self {
            Op::Const(_)
            | Op::Alloca { .. }
            | Op::FuncAddr(_)
            | Op::RuntimeAddr(_)
            | Op::GlobalStr(_)
            | Op::Br(_)
            | Op::Unreachable
            | Op::Ret(None) => {}
            Op::Bin(_, a, b)
            | Op::ICmp(_, a, b)
            | Op::FCmp(_, a, b)
            | Op::PtrAdd(a, b)
            | Op::AtomicRmw(_, a, b)
            | Op::Store { ptr: a, value: b } => {
                out.push(*a);
                out.push(*b);
            }
            Op::Un(_, a) | Op::Cast(_, a) | Op::Load(a) | Op::CondBr(a, ..) | Op::Ret(Some(a)) => {
                out.push(*a);
            }
            Op::Select(c, a, b) => out.extend([*c, *a, *b]),
            Op::Intrinsic(_, args) => out.extend(args.iter().copied()),
            Op::Call { callee, args } => {
                if let Callee::Indirect(f) = callee {
                    out.push(*f);
                }
                out.extend(args.iter().copied());
            }
        }
        out
    }

    /// Rewrite every value operand.
    pub fn map_values(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            Op::Const(_)
            | Op::Alloca { .. }
            | Op::FuncAddr(_)
            | Op::RuntimeAddr(_)
            | Op::GlobalStr(_)
            | Op::Br(_)
            | Op::Unreachable
            | Op::Ret(None) => {}
            Op::Bin(_, a, b)
            | Op::ICmp(_, a, b)
            | Op::FCmp(_, a, b)
            | Op::PtrAdd(a, b)
            | Op::AtomicRmw(_, a, b)
            | Op::Store { ptr: a, value: b } => {
                *a = f(*a);
                *b = f(*b);
            }
            Op::Un(_, a) | Op::Cast(_, a) | Op::Load(a) | Op::CondBr(a, ..) | Op::Ret(Some(a)) => {
                *a = f(*a);
            }
            Op::Select(c, a, b) => {
                *c = f(*c);
                *a = f(*a);
                *b = f(*b);
            }
            Op::Intrinsic(_, args) => args.iter_mut().for_each(|a| *a = f(*a)),
            Op::Call { callee, args } => {
                if let Callee::Indirect(p) = callee {
                    *p = f(*p);
                }
                args.iter_mut().for_each(|a| *a = f(*a));
            }
        }
    }

    /// Rewrite branch targets.
    pub fn map_blocks(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Op::Br(b) => *b = f(*b),
            Op::CondBr(_, t, e) => {
                *t = f(*t);
                *e = f(*e);
            }
            _ => {}
        }
    }

    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Op::Br(b) => smallvec::smallvec![*b],
            Op::CondBr(_, t, e) => smallvec::smallvec![*t, *e],
            _ => SmallVec::new(),
        }
    }

    /// Function this instruction refers to, by call or by address.
    pub fn referenced_function(&self) -> Option<FunctionId> {
        match self {
            Op::Call {
                callee: Callee::Function(f),
                ..
            }
            | Op::FuncAddr(f) => Some(*f),
            _ => None,
        }
    }
}

/// One instruction; `result` is [`ValueId::NONE`] for `void` results.
#[derive(Clone, Debug, PartialEq)]
pub struct Inst {
    pub result: ValueId,
    pub op: Op,
}

#[derive(Clone, Debug)]
pub struct BlockData {
    pub name: String,
    pub func: FunctionId,
    pub insts: Vec<Inst>,
}

impl BlockData {
    pub fn terminator(&self) -> Option<&Inst> {
        self.insts.last().filter(|i| i.op.is_terminator())
    }
}

#[derive(Clone, Debug)]
pub struct FunctionData {
    pub name: String,
    pub params: Vec<ValueId>,
    pub ret: Ty,
    /// Blocks in layout order; the first is the entry block.
    pub blocks: Vec<BlockId>,
    /// Cleared by dead-function elimination.
    pub live: bool,
}

/// A module under construction.
#[derive(Clone, Debug, Default)]
pub struct Module {
    values: Vec<Ty>,
    blocks: Vec<BlockData>,
    functions: Vec<FunctionData>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn new_value(&mut self, ty: Ty) -> ValueId {
        let id = ValueId::new(self.values.len() as u32);
        self.values.push(ty);
        id
    }

    /// Type of `v`; `Void` for the `NONE` sentinel.
    pub fn value_ty(&self, v: ValueId) -> Ty {
        if v.is_none() {
            return Ty::Void;
        }
        self.values.get(v.raw() as usize).copied().unwrap_or(Ty::Void)
    }

    pub(crate) fn add_function(&mut self, name: &str, params: &[Ty], ret: Ty) -> FunctionId {
        let params = params.iter().map(|&ty| self.new_value(ty)).collect();
        let id = FunctionId::new(self.functions.len() as u32);
        self.functions.push(FunctionData {
            name: name.to_owned(),
            params,
            ret,
            blocks: Vec::new(),
            live: true,
        });
        id
    }

    pub(crate) fn add_block(&mut self, func: FunctionId, name: &str) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.to_owned(),
            func,
            insts: Vec::new(),
        });
        self.functions[func.raw() as usize].blocks.push(id);
        id
    }

    pub fn function(&self, f: FunctionId) -> &FunctionData {
        &self.functions[f.raw() as usize]
    }

    pub fn block(&self, b: BlockId) -> &BlockData {
        &self.blocks[b.raw() as usize]
    }

    pub(crate) fn block_mut(&mut self, b: BlockId) -> &mut BlockData {
        &mut self.blocks[b.raw() as usize]
    }

    /// Live functions in declaration order.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &FunctionData)> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| f.live)
            .map(|(i, f)| (FunctionId::new(i as u32), f))
    }

    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions().find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    /// Instructions of `f` in layout order.
    pub fn insts(&self, f: FunctionId) -> impl Iterator<Item = &Inst> {
        self.function(f)
            .blocks
            .iter()
            .flat_map(move |&b| self.block(b).insts.iter())
    }

    /// Visit every instruction of `f` mutably.
    pub fn for_each_inst_mut(&mut self, f: FunctionId, mut visit: impl FnMut(&mut Inst)) {
        let blocks = self.function(f).blocks.clone();
        for b in blocks {
            for inst in &mut self.block_mut(b).insts {
                visit(inst);
            }
        }
    }

    /// Duplicate `src` under a new name, with fresh values and blocks.
    pub fn clone_function(&mut self, src: FunctionId, name: &str) -> FunctionId {
        let data = self.function(src).clone();
        let param_tys: Vec<Ty> = data.params.iter().map(|&p| self.value_ty(p)).collect();
        let dst = self.add_function(name, &param_tys, data.ret);

        let mut value_map: rustc_hash::FxHashMap<ValueId, ValueId> = data
            .params
            .iter()
            .copied()
            .zip(self.function(dst).params.iter().copied())
            .collect();
        let mut block_map = rustc_hash::FxHashMap::default();
        for &b in &data.blocks {
            let name = self.block(b).name.clone();
            block_map.insert(b, self.add_block(dst, &name));
        }
        // Results first, so forward references inside loops resolve.
        for &b in &data.blocks {
            let results: Vec<ValueId> = self.block(b).insts.iter().map(|i| i.result).collect();
            for r in results.into_iter().filter(|r| !r.is_none()) {
                let ty = self.value_ty(r);
                value_map.insert(r, self.new_value(ty));
            }
        }
        for &b in &data.blocks {
            let insts: Vec<Inst> = self
                .block(b)
                .insts
                .iter()
                .map(|inst| {
                    let mut op = inst.op.clone();
                    op.map_values(|v| value_map.get(&v).copied().unwrap_or(v));
                    op.map_blocks(|t| block_map.get(&t).copied().unwrap_or(t));
                    Inst {
                        result: value_map.get(&inst.result).copied().unwrap_or(ValueId::NONE),
                        op,
                    }
                })
                .collect();
            let target = block_map[&b];
            self.block_mut(target).insts = insts;
        }
        dst
    }

    /// Mark every function not reachable from `roots` dead. Returns the
    /// number of functions removed.
    pub fn retain_reachable(&mut self, roots: &[FunctionId]) -> usize {
        let mut reachable = vec![false; self.functions.len()];
        let mut work: Vec<FunctionId> = roots.to_vec();
        while let Some(f) = work.pop() {
            let slot = &mut reachable[f.raw() as usize];
            if *slot {
                continue;
            }
            *slot = true;
            work.extend(self.insts(f).filter_map(|i| i.op.referenced_function()));
        }
        let mut removed = 0;
        for (f, keep) in self.functions.iter_mut().zip(reachable) {
            if f.live && !keep {
                f.live = false;
                removed += 1;
            }
        }
        removed
    }
}
