//! Address resolution: turn a verified [`Module`] into an executable
//! [`Program`].
//!
//! Linking renumbers values into dense per-function registers, resolves
//! function and runtime addresses to tagged handles, collects string
//! constants, and checks every runtime call against its declared
//! signature. After linking, nothing refers to module IDs.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use strata_rt::RuntimeFn;

use super::ir::{
    BinOp, Callee, CastOp, FloatPredicate, IntPredicate, Intrinsic, Module, Op, RmwOp, Ty, UnOp,
};
use super::value_id::{BlockId, FunctionId, ValueId};
use crate::codegen::runtime_decl;
use crate::error::{CodegenError, CodegenResult};

/// Address tag of compiled functions.
pub const FUNC_TAG: u64 = 1 << 40;
/// Address tag of runtime entry points.
pub const NATIVE_TAG: u64 = 2 << 40;
pub(crate) const TAG_MASK: u64 = !((1 << 40) - 1);

pub(crate) type Reg = u32;
pub(crate) type Args = SmallVec<[Reg; 4]>;

/// A linked instruction: operands are registers, types are explicit.
#[derive(Clone, Debug)]
pub(crate) enum LOp {
    Const(u64),
    Bin(BinOp, Ty, Reg, Reg),
    Un(UnOp, Ty, Reg),
    ICmp(IntPredicate, Ty, Reg, Reg),
    FCmp(FloatPredicate, Ty, Reg, Reg),
    /// Cast from the first type to the second.
    Cast(CastOp, Ty, Ty, Reg),
    Select(Reg, Reg, Reg),
    Intrinsic(Intrinsic, Ty, SmallVec<[Reg; 2]>),
    Alloca { bytes: u64, align: u64 },
    Load(Ty, Reg),
    Store(Ty, Reg, Reg),
    PtrAdd(Reg, Reg),
    AtomicRmw(RmwOp, Ty, Reg, Reg),
    CallFunction(usize, Args),
    CallNative(RuntimeFn, Args),
    CallIndirect(Reg, Args),
    /// Index into [`Program::strings`].
    Str(usize),
    Br(usize),
    CondBr(Reg, usize, usize),
    Ret(Option<Reg>),
    Unreachable,
}

#[derive(Clone, Debug)]
pub(crate) struct LInst {
    pub dst: Option<Reg>,
    pub ty: Ty,
    pub op: LOp,
}

#[derive(Clone, Debug)]
pub(crate) struct LinkedFunction {
    pub name: String,
    pub num_regs: usize,
    pub num_params: usize,
    pub ret: Ty,
    pub blocks: Vec<Vec<LInst>>,
}

/// An executable program.
#[derive(Debug)]
pub struct Program {
    pub(crate) functions: Vec<LinkedFunction>,
    by_name: FxHashMap<String, usize>,
    /// Runtime entry points by address index; grows when runtime helpers
    /// ask for an address at run time.
    pub(crate) natives: Mutex<Vec<RuntimeFn>>,
    pub(crate) strings: Vec<String>,
}

impl Program {
    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Tagged address of function `index`.
    pub fn function_address(index: usize) -> u64 {
        FUNC_TAG | index as u64
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|f| f.name.as_str())
    }

    /// Tagged address of a runtime entry point, registering it on first use.
    pub fn native_address(&self, f: RuntimeFn) -> u64 {
        let mut natives = self.natives.lock();
        let index = natives.iter().position(|&g| g == f).unwrap_or_else(|| {
            natives.push(f);
            natives.len() - 1
        });
        NATIVE_TAG | index as u64
    }
}

/// Link every live function of `module`.
pub fn link(module: &Module) -> CodegenResult<Program> {
    let live: Vec<(FunctionId, &str)> = module
        .functions()
        .map(|(id, f)| (id, f.name.as_str()))
        .collect();
    let index_of: FxHashMap<FunctionId, usize> =
        live.iter().enumerate().map(|(i, &(id, _))| (id, i)).collect();

    let mut linker = Linker {
        module,
        index_of: &index_of,
        natives: Vec::new(),
        strings: Vec::new(),
        string_index: FxHashMap::default(),
    };
    let mut functions = Vec::with_capacity(live.len());
    let mut by_name = FxHashMap::default();
    for (i, &(id, name)) in live.iter().enumerate() {
        functions.push(linker.function(id)?);
        if by_name.insert(name.to_owned(), i).is_some() {
            return Err(CodegenError::invariant(format!("function `{name}` defined twice")));
        }
    }
    tracing::debug!(
        functions = functions.len(),
        natives = linker.natives.len(),
        strings = linker.strings.len(),
        "module linked"
    );
    Ok(Program {
        functions,
        by_name,
        natives: Mutex::new(linker.natives),
        strings: linker.strings,
    })
}

struct Linker<'a> {
    module: &'a Module,
    index_of: &'a FxHashMap<FunctionId, usize>,
    natives: Vec<RuntimeFn>,
    strings: Vec<String>,
    string_index: FxHashMap<String, usize>,
}

impl Linker<'_> {
    fn native_index(&mut self, f: RuntimeFn) -> usize {
        self.natives.iter().position(|&g| g == f).unwrap_or_else(|| {
            self.natives.push(f);
            self.natives.len() - 1
        })
    }

    fn string(&mut self, s: &str) -> usize {
        if let Some(&i) = self.string_index.get(s) {
            return i;
        }
        self.strings.push(s.to_owned());
        self.string_index.insert(s.to_owned(), self.strings.len() - 1);
        self.strings.len() - 1
    }

    fn target(&self, f: FunctionId) -> CodegenResult<usize> {
        self.index_of.get(&f).copied().ok_or_else(|| {
            CodegenError::invariant(format!(
                "reference to removed function `{}`",
                self.module.function(f).name
            ))
        })
    }

    fn function(&mut self, f: FunctionId) -> CodegenResult<LinkedFunction> {
        let module = self.module;
        let func = module.function(f);
        let mut regs: FxHashMap<ValueId, Reg> = FxHashMap::default();
        for &p in &func.params {
            let next = regs.len() as Reg;
            regs.insert(p, next);
        }
        for inst in module.insts(f) {
            if !inst.result.is_none() {
                let next = regs.len() as Reg;
                regs.insert(inst.result, next);
            }
        }
        let block_index: FxHashMap<BlockId, usize> =
            func.blocks.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let reg = |v: ValueId| -> CodegenResult<Reg> {
            regs.get(&v).copied().ok_or_else(|| {
                CodegenError::invariant(format!("@{}: value {v:?} used outside its function", func.name))
            })
        };
        let block = |b: BlockId| -> CodegenResult<usize> {
            block_index.get(&b).copied().ok_or_else(|| {
                CodegenError::invariant(format!("@{}: branch to foreign block {b:?}", func.name))
            })
        };
        let ty = |v: ValueId| module.value_ty(v);

        let mut blocks = Vec::with_capacity(func.blocks.len());
        for &b in &func.blocks {
            let mut out = Vec::with_capacity(module.block(b).insts.len());
            for inst in &module.block(b).insts {
                let result_ty = ty(inst.result);
                let op = match &inst.op {
                    Op::Const(bits) => LOp::Const(*bits),
                    Op::Bin(op, a, c) => LOp::Bin(*op, ty(*a), reg(*a)?, reg(*c)?),
                    Op::Un(op, a) => LOp::Un(*op, ty(*a), reg(*a)?),
                    Op::ICmp(p, a, c) => LOp::ICmp(*p, ty(*a), reg(*a)?, reg(*c)?),
                    Op::FCmp(p, a, c) => LOp::FCmp(*p, ty(*a), reg(*a)?, reg(*c)?),
                    Op::Cast(op, a) => LOp::Cast(*op, ty(*a), result_ty, reg(*a)?),
                    Op::Select(c, a, d) => LOp::Select(reg(*c)?, reg(*a)?, reg(*d)?),
                    Op::Intrinsic(i, args) => LOp::Intrinsic(
                        *i,
                        args.first().map_or(Ty::Void, |&a| ty(a)),
                        args.iter().map(|&a| reg(a)).collect::<CodegenResult<_>>()?,
                    ),
                    Op::Alloca { ty: elem, count, align } => LOp::Alloca {
                        bytes: elem.bytes() * u64::from(*count),
                        align: u64::from(*align),
                    },
                    Op::Load(p) => LOp::Load(result_ty, reg(*p)?),
                    Op::Store { ptr, value } => LOp::Store(ty(*value), reg(*ptr)?, reg(*value)?),
                    Op::PtrAdd(p, o) => LOp::PtrAdd(reg(*p)?, reg(*o)?),
                    Op::AtomicRmw(op, p, v) => LOp::AtomicRmw(*op, ty(*v), reg(*p)?, reg(*v)?),
                    Op::Call { callee, args } => {
                        let arg_tys: Vec<Ty> = args.iter().map(|&a| ty(a)).collect();
                        let regs: Args = args.iter().map(|&a| reg(a)).collect::<CodegenResult<_>>()?;
                        match callee {
                            Callee::Function(g) => {
                                let target = module.function(*g);
                                let params: Vec<Ty> = target.params.iter().map(|&p| ty(p)).collect();
                                if params != arg_tys || target.ret != result_ty {
                                    return Err(CodegenError::SignatureMismatch {
                                        callee: target.name.clone(),
                                        detail: format!(
                                            "expected ({}) -> {}, called with ({}) -> {}",
                                            join(&params),
                                            target.ret,
                                            join(&arg_tys),
                                            result_ty
                                        ),
                                    });
                                }
                                LOp::CallFunction(self.target(*g)?, regs)
                            }
                            Callee::Runtime(rf) => {
                                runtime_decl::check_call(*rf, &arg_tys, result_ty)?;
                                LOp::CallNative(*rf, regs)
                            }
                            Callee::Indirect(p) => LOp::CallIndirect(reg(*p)?, regs),
                        }
                    }
                    Op::FuncAddr(g) => LOp::Const(Program::function_address(self.target(*g)?)),
                    Op::RuntimeAddr(rf) => LOp::Const(NATIVE_TAG | self.native_index(*rf) as u64),
                    Op::GlobalStr(s) => LOp::Str(self.string(s)),
                    Op::Br(t) => LOp::Br(block(*t)?),
                    Op::CondBr(c, t, e) => LOp::CondBr(reg(*c)?, block(*t)?, block(*e)?),
                    Op::Ret(v) => LOp::Ret(v.map(reg).transpose()?),
                    Op::Unreachable => LOp::Unreachable,
                };
                let dst = if inst.result.is_none() {
                    None
                } else {
                    Some(reg(inst.result)?)
                };
                out.push(LInst { dst, ty: result_ty, op });
            }
            blocks.push(out);
        }
        Ok(LinkedFunction {
            name: func.name.clone(),
            num_regs: regs.len(),
            num_params: func.params.len(),
            ret: func.ret,
            blocks,
        })
    }
}

pub(crate) fn join(tys: &[Ty]) -> String {
    tys.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}
