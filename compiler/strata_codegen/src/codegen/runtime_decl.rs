//! Declared signatures of the runtime entry points.
//!
//! Every runtime call is emitted by name and checked against these
//! declarations when the module is linked. `f32` arguments travel as `f32`,
//! node and list handles as opaque pointers, SNode ids as `i32`.

use smallvec::{smallvec, SmallVec};
use strata_rt::{NodeMethod, RuntimeFn};

use crate::backend::ir::Ty;
use crate::backend::link::join;
use crate::error::{CodegenError, CodegenResult};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: SmallVec<[Ty; 8]>,
    pub ret: Ty,
    /// Extra arguments beyond `params` are accepted.
    pub variadic: bool,
}

impl Signature {
    fn fixed(params: &[Ty], ret: Ty) -> Self {
        Signature {
            params: params.iter().copied().collect(),
            ret,
            variadic: false,
        }
    }
}

/// Signature of `f`.
pub fn signature(f: RuntimeFn) -> Signature {
    use Ty::{Ptr, Void, I32, I64};
    match f {
        RuntimeFn::ContextGetArgs => Signature::fixed(&[Ptr, I32], I64),
        RuntimeFn::ContextGetExtraArgs => Signature::fixed(&[Ptr, I32, I32], I32),
        RuntimeFn::ContextGetRuntime | RuntimeFn::RuntimeGetRoot | RuntimeFn::RuntimeGetHostPrintf => {
            Signature::fixed(&[Ptr], Ptr)
        }
        RuntimeFn::RuntimeStoreResult => Signature::fixed(&[Ptr, I64], Void),
        RuntimeFn::HostPrintf => Signature {
            params: smallvec![Ptr],
            ret: I32,
            variadic: true,
        },
        RuntimeFn::GetTemporaryPointer => Signature::fixed(&[Ptr, I64], Ptr),
        RuntimeFn::AssertFormat => Signature::fixed(&[Ptr, I32, Ptr, I32, Ptr], Void),
        RuntimeFn::Rand(ty) => Signature::fixed(&[], Ty::of_primitive(ty)),
        RuntimeFn::Math(m, ty) | RuntimeFn::VendorMath(m, ty) => {
            let t = Ty::of_primitive(ty);
            Signature {
                params: std::iter::repeat(t).take(m.arity()).collect(),
                ret: t,
                variadic: false,
            }
        }
        RuntimeFn::FloorDiv(ty) | RuntimeFn::Max(ty) | RuntimeFn::Min(ty) => {
            let t = Ty::of_primitive(ty);
            Signature::fixed(&[t, t], t)
        }
        RuntimeFn::RoundingPrepare(ty) => {
            let t = Ty::of_primitive(ty);
            Signature::fixed(&[t], t)
        }
        RuntimeFn::SetPartialBits(w) => Signature::fixed(&[Ptr, I32, I32, physical(w)], Void),
        RuntimeFn::AtomicAddPartialBits(w) => {
            let t = physical(w);
            Signature::fixed(&[Ptr, I32, I32, t], t)
        }
        RuntimeFn::AtomicMinF(ty) | RuntimeFn::AtomicMaxF(ty) => {
            let t = Ty::of_primitive(ty);
            Signature::fixed(&[Ptr, t], t)
        }
        RuntimeFn::Node(_, method) => match method {
            NodeMethod::LookupElement => Signature::fixed(&[Ptr, Ptr, I32], Ptr),
            NodeMethod::IsActive | NodeMethod::Append => Signature::fixed(&[Ptr, Ptr, I32], I32),
            NodeMethod::Activate | NodeMethod::Deactivate => Signature::fixed(&[Ptr, Ptr, I32], Void),
            NodeMethod::GetNumElements => Signature::fixed(&[Ptr, Ptr], I32),
        },
        RuntimeFn::FromParentElement(_) => Signature::fixed(&[Ptr], Ptr),
        RuntimeFn::RefineCoordinates(_) => Signature::fixed(&[Ptr, Ptr, I32], Void),
        RuntimeFn::ElementListgenRoot | RuntimeFn::ElementListgenNonroot => {
            Signature::fixed(&[Ptr, Ptr, Ptr], Void)
        }
        RuntimeFn::ClearList | RuntimeFn::NodeGc => Signature::fixed(&[Ptr, I32], Void),
        RuntimeFn::ParallelStructFor => Signature::fixed(&[Ptr, I32, I32, I32, Ptr, I32, I32], Void),
        RuntimeFn::GpuStructForParts => Signature::fixed(&[Ptr, I32, I32, I32, Ptr, Ptr], Void),
        RuntimeFn::CpuParallelRangeFor => {
            Signature::fixed(&[Ptr, I32, I32, I32, I32, Ptr, Ptr, Ptr, I32], Void)
        }
        RuntimeFn::GpuParallelRangeFor => Signature::fixed(&[Ptr, I32, I32, Ptr, Ptr, Ptr, I32], Void),
        RuntimeFn::BlockBarrier | RuntimeFn::DoNothing => Signature::fixed(&[], Void),
        RuntimeFn::StackInit | RuntimeFn::StackPop | RuntimeFn::RefreshCounter => {
            Signature::fixed(&[Ptr], Void)
        }
        RuntimeFn::StackPush => Signature::fixed(&[Ptr, I64, I64], Void),
        RuntimeFn::StackTopPrimal | RuntimeFn::StackTopAdjoint => Signature::fixed(&[Ptr, I64], Ptr),
    }
}

fn physical(width: u32) -> Ty {
    Ty::int(width).unwrap_or(Ty::I64)
}

/// Check a call of `f` with operands `args` producing `ret`.
pub fn check_call(f: RuntimeFn, args: &[Ty], ret: Ty) -> CodegenResult<()> {
    let sig = signature(f);
    let fixed = sig.params.len();
    let arity_ok = if sig.variadic {
        args.len() >= fixed
    } else {
        args.len() == fixed
    };
    if arity_ok && args[..fixed] == sig.params[..] && ret == sig.ret {
        return Ok(());
    }
    Err(CodegenError::SignatureMismatch {
        callee: f.symbol().into_owned(),
        detail: format!(
            "declared ({}{}) -> {}, called with ({}) -> {}",
            join(&sig.params),
            if sig.variadic { ", ..." } else { "" },
            sig.ret,
            join(args),
            ret
        ),
    })
}

/// Resolve a runtime symbol by name.
pub fn resolve(name: &str) -> CodegenResult<RuntimeFn> {
    RuntimeFn::from_symbol(name).ok_or_else(|| CodegenError::MissingRuntimeSymbol(name.to_owned()))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
