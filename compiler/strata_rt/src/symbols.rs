//! The runtime symbol set.
//!
//! Generated code reaches the runtime only through the functions named here.
//! Lowering builds symbol names (`pow_f64`, `Dense_is_active`,
//! `S3_refine_coordinates`) and resolves them with [`RuntimeFn::from_symbol`];
//! a name that resolves to nothing is not part of the runtime and must abort
//! compilation.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use rustc_hash::FxHashMap;
use strata_ir::{PrimitiveType, SNodeId, SNodeKind};

/// Math helpers keyed by `{op}_{type}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MathFn {
    Abs,
    Sgn,
    LogicNot,
    Exp,
    Log,
    Tan,
    Tanh,
    Acos,
    Asin,
    Cos,
    Sin,
    Atan2,
    Pow,
}

impl MathFn {
    pub const ALL: [MathFn; 13] = [
        MathFn::Abs,
        MathFn::Sgn,
        MathFn::LogicNot,
        MathFn::Exp,
        MathFn::Log,
        MathFn::Tan,
        MathFn::Tanh,
        MathFn::Acos,
        MathFn::Asin,
        MathFn::Cos,
        MathFn::Sin,
        MathFn::Atan2,
        MathFn::Pow,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            MathFn::Abs => "abs",
            MathFn::Sgn => "sgn",
            MathFn::LogicNot => "logic_not",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Tan => "tan",
            MathFn::Tanh => "tanh",
            MathFn::Acos => "acos",
            MathFn::Asin => "asin",
            MathFn::Cos => "cos",
            MathFn::Sin => "sin",
            MathFn::Atan2 => "atan2",
            MathFn::Pow => "pow",
        }
    }

    pub const fn arity(self) -> usize {
        match self {
            MathFn::Atan2 | MathFn::Pow => 2,
            _ => 1,
        }
    }

    /// Scalar types the runtime provides this helper for.
    pub fn types(self) -> &'static [PrimitiveType] {
        use PrimitiveType::{F32, F64, I32, I64};
        match self {
            MathFn::Abs | MathFn::Sgn => &[I32, F32, F64],
            MathFn::LogicNot => &[I32],
            MathFn::Pow => &[F32, F64, I32, I64],
            MathFn::Exp
            | MathFn::Log
            | MathFn::Tan
            | MathFn::Tanh
            | MathFn::Acos
            | MathFn::Asin
            | MathFn::Cos
            | MathFn::Sin
            | MathFn::Atan2 => &[F32, F64],
        }
    }

    /// Whether the GPU vendor library has a replacement (`__nv_{op}f`).
    pub const fn has_vendor_variant(self) -> bool {
        !matches!(self, MathFn::Abs | MathFn::Sgn | MathFn::LogicNot)
    }
}

/// Node-kind methods, dispatched as `{Kind}_{method}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeMethod {
    LookupElement,
    IsActive,
    Activate,
    Deactivate,
    GetNumElements,
    Append,
}

impl NodeMethod {
    pub const ALL: [NodeMethod; 6] = [
        NodeMethod::LookupElement,
        NodeMethod::IsActive,
        NodeMethod::Activate,
        NodeMethod::Deactivate,
        NodeMethod::GetNumElements,
        NodeMethod::Append,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            NodeMethod::LookupElement => "lookup_element",
            NodeMethod::IsActive => "is_active",
            NodeMethod::Activate => "activate",
            NodeMethod::Deactivate => "deactivate",
            NodeMethod::GetNumElements => "get_num_elements",
            NodeMethod::Append => "append",
        }
    }

    /// Whether the runtime implements `method` for nodes of `kind`.
    pub const fn is_defined_for(self, kind: SNodeKind) -> bool {
        let container = matches!(
            kind,
            SNodeKind::Root
                | SNodeKind::Dense
                | SNodeKind::Pointer
                | SNodeKind::Dynamic
                | SNodeKind::Bitmasked
                | SNodeKind::Hash
        );
        match self {
            NodeMethod::LookupElement
            | NodeMethod::IsActive
            | NodeMethod::Activate
            | NodeMethod::GetNumElements => container,
            NodeMethod::Deactivate => matches!(
                kind,
                SNodeKind::Pointer | SNodeKind::Hash | SNodeKind::Bitmasked | SNodeKind::Dynamic
            ),
            NodeMethod::Append => matches!(kind, SNodeKind::Dynamic),
        }
    }
}

const NODE_KINDS: [SNodeKind; 9] = [
    SNodeKind::Root,
    SNodeKind::Dense,
    SNodeKind::Pointer,
    SNodeKind::Dynamic,
    SNodeKind::Bitmasked,
    SNodeKind::Hash,
    SNodeKind::BitStruct,
    SNodeKind::BitArray,
    SNodeKind::Place,
];

const PHYSICAL_WIDTHS: [u32; 4] = [8, 16, 32, 64];

/// One entry point of the runtime library.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    ContextGetArgs,
    ContextGetExtraArgs,
    ContextGetRuntime,
    RuntimeGetRoot,
    RuntimeStoreResult,
    RuntimeGetHostPrintf,
    /// Variadic formatted print.
    HostPrintf,
    GetTemporaryPointer,
    AssertFormat,
    Rand(PrimitiveType),
    Math(MathFn, PrimitiveType),
    /// GPU vendor math (`__nv_expf`, `__nv_exp`).
    VendorMath(MathFn, PrimitiveType),
    FloorDiv(PrimitiveType),
    Max(PrimitiveType),
    Min(PrimitiveType),
    RoundingPrepare(PrimitiveType),
    SetPartialBits(u32),
    AtomicAddPartialBits(u32),
    AtomicMinF(PrimitiveType),
    AtomicMaxF(PrimitiveType),
    Node(SNodeKind, NodeMethod),
    FromParentElement(SNodeId),
    RefineCoordinates(SNodeId),
    ElementListgenRoot,
    ElementListgenNonroot,
    ClearList,
    NodeGc,
    ParallelStructFor,
    GpuStructForParts,
    CpuParallelRangeFor,
    GpuParallelRangeFor,
    BlockBarrier,
    StackInit,
    StackPush,
    StackPop,
    StackTopPrimal,
    StackTopAdjoint,
    DoNothing,
    RefreshCounter,
}

impl RuntimeFn {
    /// Every symbol except the per-node callbacks, which exist for any id.
    pub fn all() -> Vec<RuntimeFn> {
        use PrimitiveType::{F32, F64, I32, I64, U32, U64};
        let mut out = vec![
            RuntimeFn::ContextGetArgs,
            RuntimeFn::ContextGetExtraArgs,
            RuntimeFn::ContextGetRuntime,
            RuntimeFn::RuntimeGetRoot,
            RuntimeFn::RuntimeStoreResult,
            RuntimeFn::RuntimeGetHostPrintf,
            RuntimeFn::HostPrintf,
            RuntimeFn::GetTemporaryPointer,
            RuntimeFn::AssertFormat,
            RuntimeFn::ElementListgenRoot,
            RuntimeFn::ElementListgenNonroot,
            RuntimeFn::ClearList,
            RuntimeFn::NodeGc,
            RuntimeFn::ParallelStructFor,
            RuntimeFn::GpuStructForParts,
            RuntimeFn::CpuParallelRangeFor,
            RuntimeFn::GpuParallelRangeFor,
            RuntimeFn::BlockBarrier,
            RuntimeFn::StackInit,
            RuntimeFn::StackPush,
            RuntimeFn::StackPop,
            RuntimeFn::StackTopPrimal,
            RuntimeFn::StackTopAdjoint,
            RuntimeFn::DoNothing,
            RuntimeFn::RefreshCounter,
        ];
        out.extend([I32, U32, I64, U64, F32, F64].map(RuntimeFn::Rand));
        for f in MathFn::ALL {
            for &ty in f.types() {
                out.push(RuntimeFn::Math(f, ty));
            }
            if f.has_vendor_variant() {
                out.extend([F32, F64].map(|ty| RuntimeFn::VendorMath(f, ty)));
            }
        }
        out.extend([I32, I64].map(RuntimeFn::FloorDiv));
        out.extend([I32, I64, U32].map(RuntimeFn::Max));
        out.extend([I32, I64, U32].map(RuntimeFn::Min));
        out.extend([F32, F64].map(RuntimeFn::RoundingPrepare));
        out.extend(PHYSICAL_WIDTHS.map(RuntimeFn::SetPartialBits));
        out.extend(PHYSICAL_WIDTHS.map(RuntimeFn::AtomicAddPartialBits));
        out.extend([F32, F64].map(RuntimeFn::AtomicMinF));
        out.extend([F32, F64].map(RuntimeFn::AtomicMaxF));
        for kind in NODE_KINDS {
            for method in NodeMethod::ALL {
                if method.is_defined_for(kind) {
                    out.push(RuntimeFn::Node(kind, method));
                }
            }
        }
        out
    }

    /// The symbol name generated code refers to.
    pub fn symbol(self) -> Cow<'static, str> {
        match self {
            RuntimeFn::ContextGetArgs => "Context_get_args".into(),
            RuntimeFn::ContextGetExtraArgs => "Context_get_extra_args".into(),
            RuntimeFn::ContextGetRuntime => "Context_get_runtime".into(),
            RuntimeFn::RuntimeGetRoot => "LLVMRuntime_get_root".into(),
            RuntimeFn::RuntimeStoreResult => "LLVMRuntime_store_result".into(),
            RuntimeFn::RuntimeGetHostPrintf => "LLVMRuntime_get_host_printf".into(),
            RuntimeFn::HostPrintf => "host_printf".into(),
            RuntimeFn::GetTemporaryPointer => "get_temporary_pointer".into(),
            RuntimeFn::AssertFormat => "taichi_assert_format".into(),
            RuntimeFn::Rand(ty) => format!("rand_{}", ty.name()).into(),
            RuntimeFn::Math(f, ty) => format!("{}_{}", f.name(), ty.name()).into(),
            RuntimeFn::VendorMath(f, ty) => {
                let suffix = if ty == PrimitiveType::F32 { "f" } else { "" };
                format!("__nv_{}{suffix}", f.name()).into()
            }
            RuntimeFn::FloorDiv(ty) => format!("floordiv_{}", ty.name()).into(),
            RuntimeFn::Max(ty) => format!("max_{}", ty.name()).into(),
            RuntimeFn::Min(ty) => format!("min_{}", ty.name()).into(),
            RuntimeFn::RoundingPrepare(ty) => format!("rounding_prepare_{}", ty.name()).into(),
            RuntimeFn::SetPartialBits(w) => format!("set_partial_bits_b{w}").into(),
            RuntimeFn::AtomicAddPartialBits(w) => format!("atomic_add_partial_bits_b{w}").into(),
            RuntimeFn::AtomicMinF(ty) => format!("atomic_min_{}", ty.name()).into(),
            RuntimeFn::AtomicMaxF(ty) => format!("atomic_max_{}", ty.name()).into(),
            RuntimeFn::Node(kind, method) => {
                format!("{}_{}", kind.runtime_name(), method.name()).into()
            }
            RuntimeFn::FromParentElement(id) => format!("{id}_from_parent_element").into(),
            RuntimeFn::RefineCoordinates(id) => format!("{id}_refine_coordinates").into(),
            RuntimeFn::ElementListgenRoot => "element_listgen_root".into(),
            RuntimeFn::ElementListgenNonroot => "element_listgen_nonroot".into(),
            RuntimeFn::ClearList => "clear_list".into(),
            RuntimeFn::NodeGc => "node_gc".into(),
            RuntimeFn::ParallelStructFor => "parallel_struct_for".into(),
            RuntimeFn::GpuStructForParts => "gpu_struct_for_parts".into(),
            RuntimeFn::CpuParallelRangeFor => "cpu_parallel_range_for".into(),
            RuntimeFn::GpuParallelRangeFor => "gpu_parallel_range_for".into(),
            RuntimeFn::BlockBarrier => "block_barrier".into(),
            RuntimeFn::StackInit => "stack_init".into(),
            RuntimeFn::StackPush => "stack_push".into(),
            RuntimeFn::StackPop => "stack_pop".into(),
            RuntimeFn::StackTopPrimal => "stack_top_primal".into(),
            RuntimeFn::StackTopAdjoint => "stack_top_adjoint".into(),
            RuntimeFn::DoNothing => "do_nothing".into(),
            RuntimeFn::RefreshCounter => "refresh_counter".into(),
        }
    }

    /// Resolve a symbol name.
    pub fn from_symbol(name: &str) -> Option<RuntimeFn> {
        if let Some(f) = SYMBOLS.get(name) {
            return Some(*f);
        }
        let (id, method) = name.strip_prefix('S')?.split_once('_')?;
        let id = SNodeId::new(id.parse().ok()?);
        match method {
            "from_parent_element" => Some(RuntimeFn::FromParentElement(id)),
            "refine_coordinates" => Some(RuntimeFn::RefineCoordinates(id)),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol())
    }
}

static SYMBOLS: LazyLock<FxHashMap<String, RuntimeFn>> = LazyLock::new(|| {
    let all = RuntimeFn::all();
    let mut map = FxHashMap::default();
    map.reserve(all.len());
    for f in all {
        map.insert(f.symbol().into_owned(), f);
    }
    tracing::debug!(symbols = map.len(), "runtime symbol table built");
    map
});

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
