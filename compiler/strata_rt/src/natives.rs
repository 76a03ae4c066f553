//! Native entry points: one dispatch over [`RuntimeFn`].
//!
//! Arguments arrive in declaration order as raw 64-bit values; 32-bit
//! integers are zero-extended and `f32` travels as its bit pattern. The
//! return value uses the same encoding (zero for `void`).

use strata_ir::{PrimitiveType, SNodeId};

use crate::bits::{self, FloatExtreme};
use crate::error::RuntimeError;
use crate::format::{self, FloatArgs};
use crate::host::NativeCx;
use crate::math::{self, Extreme};
use crate::parallel::{self, RangeFor, StructFor};
use crate::symbols::RuntimeFn;
use crate::{abi, lists, nodes};

#[inline]
fn i32_arg(args: &[u64], i: usize) -> i32 {
    args.get(i).copied().unwrap_or(0) as u32 as i32
}

#[inline]
fn arg(args: &[u64], i: usize) -> u64 {
    args.get(i).copied().unwrap_or(0)
}

#[inline]
fn snode_arg(args: &[u64], i: usize) -> SNodeId {
    SNodeId::new(i32_arg(args, i) as u32)
}

/// Execute the native `f`.
pub fn call(f: RuntimeFn, args: &[u64], cx: NativeCx<'_>) -> u64 {
    let rt = cx.runtime();
    let mem = rt.memory();
    match f {
        RuntimeFn::ContextGetArgs => {
            let i = u64::from(i32_arg(args, 1) as u32);
            mem.load_u64(arg(args, 0) + abi::context::ARGS + i * 8)
        }
        RuntimeFn::ContextGetExtraArgs => {
            let (i, j) = (u64::from(i32_arg(args, 1) as u32), u64::from(i32_arg(args, 2) as u32));
            let slot = (i * abi::context::MAX_ARG_AXES + j) * 4;
            mem.load(arg(args, 0) + abi::context::EXTRA_ARGS + slot, 4)
        }
        RuntimeFn::ContextGetRuntime => mem.load_u64(arg(args, 0) + abi::context::RUNTIME),
        RuntimeFn::RuntimeGetRoot => mem.load_u64(arg(args, 0) + abi::runtime::ROOT),
        RuntimeFn::RuntimeStoreResult => {
            mem.store_u64(arg(args, 0) + abi::runtime::RESULT, arg(args, 1));
            0
        }
        RuntimeFn::RuntimeGetHostPrintf => cx.host.native_address(RuntimeFn::HostPrintf),
        RuntimeFn::HostPrintf => {
            let template = mem.read_c_str(arg(args, 0));
            let line = format::format(&template, args.get(1..).unwrap_or(&[]), FloatArgs::Promoted, |a| {
                mem.read_c_str(a)
            });
            let len = line.len() as u64;
            rt.record_print(line);
            len
        }
        RuntimeFn::GetTemporaryPointer => mem.load_u64(arg(args, 0) + abi::runtime::TEMPORARIES) + arg(args, 1),
        RuntimeFn::AssertFormat => {
            if i32_arg(args, 1) == 0 {
                let template = mem.read_c_str(arg(args, 2));
                let n = u64::from(i32_arg(args, 3).max(0) as u32);
                let values: Vec<u64> = (0..n).map(|k| mem.load_u64(arg(args, 4) + k * 8)).collect();
                let message = format::format(&template, &values, FloatArgs::Native, |a| mem.read_c_str(a));
                rt.record_error(RuntimeError::AssertionFailed(message));
            }
            0
        }
        RuntimeFn::Rand(ty) => math::random(ty, rt.next_random()),
        RuntimeFn::Math(f, ty) | RuntimeFn::VendorMath(f, ty) => math::math(f, ty, args),
        RuntimeFn::FloorDiv(ty) => math::floordiv(ty, arg(args, 0), arg(args, 1)),
        RuntimeFn::Max(ty) => math::extreme(Extreme::Max, ty, arg(args, 0), arg(args, 1)),
        RuntimeFn::Min(ty) => math::extreme(Extreme::Min, ty, arg(args, 0), arg(args, 1)),
        RuntimeFn::RoundingPrepare(ty) => math::rounding_prepare(ty, arg(args, 0)),
        RuntimeFn::SetPartialBits(width) => {
            bits::set_partial_bits(
                mem,
                arg(args, 0),
                width,
                i32_arg(args, 1) as u32,
                i32_arg(args, 2) as u32,
                arg(args, 3),
            );
            0
        }
        RuntimeFn::AtomicAddPartialBits(width) => bits::atomic_add_partial_bits(
            mem,
            arg(args, 0),
            width,
            i32_arg(args, 1) as u32,
            i32_arg(args, 2) as u32,
            arg(args, 3),
        ),
        RuntimeFn::AtomicMinF(ty) | RuntimeFn::AtomicMaxF(ty) => {
            let which = if matches!(f, RuntimeFn::AtomicMinF(_)) {
                FloatExtreme::Min
            } else {
                FloatExtreme::Max
            };
            let width = if ty == PrimitiveType::F32 { 32 } else { 64 };
            bits::atomic_float_extreme(mem, arg(args, 0), width, which, arg(args, 1))
        }
        RuntimeFn::Node(kind, method) => nodes::call(rt, kind, method, args),
        RuntimeFn::FromParentElement(id) => nodes::from_parent_element(rt, id, arg(args, 0)),
        RuntimeFn::RefineCoordinates(id) => {
            nodes::refine_coordinates(rt, id, arg(args, 0), arg(args, 1), i32_arg(args, 2) as u32);
            0
        }
        RuntimeFn::ElementListgenRoot | RuntimeFn::ElementListgenNonroot => {
            lists::element_listgen(cx, arg(args, 1), arg(args, 2));
            0
        }
        RuntimeFn::ClearList => {
            lists::clear_list(cx, snode_arg(args, 1));
            0
        }
        RuntimeFn::NodeGc => {
            lists::node_gc(cx, snode_arg(args, 1));
            0
        }
        RuntimeFn::ParallelStructFor => {
            let sf = struct_for_args(args);
            let tls_size = u64::from(i32_arg(args, 5).max(0) as u32);
            parallel::cpu_struct_for(cx, sf, tls_size, i32_arg(args, 6).max(0) as usize);
            0
        }
        RuntimeFn::GpuStructForParts => {
            parallel::gpu_struct_for_parts(cx, struct_for_args(args), arg(args, 5));
            0
        }
        RuntimeFn::CpuParallelRangeFor => {
            let rf = RangeFor {
                context: arg(args, 0),
                begin: i32_arg(args, 2),
                end: i32_arg(args, 3),
                prologue: arg(args, 5),
                body: arg(args, 6),
                epilogue: arg(args, 7),
                tls_size: u64::from(i32_arg(args, 8).max(0) as u32),
            };
            parallel::cpu_range_for(cx, rf, i32_arg(args, 1).max(0) as usize, i32_arg(args, 4));
            0
        }
        RuntimeFn::GpuParallelRangeFor => {
            let rf = RangeFor {
                context: arg(args, 0),
                begin: i32_arg(args, 1),
                end: i32_arg(args, 2),
                prologue: arg(args, 3),
                body: arg(args, 4),
                epilogue: arg(args, 5),
                tls_size: u64::from(i32_arg(args, 6).max(0) as u32),
            };
            parallel::gpu_range_for(cx, rf);
            0
        }
        RuntimeFn::BlockBarrier => {
            parallel::block_barrier(cx);
            0
        }
        RuntimeFn::StackInit => {
            mem.store_u64(arg(args, 0) + abi::stack::N, 0);
            0
        }
        RuntimeFn::StackPush => {
            let (stack, max_size, element_size) = (arg(args, 0), arg(args, 1), arg(args, 2));
            let n = mem.load_u64(stack + abi::stack::N);
            if n >= max_size {
                rt.record_error(RuntimeError::AssertionFailed(format!(
                    "autodiff stack overflow (capacity {max_size})"
                )));
                return 0;
            }
            mem.store_u64(stack + abi::stack::N, n + 1);
            mem.fill_zero(stack + abi::stack::DATA + n * element_size * 2, element_size * 2);
            0
        }
        RuntimeFn::StackPop => {
            let stack = arg(args, 0);
            mem.update(stack + abi::stack::N, 8, |n| n.saturating_sub(1));
            0
        }
        RuntimeFn::StackTopPrimal | RuntimeFn::StackTopAdjoint => {
            let (stack, element_size) = (arg(args, 0), arg(args, 1));
            let n = mem.load_u64(stack + abi::stack::N).max(1);
            let primal = stack + abi::stack::DATA + (n - 1) * element_size * 2;
            if f == RuntimeFn::StackTopAdjoint {
                primal + element_size
            } else {
                primal
            }
        }
        RuntimeFn::DoNothing => 0,
        RuntimeFn::RefreshCounter => {
            tracing::trace!("refresh_counter");
            0
        }
    }
}

fn struct_for_args(args: &[u64]) -> StructFor {
    StructFor {
        context: arg(args, 0),
        snode: snode_arg(args, 1),
        element_size: i32_arg(args, 2),
        element_split: i32_arg(args, 3),
        body: arg(args, 4),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
