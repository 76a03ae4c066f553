//! Executor for linked programs.
//!
//! A [`Machine`] interprets [`Program`] functions against a
//! [`strata_rt::Runtime`]. Registers hold raw 64-bit patterns: integers are
//! zero-extended to their width, floats are IEEE bits, pointers are device
//! addresses. Stack slots come from device memory and are released when
//! their frame returns.
//!
//! The machine is the runtime's [`Host`]: runtime helpers call loop bodies
//! and node callbacks back through [`Host::call`] by tagged address.

use std::sync::Barrier;

use rayon::prelude::*;
use strata_rt::{natives, Host, Lane, NativeCx, Runtime, RuntimeFn};

use super::ir::{BinOp, CastOp, FloatPredicate, IntPredicate, Intrinsic, RmwOp, Ty, UnOp};
use super::link::{LInst, LOp, Program, FUNC_TAG, NATIVE_TAG, TAG_MASK};

/// Grid shape of one task launch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LaunchShape {
    pub grid_dim: u32,
    pub block_dim: u32,
    /// Block-local buffer bytes shared by the lanes of a block.
    pub bls_size: u32,
}

impl LaunchShape {
    pub const SERIAL: LaunchShape = LaunchShape {
        grid_dim: 1,
        block_dim: 1,
        bls_size: 0,
    };

    pub fn is_serial(self) -> bool {
        self == Self::SERIAL
    }
}

pub struct Machine<'a> {
    rt: &'a Runtime,
    program: &'a Program,
    /// Device addresses of the program's string constants.
    strings: Vec<u64>,
}

impl<'a> Machine<'a> {
    pub fn new(rt: &'a Runtime, program: &'a Program) -> Self {
        let strings = program
            .strings
            .iter()
            .map(|s| rt.memory().alloc_c_str(s))
            .collect();
        Machine { rt, program, strings }
    }

    /// Run function `index` on the given grid.
    pub fn launch(&self, index: usize, args: &[u64], shape: LaunchShape) {
        if shape.is_serial() {
            self.run(index, args, &Lane::SERIAL);
            return;
        }
        let block_dim = shape.block_dim.max(1);
        let grid_dim = shape.grid_dim.max(1);
        tracing::trace!(
            function = %self.program.functions[index].name,
            grid_dim,
            block_dim,
            "grid launch"
        );
        (0..grid_dim).into_par_iter().for_each(|block_idx| {
            let mem = self.rt.memory();
            let bls_bytes = u64::from(shape.bls_size);
            let bls = if bls_bytes > 0 { mem.alloc(bls_bytes, 8) } else { 0 };
            let barrier = Barrier::new(block_dim as usize);
            std::thread::scope(|s| {
                for thread_idx in 0..block_dim {
                    let barrier = &barrier;
                    s.spawn(move || {
                        let lane = Lane {
                            thread_idx,
                            block_idx,
                            block_dim,
                            grid_dim,
                            bls,
                            barrier: Some(barrier),
                        };
                        self.run(index, args, &lane);
                    });
                }
            });
            if bls != 0 {
                mem.free(bls, bls_bytes, 8);
            }
        });
    }

    /// Run function `index` on one lane.
    pub fn run(&self, index: usize, args: &[u64], lane: &Lane<'_>) -> u64 {
        let Some(func) = self.program.functions.get(index) else {
            tracing::error!(index, "call of unknown function");
            return 0;
        };
        let mem = self.rt.memory();
        let mut regs = vec![0u64; func.num_regs];
        for (slot, &a) in regs.iter_mut().zip(args.iter().take(func.num_params)) {
            *slot = a;
        }
        let mut slots: Vec<(u64, u64, u64)> = Vec::new();
        let mut block = 0usize;
        let result = 'exec: loop {
            let Some(insts) = func.blocks.get(block) else {
                tracing::error!(function = %func.name, block, "branch to missing block");
                break 'exec 0;
            };
            for inst in insts {
                match &inst.op {
                    LOp::Br(t) => {
                        block = *t;
                        continue 'exec;
                    }
                    LOp::CondBr(c, t, e) => {
                        block = if regs[*c as usize] & 1 != 0 { *t } else { *e };
                        continue 'exec;
                    }
                    LOp::Ret(v) => break 'exec v.map_or(0, |r| regs[r as usize]),
                    LOp::Unreachable => {
                        tracing::error!(function = %func.name, "reached unreachable");
                        break 'exec 0;
                    }
                    LOp::Alloca { bytes, align } => {
                        let size = (*bytes).max(1);
                        let addr = mem.alloc(size, *align);
                        slots.push((addr, size, *align));
                        if let Some(d) = inst.dst {
                            regs[d as usize] = addr;
                        }
                    }
                    _ => {
                        let value = self.eval(inst, &regs, lane);
                        if let Some(d) = inst.dst {
                            regs[d as usize] = mask(inst.ty, value);
                        }
                    }
                }
            }
            tracing::error!(function = %func.name, block, "fell off the end of a block");
            break 'exec 0;
        };
        for (addr, size, align) in slots {
            mem.free(addr, size, align);
        }
        result
    }

    fn eval(&self, inst: &LInst, regs: &[u64], lane: &Lane<'_>) -> u64 {
        let r = |x: u32| regs[x as usize];
        let mem = self.rt.memory();
        match &inst.op {
            LOp::Const(bits) => *bits,
            LOp::Bin(op, ty, a, b) => binary(*op, *ty, r(*a), r(*b)),
            LOp::Un(op, ty, a) => unary(*op, *ty, r(*a)),
            LOp::ICmp(p, ty, a, b) => u64::from(icmp(*p, *ty, r(*a), r(*b))),
            LOp::FCmp(p, ty, a, b) => u64::from(fcmp(*p, *ty, r(*a), r(*b))),
            LOp::Cast(op, from, to, a) => cast(*op, *from, *to, r(*a)),
            LOp::Select(c, a, b) => {
                if r(*c) & 1 != 0 {
                    r(*a)
                } else {
                    r(*b)
                }
            }
            LOp::Intrinsic(i, ty, args) => {
                let x = args.first().map_or(0, |&a| r(a));
                match i {
                    Intrinsic::Sqrt => float_un(*ty, x, f64::sqrt),
                    Intrinsic::Floor => float_un(*ty, x, f64::floor),
                    Intrinsic::Ceil => float_un(*ty, x, f64::ceil),
                    Intrinsic::Fabs => float_un(*ty, x, f64::abs),
                    Intrinsic::Ctlz => {
                        let width = ty.bits();
                        if x == 0 {
                            u64::from(width)
                        } else {
                            u64::from(x.leading_zeros() - (64 - width))
                        }
                    }
                    Intrinsic::ThreadIdx => u64::from(lane.thread_idx),
                    Intrinsic::BlockIdx => u64::from(lane.block_idx),
                    Intrinsic::BlockDim => u64::from(lane.block_dim),
                    Intrinsic::GridDim => u64::from(lane.grid_dim),
                    Intrinsic::BlsBase => lane.bls,
                }
            }
            LOp::Load(ty, p) => mem.load(r(*p), ty.bytes()),
            LOp::Store(ty, p, v) => {
                mem.store(r(*p), ty.bytes(), r(*v));
                0
            }
            LOp::PtrAdd(p, o) => r(*p).wrapping_add(r(*o)),
            LOp::AtomicRmw(op, ty, p, v) => {
                let v = r(*v);
                let ty = *ty;
                mem.update(r(*p), ty.bytes(), |old| mask(ty, rmw(*op, ty, old, v)))
            }
            LOp::CallFunction(f, args) => {
                let args: Vec<u64> = args.iter().map(|&a| r(a)).collect();
                self.run(*f, &args, lane)
            }
            LOp::CallNative(f, args) => {
                let args: Vec<u64> = args.iter().map(|&a| r(a)).collect();
                natives::call(*f, &args, NativeCx { host: self, lane })
            }
            LOp::CallIndirect(p, args) => {
                let args: Vec<u64> = args.iter().map(|&a| r(a)).collect();
                self.call(r(*p), &args, lane)
            }
            LOp::Str(i) => self.strings.get(*i).copied().unwrap_or(0),
            LOp::Alloca { .. } | LOp::Br(_) | LOp::CondBr(..) | LOp::Ret(_) | LOp::Unreachable => 0,
        }
    }
}

impl Drop for Machine<'_> {
    fn drop(&mut self) {
        let mem = self.rt.memory();
        for (addr, s) in self.strings.iter().zip(&self.program.strings) {
            mem.free(*addr, s.len() as u64 + 1, 1);
        }
    }
}

impl Host for Machine<'_> {
    fn runtime(&self) -> &Runtime {
        self.rt
    }

    fn call(&self, addr: u64, args: &[u64], lane: &Lane<'_>) -> u64 {
        let index = (addr & !TAG_MASK) as usize;
        match addr & TAG_MASK {
            FUNC_TAG => self.run(index, args, lane),
            NATIVE_TAG => {
                let f = self.program.natives.lock().get(index).copied();
                match f {
                    Some(f) => natives::call(f, args, NativeCx { host: self, lane }),
                    None => {
                        tracing::error!(addr, "call of unregistered native");
                        0
                    }
                }
            }
            _ => {
                tracing::error!(addr, "call through invalid function pointer");
                0
            }
        }
    }

    fn native_address(&self, f: RuntimeFn) -> u64 {
        self.program.native_address(f)
    }
}

// ---------------------------------------------------------------------------
// Scalar semantics
// ---------------------------------------------------------------------------

#[inline]
fn mask(ty: Ty, v: u64) -> u64 {
    match ty.bits() {
        0 => 0,
        64 => v,
        w => v & ((1u64 << w) - 1),
    }
}

/// Sign-extend a canonical value of `ty` to 64 bits.
#[inline]
fn sext(ty: Ty, v: u64) -> i64 {
    match ty.bits() {
        0 => 0,
        64 => v as i64,
        w => {
            let shift = 64 - w;
            ((v << shift) as i64) >> shift
        }
    }
}

#[inline]
fn f32_of(v: u64) -> f32 {
    f32::from_bits(v as u32)
}

#[inline]
fn f64_of(v: u64) -> f64 {
    f64::from_bits(v)
}

fn float_bin(ty: Ty, a: u64, b: u64, f: impl Fn(f64, f64) -> f64, g: impl Fn(f32, f32) -> f32) -> u64 {
    if ty == Ty::F32 {
        u64::from(g(f32_of(a), f32_of(b)).to_bits())
    } else {
        f(f64_of(a), f64_of(b)).to_bits()
    }
}

fn float_un(ty: Ty, x: u64, f: impl Fn(f64) -> f64) -> u64 {
    if ty == Ty::F32 {
        // Exactly rounded: sqrt/floor/ceil/abs of an f32 widened to f64
        // round back to the f32 result.
        u64::from((f(f64::from(f32_of(x))) as f32).to_bits())
    } else {
        f(f64_of(x)).to_bits()
    }
}

fn binary(op: BinOp, ty: Ty, a: u64, b: u64) -> u64 {
    let width = u64::from(ty.bits());
    match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::SDiv | BinOp::SRem => {
            let (x, y) = (sext(ty, a), sext(ty, b));
            if y == 0 {
                tracing::error!(op = op.name(), %ty, "integer division by zero");
                return 0;
            }
            if op == BinOp::SDiv {
                x.wrapping_div(y) as u64
            } else {
                x.wrapping_rem(y) as u64
            }
        }
        BinOp::UDiv | BinOp::URem => {
            if b == 0 {
                tracing::error!(op = op.name(), %ty, "integer division by zero");
                return 0;
            }
            if op == BinOp::UDiv {
                a / b
            } else {
                a % b
            }
        }
        BinOp::Shl => {
            if b >= width {
                0
            } else {
                a << b
            }
        }
        BinOp::LShr => {
            if b >= width {
                0
            } else {
                a >> b
            }
        }
        BinOp::AShr => {
            let x = sext(ty, a);
            (if b >= width { x >> 63 } else { x >> b }) as u64
        }
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::FAdd => float_bin(ty, a, b, |x, y| x + y, |x, y| x + y),
        BinOp::FSub => float_bin(ty, a, b, |x, y| x - y, |x, y| x - y),
        BinOp::FMul => float_bin(ty, a, b, |x, y| x * y, |x, y| x * y),
        BinOp::FDiv => float_bin(ty, a, b, |x, y| x / y, |x, y| x / y),
        BinOp::FRem => float_bin(ty, a, b, |x, y| x % y, |x, y| x % y),
    }
}

fn unary(op: UnOp, ty: Ty, a: u64) -> u64 {
    match op {
        UnOp::Neg => 0u64.wrapping_sub(a),
        UnOp::Not => !a,
        UnOp::FNeg => {
            if ty == Ty::F32 {
                a ^ (1 << 31)
            } else {
                a ^ (1 << 63)
            }
        }
    }
}

fn icmp(p: IntPredicate, ty: Ty, a: u64, b: u64) -> bool {
    let (sa, sb) = (sext(ty, a), sext(ty, b));
    match p {
        IntPredicate::Eq => a == b,
        IntPredicate::Ne => a != b,
        IntPredicate::Slt => sa < sb,
        IntPredicate::Sle => sa <= sb,
        IntPredicate::Sgt => sa > sb,
        IntPredicate::Sge => sa >= sb,
        IntPredicate::Ult => a < b,
        IntPredicate::Ule => a <= b,
        IntPredicate::Ugt => a > b,
        IntPredicate::Uge => a >= b,
    }
}

fn fcmp(p: FloatPredicate, ty: Ty, a: u64, b: u64) -> bool {
    let (x, y) = if ty == Ty::F32 {
        (f64::from(f32_of(a)), f64::from(f32_of(b)))
    } else {
        (f64_of(a), f64_of(b))
    };
    match p {
        FloatPredicate::Oeq => x == y,
        FloatPredicate::One => x < y || x > y,
        FloatPredicate::Olt => x < y,
        FloatPredicate::Ole => x <= y,
        FloatPredicate::Ogt => x > y,
        FloatPredicate::Oge => x >= y,
        FloatPredicate::Uno => x.is_nan() || y.is_nan(),
    }
}

fn float_value(ty: Ty, v: u64) -> f64 {
    if ty == Ty::F32 {
        f64::from(f32_of(v))
    } else {
        f64_of(v)
    }
}

fn float_bits(ty: Ty, x: f64) -> u64 {
    if ty == Ty::F32 {
        u64::from((x as f32).to_bits())
    } else {
        x.to_bits()
    }
}

fn cast(op: CastOp, from: Ty, to: Ty, v: u64) -> u64 {
    match op {
        CastOp::Trunc | CastOp::ZExt | CastOp::Bitcast | CastOp::PtrToInt | CastOp::IntToPtr => v,
        CastOp::SExt => sext(from, v) as u64,
        CastOp::FpTrunc => u64::from((f64_of(v) as f32).to_bits()),
        CastOp::FpExt => f64::from(f32_of(v)).to_bits(),
        CastOp::FpToSi => {
            let x = float_value(from, v);
            match to.bits() {
                1 => (x as i64 as u64) & 1,
                8 => x as i8 as u8 as u64,
                16 => x as i16 as u16 as u64,
                32 => u64::from(x as i32 as u32),
                _ => x as i64 as u64,
            }
        }
        CastOp::FpToUi => {
            let x = float_value(from, v);
            match to.bits() {
                1 => (x as u64) & 1,
                8 => u64::from(x as u8),
                16 => u64::from(x as u16),
                32 => u64::from(x as u32),
                _ => x as u64,
            }
        }
        CastOp::SiToFp => {
            let x = sext(from, v);
            if to == Ty::F32 {
                u64::from((x as f32).to_bits())
            } else {
                (x as f64).to_bits()
            }
        }
        CastOp::UiToFp => {
            if to == Ty::F32 {
                u64::from((v as f32).to_bits())
            } else {
                (v as f64).to_bits()
            }
        }
    }
}

fn rmw(op: RmwOp, ty: Ty, old: u64, v: u64) -> u64 {
    match op {
        RmwOp::Add => old.wrapping_add(v),
        RmwOp::FAdd => float_bits(ty, float_value(ty, old) + float_value(ty, v)),
        RmwOp::Min => {
            if sext(ty, v) < sext(ty, old) {
                v
            } else {
                old
            }
        }
        RmwOp::Max => {
            if sext(ty, v) > sext(ty, old) {
                v
            } else {
                old
            }
        }
        RmwOp::UMin => old.min(v),
        RmwOp::UMax => old.max(v),
        RmwOp::And => old & v,
        RmwOp::Or => old | v,
        RmwOp::Xor => old ^ v,
        RmwOp::Xchg => v,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
