//! Scalar math helpers.
//!
//! Arguments and results travel as raw bits: integers zero-extended to 64
//! bits, `f32` as its IEEE pattern in the low word.

use strata_ir::PrimitiveType;

use crate::symbols::MathFn;

#[inline]
fn f32_of(bits: u64) -> f32 {
    f32::from_bits(bits as u32)
}

#[inline]
fn f32_bits(v: f32) -> u64 {
    u64::from(v.to_bits())
}

#[inline]
fn i32_of(bits: u64) -> i32 {
    bits as u32 as i32
}

#[inline]
fn i32_bits(v: i32) -> u64 {
    u64::from(v as u32)
}

fn sgn_f64(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn unary_f64(f: MathFn, x: f64) -> f64 {
    match f {
        MathFn::Abs => x.abs(),
        MathFn::Sgn => sgn_f64(x),
        MathFn::Exp => x.exp(),
        MathFn::Log => x.ln(),
        MathFn::Tan => x.tan(),
        MathFn::Tanh => x.tanh(),
        MathFn::Acos => x.acos(),
        MathFn::Asin => x.asin(),
        MathFn::Cos => x.cos(),
        MathFn::Sin => x.sin(),
        MathFn::LogicNot => f64::from(u8::from(x == 0.0)),
        MathFn::Atan2 | MathFn::Pow => f64::NAN,
    }
}

fn unary_f32(f: MathFn, x: f32) -> f32 {
    match f {
        MathFn::Abs => x.abs(),
        MathFn::Exp => x.exp(),
        MathFn::Log => x.ln(),
        MathFn::Tan => x.tan(),
        MathFn::Tanh => x.tanh(),
        MathFn::Acos => x.acos(),
        MathFn::Asin => x.asin(),
        MathFn::Cos => x.cos(),
        MathFn::Sin => x.sin(),
        _ => unary_f64(f, f64::from(x)) as f32,
    }
}

/// Integer power by squaring. Negative exponents truncate toward zero.
fn ipow(base: i64, exp: i64) -> i64 {
    if exp < 0 {
        return match base {
            1 => 1,
            -1 if exp % 2 == 0 => 1,
            -1 => -1,
            _ => 0,
        };
    }
    let (mut acc, mut b, mut e) = (1i64, base, exp);
    while e > 0 {
        if e & 1 == 1 {
            acc = acc.wrapping_mul(b);
        }
        b = b.wrapping_mul(b);
        e >>= 1;
    }
    acc
}

/// `{op}_{ty}`; `args` holds one or two operands.
pub fn math(f: MathFn, ty: PrimitiveType, args: &[u64]) -> u64 {
    let a = args.first().copied().unwrap_or(0);
    let b = args.get(1).copied().unwrap_or(0);
    match ty {
        PrimitiveType::F32 => {
            let x = f32_of(a);
            f32_bits(match f {
                MathFn::Atan2 => x.atan2(f32_of(b)),
                MathFn::Pow => x.powf(f32_of(b)),
                _ => unary_f32(f, x),
            })
        }
        PrimitiveType::F64 => {
            let x = f64::from_bits(a);
            match f {
                MathFn::Atan2 => x.atan2(f64::from_bits(b)),
                MathFn::Pow => x.powf(f64::from_bits(b)),
                _ => unary_f64(f, x),
            }
            .to_bits()
        }
        PrimitiveType::I64 => match f {
            MathFn::Pow => ipow(a as i64, b as i64) as u64,
            MathFn::Abs => (a as i64).wrapping_abs() as u64,
            MathFn::Sgn => (a as i64).signum() as u64,
            _ => u64::from(a == 0),
        },
        _ => {
            let x = i32_of(a);
            i32_bits(match f {
                MathFn::Pow => ipow(i64::from(x), i64::from(i32_of(b))) as i32,
                MathFn::Abs => x.wrapping_abs(),
                MathFn::Sgn => x.signum(),
                _ => i32::from(x == 0),
            })
        }
    }
}

/// Floor division; division by zero yields zero.
pub fn floordiv(ty: PrimitiveType, a: u64, b: u64) -> u64 {
    fn floor_div(a: i64, b: i64) -> i64 {
        if b == 0 {
            return 0;
        }
        let q = a.wrapping_div(b);
        if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
            q - 1
        } else {
            q
        }
    }
    match ty {
        PrimitiveType::I64 => floor_div(a as i64, b as i64) as u64,
        _ => i32_bits(floor_div(i64::from(i32_of(a)), i64::from(i32_of(b))) as i32),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Extreme {
    Max,
    Min,
}

/// `max_{ty}` / `min_{ty}` on integers.
pub fn extreme(which: Extreme, ty: PrimitiveType, a: u64, b: u64) -> u64 {
    let pick_a = match ty {
        PrimitiveType::I64 => (a as i64 > b as i64) == (which == Extreme::Max),
        PrimitiveType::U32 => (a as u32 > b as u32) == (which == Extreme::Max),
        _ => (i32_of(a) > i32_of(b)) == (which == Extreme::Max),
    };
    if pick_a || a == b {
        a
    } else {
        b
    }
}

/// `rounding_prepare_f{32,64}`: add 0.5 away from zero before truncation.
pub fn rounding_prepare(ty: PrimitiveType, x: u64) -> u64 {
    match ty {
        PrimitiveType::F32 => {
            let v = f32_of(x);
            f32_bits(v + 0.5f32.copysign(v))
        }
        _ => {
            let v = f64::from_bits(x);
            (v + 0.5f64.copysign(v)).to_bits()
        }
    }
}

/// Random bits of the requested type; reals are uniform in `[0, 1)`.
pub fn random(ty: PrimitiveType, bits: u64) -> u64 {
    match ty {
        PrimitiveType::F32 => f32_bits((bits >> 40) as f32 / (1u64 << 24) as f32),
        PrimitiveType::F64 => ((bits >> 11) as f64 / (1u64 << 53) as f64).to_bits(),
        PrimitiveType::I32 | PrimitiveType::U32 => bits & 0xFFFF_FFFF,
        _ => bits,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
