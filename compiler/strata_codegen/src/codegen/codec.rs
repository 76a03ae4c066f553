//! Encoding and decoding of custom (bit-packed) numeric types.
//!
//! All helpers emit straight-line code through an [`IrBuilder`] and are
//! independent of the statement being lowered.
//!
//! - Custom ints are read by shifting the field to the top of its word and
//!   back down (arithmetic for signed, logical for unsigned), and written with
//!   the runtime's atomic `set_partial_bits` helper so that concurrent writers
//!   of neighbouring fields never lose updates.
//! - Fixed-point custom floats store `round(value / scale)` as a custom int.
//! - Floats with an exponent are built directly in the `f32` bit layout
//!   (1 sign bit, 8 exponent bits, 23 fraction bits). The stored exponent is
//!   re-biased by the type's conversion offset. Zero exponents flush the
//!   digits to zero.
//! - A shared exponent group stores the maximum exponent of its members;
//!   each member keeps its leading one bit explicitly and is shifted right by
//!   its distance from the shared exponent.

use strata_ir::{CustomFloatType, CustomIntType, PrimitiveType};
use strata_rt::RuntimeFn;

use super::BitPtr;
use crate::backend::{BinOp, CastOp, IntPredicate, Intrinsic, IrBuilder, Ty, ValueId};

/// Physical word type of `cit`.
pub(crate) fn physical_ty(cit: CustomIntType) -> Ty {
    Ty::of_primitive(cit.physical_type())
}

fn compute_ty(cit: CustomIntType) -> Ty {
    Ty::of_primitive(cit.compute_type())
}

/// Convert between float widths; identity when the types agree.
pub(crate) fn fp_cast(b: &mut IrBuilder, v: ValueId, to: Ty) -> ValueId {
    match (b.ty(v), to) {
        (from, to) if from == to => v,
        (Ty::F32, Ty::F64) => b.cast(CastOp::FpExt, v, to),
        _ => b.cast(CastOp::FpTrunc, v, to),
    }
}

// ---------------------------------------------------------------------------
// Custom ints
// ---------------------------------------------------------------------------

/// Decode the field of `cit` at `bit_offset` inside `physical_value`.
///
/// Shift left by `W - (offset + n)`, then right by `W - n`; the result is
/// sign- or zero-extended into the compute type.
pub(crate) fn extract_custom_int(
    b: &mut IrBuilder,
    physical_value: ValueId,
    bit_offset: ValueId,
    cit: CustomIntType,
) -> ValueId {
    let word_ty = b.ty(physical_value);
    let width = word_ty.bits() as i32;
    let num_bits = cit.num_bits() as i32;

    let n = b.const_i32(num_bits);
    let bit_end = b.add(bit_offset, n);
    let w = b.const_i32(width);
    let left = b.sub(w, bit_end);
    let right = b.const_i32(width - num_bits);
    let left = b.int_cast(left, word_ty, false);
    let right = b.int_cast(right, word_ty, false);

    let step1 = b.shl(physical_value, left);
    let step2 = b.shr(step1, right, cit.is_signed());
    b.int_cast(step2, compute_ty(cit), cit.is_signed())
}

/// Load the word behind `ptr` and decode the field of `cit`.
pub(crate) fn load_custom_int(b: &mut IrBuilder, ptr: BitPtr, cit: CustomIntType) -> ValueId {
    let word = b.load(physical_ty(cit), ptr.byte_ptr);
    extract_custom_int(b, word, ptr.offset, cit)
}

/// Atomically replace the field of `cit` at `ptr` with the low bits of
/// `value`; the other bits of the word are untouched.
pub(crate) fn store_custom_int(b: &mut IrBuilder, ptr: BitPtr, cit: CustomIntType, value: ValueId) {
    let word_ty = physical_ty(cit);
    let value = b.int_cast(value, word_ty, false);
    let num_bits = b.const_i32(cit.num_bits() as i32);
    b.call_runtime(
        RuntimeFn::SetPartialBits(cit.physical_type().bits()),
        &[ptr.byte_ptr, ptr.offset, num_bits, value],
    );
}

/// Atomically add `value` to the field of `cit` at `ptr`. Returns the
/// previous field value in the compute type.
pub(crate) fn atomic_add_custom_int(
    b: &mut IrBuilder,
    ptr: BitPtr,
    cit: CustomIntType,
    value: ValueId,
    value_signed: bool,
) -> ValueId {
    let word_ty = physical_ty(cit);
    let value = b.int_cast(value, word_ty, value_signed);
    let num_bits = b.const_i32(cit.num_bits() as i32);
    let old = b.call_runtime(
        RuntimeFn::AtomicAddPartialBits(cit.physical_type().bits()),
        &[ptr.byte_ptr, ptr.offset, num_bits, value],
    );
    let zero = b.const_i32(0);
    extract_custom_int(b, old, zero, cit)
}

// ---------------------------------------------------------------------------
// Fixed-point custom floats
// ---------------------------------------------------------------------------

/// `round(real / scale)` as the digits' compute integer.
pub(crate) fn float_to_custom_int(b: &mut IrBuilder, cft: CustomFloatType, real: ValueId) -> ValueId {
    let compute = cft.compute_type();
    let real_ty = Ty::of_primitive(compute);
    let inv_scale = b.const_float(real_ty, 1.0 / cft.scale());
    let input = fp_cast(b, real, real_ty);
    let scaled = b.binary(BinOp::FMul, input, inv_scale);
    let scaled = b.call_runtime(RuntimeFn::RoundingPrepare(compute), &[scaled]);
    let digits = cft.digits_type();
    let op = if digits.is_signed() {
        CastOp::FpToSi
    } else {
        CastOp::FpToUi
    };
    b.cast(op, scaled, compute_ty(digits))
}

/// `float(digits) * scale` in the compute type.
pub(crate) fn reconstruct_custom_float(b: &mut IrBuilder, digits: ValueId, cft: CustomFloatType) -> ValueId {
    let real_ty = Ty::of_primitive(cft.compute_type());
    let op = if cft.digits_type().is_signed() {
        CastOp::SiToFp
    } else {
        CastOp::UiToFp
    };
    let real = b.cast(op, digits, real_ty);
    let scale = b.const_float(real_ty, cft.scale());
    b.binary(BinOp::FMul, real, scale)
}

/// Encode a fixed-point custom float or pass a custom int through, masked
/// to the field width and resized to the physical word.
pub(crate) fn custom_bits(
    b: &mut IrBuilder,
    value: ValueId,
    digits: CustomIntType,
    fixed: Option<CustomFloatType>,
    word_ty: Ty,
) -> ValueId {
    let value = match fixed {
        Some(cft) => float_to_custom_int(b, cft, value),
        None => value,
    };
    let ty = b.ty(value);
    let value = if digits.num_bits() < ty.bits() {
        let mask = b.const_int(ty, low_mask(digits.num_bits()));
        b.and(value, mask)
    } else {
        value
    };
    b.int_cast(value, word_ty, false)
}

fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

// ---------------------------------------------------------------------------
// Floats with an exponent
// ---------------------------------------------------------------------------

/// `exponent != 0 ? conversion_offset : 0`
fn exponent_offset(b: &mut IrBuilder, exponent: ValueId, cft: CustomFloatType) -> ValueId {
    let zero = b.const_i32(0);
    let nonzero = b.icmp(IntPredicate::Ne, exponent, zero);
    let offset = b.const_i32(cft.exponent_conversion_offset());
    b.select(nonzero, offset, zero)
}

/// Re-bias an `f32` exponent for storage, clamped at zero.
fn stored_exponent(b: &mut IrBuilder, exponent: ValueId, cft: CustomFloatType) -> ValueId {
    let offset = exponent_offset(b, exponent, cft);
    let biased = b.sub(exponent, offset);
    let zero = b.const_i32(0);
    b.call_runtime(RuntimeFn::Max(PrimitiveType::I32), &[biased, zero])
}

/// Store `value` (an `f32`) into a float with its own exponent field.
pub(crate) fn store_float_with_exponent(
    b: &mut IrBuilder,
    digits_ptr: BitPtr,
    exponent_ptr: BitPtr,
    cft: CustomFloatType,
    value: ValueId,
) {
    let n = cft.digit_bits();
    let value = fp_cast(b, value, Ty::F32);
    let mut f32_bits = b.cast(CastOp::Bitcast, value, Ty::I32);
    // Round to nearest; a carry out of the digits bumps the exponent.
    if n < 23 {
        let half = b.const_i32(1 << (22 - n));
        f32_bits = b.add(f32_bits, half);
    }

    let c23 = b.const_i32(23);
    let exponent_bits = b.ashr(f32_bits, c23);
    let byte_mask = b.const_i32(0xff);
    let exponent_bits = b.and(exponent_bits, byte_mask);
    let shift = b.const_i32(23 - n as i32);
    let value_bits = b.ashr(f32_bits, shift);
    let digit_mask = b.const_i32(((1u32 << n) - 1) as i32);
    let mut digit_bits = b.and(value_bits, digit_mask);

    if cft.is_signed() {
        let sign_mask = b.const_int(Ty::I32, 0x8000_0000);
        let sign_bit = b.and(f32_bits, sign_mask);
        let shift = b.const_i32(31 - n as i32);
        let sign_bit = b.lshr(sign_bit, shift);
        digit_bits = b.or(digit_bits, sign_bit);
    }

    let exponent_bits = stored_exponent(b, exponent_bits, cft);
    if let Some(exponent_ty) = cft.exponent_type() {
        store_custom_int(b, exponent_ptr, exponent_ty, exponent_bits);
    }

    // Flush to zero.
    let zero = b.const_i32(0);
    let exp_nonzero = b.icmp(IntPredicate::Ne, exponent_bits, zero);
    let digits = b.select(exp_nonzero, digit_bits, zero);
    store_custom_int(b, digits_ptr, cft.digits_type(), digits);
}

/// Load a float with an exponent field.
pub(crate) fn load_float_with_exponent(
    b: &mut IrBuilder,
    digits_ptr: BitPtr,
    exponent_ptr: BitPtr,
    cft: CustomFloatType,
    shared: bool,
) -> ValueId {
    let digits = load_custom_int(b, digits_ptr, cft.digits_type());
    let exponent = match cft.exponent_type() {
        Some(exponent_ty) => load_custom_int(b, exponent_ptr, exponent_ty),
        None => b.const_i32(0),
    };
    reconstruct_float_with_exponent(b, digits, exponent, cft, shared)
}

/// Assemble an `f32` from stored digits and a stored exponent.
pub(crate) fn reconstruct_float_with_exponent(
    b: &mut IrBuilder,
    input_digits: ValueId,
    input_exponent: ValueId,
    cft: CustomFloatType,
    shared: bool,
) -> ValueId {
    let n = cft.digit_bits() as i32;
    let input_digits = b.int_cast(input_digits, Ty::I32, false);
    let input_exponent = b.int_cast(input_exponent, Ty::I32, false);
    let zero = b.const_i32(0);

    // Zero exponents must stay zero after re-biasing.
    let mut offset = b.const_i32(cft.exponent_conversion_offset());
    if cft.exponent_type().is_some_and(|e| e.num_bits() < 8) {
        let nonzero = b.icmp(IntPredicate::Ne, input_exponent, zero);
        offset = b.select(nonzero, offset, zero);
    }

    let digits_mask = b.const_int(Ty::I32, low_mask(cft.digits_type().num_bits()));
    let mut digits = b.and(input_digits, digits_mask);
    let mut sign_bit = None;

    if shared {
        if cft.is_signed() {
            let sign_mask = b.const_i32(1 << n);
            let sign = b.and(digits, sign_mask);
            digits = b.xor(digits, sign);
            let shift = b.const_i32(31 - n);
            sign_bit = Some(b.shl(sign, shift));
            let one = b.const_i32(1);
            digits = b.shl(digits, one);
        }
        // Shared digits carry their leading one explicitly.
        let leading_zeros = b.intrinsic(Intrinsic::Ctlz, &[digits]);
        let top = b.const_i32(31 - n);
        let extra_shift = b.sub(top, leading_zeros);
        offset = b.add(offset, extra_shift);
        if !cft.is_signed() {
            let one = b.const_i32(1);
            offset = b.add(offset, one);
        }
        let base = b.const_i32(23 - n);
        let digits_shift = b.sub(base, extra_shift);
        digits = b.shl(digits, digits_shift);
    } else {
        let shift = b.const_i32(23 - n);
        digits = b.shl(digits, shift);
    }

    let fraction_mask = b.const_i32((1 << 23) - 1);
    let fraction = b.and(digits, fraction_mask);
    let exponent = b.add(input_exponent, offset);
    let c23 = b.const_i32(23);
    let exponent_bits = b.shl(exponent, c23);
    let mut f32_bits = b.or(exponent_bits, fraction);

    if shared {
        let zero_exponent = b.icmp(IntPredicate::Eq, input_exponent, zero);
        let zero_digits = b.icmp(IntPredicate::Eq, input_digits, zero);
        let zero_output = b.or(zero_exponent, zero_digits);
        f32_bits = b.select(zero_output, zero, f32_bits);
    }

    if cft.is_signed() {
        let sign = match sign_bit {
            Some(s) => s,
            None => {
                let mask = b.const_i32(1 << 23);
                let s = b.and(digits, mask);
                let shift = b.const_i32(31 - 23);
                b.shl(s, shift)
            }
        };
        f32_bits = b.or(f32_bits, sign);
    }

    b.cast(CastOp::Bitcast, f32_bits, Ty::F32)
}

// ---------------------------------------------------------------------------
// Shared exponents
// ---------------------------------------------------------------------------

/// Biased 8-bit exponent of an `f32`.
pub(crate) fn float_exponent(b: &mut IrBuilder, f: ValueId) -> ValueId {
    let f = fp_cast(b, f, Ty::F32);
    let bits = b.cast(CastOp::Bitcast, f, Ty::I32);
    let c23 = b.const_i32(23);
    let exp = b.lshr(bits, c23);
    let mask = b.const_i32(0xff);
    b.and(exp, mask)
}

/// Largest exponent of `floats`, as stored in the shared field.
pub(crate) fn shared_exponent(b: &mut IrBuilder, floats: &[ValueId]) -> Option<ValueId> {
    let mut max = None;
    for &f in floats {
        let exp = float_exponent(b, f);
        max = Some(match max {
            Some(m) => b.call_runtime(RuntimeFn::Max(PrimitiveType::U32), &[m, exp]),
            None => exp,
        });
    }
    max
}

/// Value stored into the shared exponent field for maximum exponent
/// `max_exponent`.
pub(crate) fn shared_exponent_to_store(
    b: &mut IrBuilder,
    max_exponent: ValueId,
    cft: CustomFloatType,
) -> ValueId {
    stored_exponent(b, max_exponent, cft)
}

/// Full 24-bit significand of `f` shifted right by its distance from the
/// shared exponent.
fn digits_with_shared_exponent(b: &mut IrBuilder, f: ValueId, shared_exp: ValueId) -> ValueId {
    let exp = float_exponent(b, f);
    let distance = b.sub(shared_exp, exp);

    // The implicit one exists only for non-zero exponents.
    let zero = b.const_i32(0);
    let exp_nonzero = b.icmp(IntPredicate::Ne, exp, zero);
    let exp_nonzero = b.int_cast(exp_nonzero, Ty::I32, false);
    let c23 = b.const_i32(23);
    let implicit_bit = b.shl(exp_nonzero, c23);

    let f = fp_cast(b, f, Ty::F32);
    let bits = b.cast(CastOp::Bitcast, f, Ty::I32);
    let fraction_mask = b.const_i32((1 << 23) - 1);
    let digits = b.and(bits, fraction_mask);
    let digits = b.or(digits, implicit_bit);
    let max_shift = b.const_i32(31);
    let distance = b.call_runtime(RuntimeFn::Min(PrimitiveType::U32), &[distance, max_shift]);
    b.lshr(digits, distance)
}

/// Digits of member `f` of a shared exponent group, rounded to the width
/// of `cft`'s digit field, with the sign bit above the magnitude.
pub(crate) fn encode_shared_digits(
    b: &mut IrBuilder,
    f: ValueId,
    shared_exp: ValueId,
    cft: CustomFloatType,
) -> ValueId {
    let n = cft.digit_bits() as i32;
    let digits = digits_with_shared_exponent(b, f, shared_exp);

    let mut right_shift = 23 + i32::from(cft.is_signed()) - n;
    if !cft.is_signed() {
        right_shift += 1;
    }
    // Round to nearest without overflowing the 24-bit significand.
    let half = b.const_i32(1 << (right_shift - 1));
    let digits = b.add(digits, half);
    let limit = b.const_i32((1 << 24) - 1);
    let digits = b.call_runtime(RuntimeFn::Min(PrimitiveType::U32), &[digits, limit]);
    let shift = b.const_i32(right_shift);
    let mut digits = b.lshr(digits, shift);

    if cft.is_signed() {
        let f = fp_cast(b, f, Ty::F32);
        let bits = b.cast(CastOp::Bitcast, f, Ty::I32);
        let sign_mask = b.const_int(Ty::I32, 0x8000_0000);
        let sign = b.and(bits, sign_mask);
        let shift = b.const_i32(31 - n);
        let sign = b.lshr(sign, shift);
        digits = b.or(digits, sign);
    }
    digits
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
