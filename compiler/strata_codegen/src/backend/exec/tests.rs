use super::*;

#[test]
fn shifts_past_width_saturate() {
    assert_eq!(binary(BinOp::Shl, Ty::I32, 1, 32), 0);
    assert_eq!(binary(BinOp::LShr, Ty::I32, 0xffff_ffff, 40), 0);
    assert_eq!(mask(Ty::I32, binary(BinOp::AShr, Ty::I32, 0x8000_0000, 35)), 0xffff_ffff);
    assert_eq!(binary(BinOp::AShr, Ty::I32, 0x4000_0000, 35), 0);
}

#[test]
fn signed_division_truncates_toward_zero() {
    let minus_seven = u64::from((-7i32) as u32);
    let two = 2;
    assert_eq!(mask(Ty::I32, binary(BinOp::SDiv, Ty::I32, minus_seven, two)), u64::from((-3i32) as u32));
    assert_eq!(mask(Ty::I32, binary(BinOp::SRem, Ty::I32, minus_seven, two)), u64::from((-1i32) as u32));
}

#[test]
fn division_by_zero_yields_zero() {
    assert_eq!(binary(BinOp::SDiv, Ty::I64, 9, 0), 0);
    assert_eq!(binary(BinOp::URem, Ty::I8, 9, 0), 0);
}

#[test]
fn float_arithmetic_uses_operand_width() {
    let a = u64::from(1.5f32.to_bits());
    let b = u64::from(2.25f32.to_bits());
    assert_eq!(f32_of(binary(BinOp::FAdd, Ty::F32, a, b)), 3.75);
    let a = 1.0f64.to_bits();
    let b = 3.0f64.to_bits();
    assert_eq!(f64_of(binary(BinOp::FDiv, Ty::F64, a, b)), 1.0 / 3.0);
}

#[test]
fn casts_between_widths() {
    assert_eq!(mask(Ty::I64, cast(CastOp::SExt, Ty::I8, Ty::I64, 0x80)), 0xffff_ffff_ffff_ff80);
    assert_eq!(cast(CastOp::ZExt, Ty::I8, Ty::I64, 0x80), 0x80);
    let neg = u64::from((-2.75f32).to_bits());
    assert_eq!(mask(Ty::I32, cast(CastOp::FpToSi, Ty::F32, Ty::I32, neg)), u64::from((-2i32) as u32));
    let x = cast(CastOp::SiToFp, Ty::I32, Ty::F64, u64::from((-3i32) as u32));
    assert_eq!(f64_of(x), -3.0);
    let half = cast(CastOp::FpTrunc, Ty::F64, Ty::F32, 0.5f64.to_bits());
    assert_eq!(f32_of(half), 0.5);
}

#[test]
fn ordered_comparisons_reject_nan() {
    let nan = f64::NAN.to_bits();
    let one = 1.0f64.to_bits();
    assert!(!fcmp(FloatPredicate::Olt, Ty::F64, nan, one));
    assert!(!fcmp(FloatPredicate::One, Ty::F64, nan, one));
    assert!(fcmp(FloatPredicate::One, Ty::F64, 2.0f64.to_bits(), one));
}

#[test]
fn signed_and_unsigned_integer_compares_differ() {
    let minus_one = 0xff;
    assert!(icmp(IntPredicate::Slt, Ty::I8, minus_one, 1));
    assert!(icmp(IntPredicate::Ugt, Ty::I8, minus_one, 1));
}

#[test]
fn atomic_updates() {
    assert_eq!(rmw(RmwOp::Max, Ty::I32, 3, u64::from((-1i32) as u32)), 3);
    assert_eq!(rmw(RmwOp::UMax, Ty::I32, 3, u64::from((-1i32) as u32)), 0xffff_ffff);
    let sum = rmw(RmwOp::FAdd, Ty::F32, u64::from(1.0f32.to_bits()), u64::from(0.5f32.to_bits()));
    assert_eq!(f32_of(sum), 1.5);
}
