use strata_ir::SNodeTree;

use super::*;
use crate::codegen::tests::{call, open, runtime_for};

fn cu32(bits: u32, signed: bool) -> CustomIntType {
    CustomIntType::new(bits, signed, PrimitiveType::U32)
}

fn f32_arg(x: f32) -> u64 {
    u64::from(x.to_bits())
}

fn f32_ret(bits: u64) -> f32 {
    f32::from_bits(bits as u32)
}

/// `extract(word) -> i32` decoding `cit` at bit `offset`.
fn extract(word: u32, offset: i32, cit: CustomIntType) -> i32 {
    let rt = runtime_for(&SNodeTree::new());
    let mut b = IrBuilder::new();
    let f = open(&mut b, "extract", &[Ty::I32], Ty::I32);
    let w = b.param(f, 0);
    let off = b.const_i32(offset);
    let v = extract_custom_int(&mut b, w, off, cit);
    b.ret(v);
    call(&rt, b, "extract", &[u64::from(word)]) as u32 as i32
}

#[test]
fn signed_fields_sign_extend() {
    assert_eq!(extract(0x0000_00f0, 4, cu32(4, true)), -1);
    assert_eq!(extract(0x0000_0070, 4, cu32(4, true)), 7);
    assert_eq!(extract(0x8000_0000, 31, cu32(1, true)), -1);
}

#[test]
fn unsigned_fields_zero_extend() {
    assert_eq!(extract(0x0000_00f0, 4, cu32(4, false)), 15);
    assert_eq!(extract(0xffff_ffff, 0, cu32(32, false)), -1);
    assert_eq!(extract(0x0001_2340, 8, cu32(12, false)), 0x123);
}

#[test]
fn stores_leave_neighbouring_bits_alone() {
    let rt = runtime_for(&SNodeTree::new());
    let mem = rt.memory();
    let word = mem.alloc(8, 8);
    mem.store(word, 4, 0xffff_ffff);
    let cit = cu32(7, true);

    let mut b = IrBuilder::new();
    let f = open(&mut b, "store", &[Ty::Ptr, Ty::I32], Ty::Void);
    let (p, v) = (b.param(f, 0), b.param(f, 1));
    let ptr = BitPtr::at(&mut b, p, 5);
    store_custom_int(&mut b, ptr, cit, v);
    b.ret_void();
    let g = open(&mut b, "load", &[Ty::Ptr], Ty::I32);
    let p = b.param(g, 0);
    let ptr = BitPtr::at(&mut b, p, 5);
    let v = load_custom_int(&mut b, ptr, cit);
    b.ret(v);

    let module = b.into_module();
    let program = crate::backend::link(&module).unwrap();
    let machine = crate::backend::Machine::new(&rt, &program);
    let lane = strata_rt::Lane::SERIAL;
    machine.run(program.function_index("store").unwrap(), &[word, u64::from((-3i32) as u32)], &lane);
    let expected = (0xffff_ffff & !(0x7f << 5)) | ((0x7d) << 5);
    assert_eq!(mem.load(word, 4), expected);
    let back = machine.run(program.function_index("load").unwrap(), &[word], &lane);
    assert_eq!(back as u32 as i32, -3);
}

#[test]
fn atomic_add_returns_the_previous_field() {
    let rt = runtime_for(&SNodeTree::new());
    let mem = rt.memory();
    let word = mem.alloc(8, 8);
    mem.store(word, 4, 7 << 10);
    let cit = cu32(5, false);

    let mut b = IrBuilder::new();
    let f = open(&mut b, "add", &[Ty::Ptr, Ty::I32], Ty::I32);
    let (p, v) = (b.param(f, 0), b.param(f, 1));
    let ptr = BitPtr::at(&mut b, p, 10);
    let old = atomic_add_custom_int(&mut b, ptr, cit, v, true);
    b.ret(old);
    assert_eq!(call(&rt, b, "add", &[word, 5]), 7);
    assert_eq!(mem.load(word, 4), 12 << 10);
}

#[test]
fn fixed_point_rounds_to_the_nearest_step() {
    let cft = CustomFloatType::fixed(CustomIntType::new(16, true, PrimitiveType::U16), 0.01, PrimitiveType::F32);
    let rt = runtime_for(&SNodeTree::new());
    let mut b = IrBuilder::new();
    let f = open(&mut b, "quantize", &[Ty::F32], Ty::F32);
    let x = b.param(f, 0);
    let digits = float_to_custom_int(&mut b, cft, x);
    let back = reconstruct_custom_float(&mut b, digits, cft);
    b.ret(back);
    let module = b.into_module();
    let program = crate::backend::link(&module).unwrap();
    let machine = crate::backend::Machine::new(&rt, &program);
    let run = |x: f32| f32_ret(machine.run(0, &[f32_arg(x)], &strata_rt::Lane::SERIAL));
    assert!((run(1.234) - 1.23).abs() < 1e-6);
    assert!((run(-1.236) + 1.24).abs() < 1e-6);
    assert_eq!(run(0.0), 0.0);
}

/// Round trip through a word holding a 6-bit exponent at bit 0 and the
/// digits right above it.
fn exponent_round_trip(x: f32, digits: CustomIntType) -> f32 {
    let cft = CustomFloatType::with_exponent(digits, cu32(6, false));
    let rt = runtime_for(&SNodeTree::new());
    let word = rt.memory().alloc(8, 8);
    let mut b = IrBuilder::new();
    let f = open(&mut b, "round_trip", &[Ty::Ptr, Ty::F32], Ty::F32);
    let (p, x_val) = (b.param(f, 0), b.param(f, 1));
    let exponent_ptr = BitPtr::at(&mut b, p, 0);
    let digits_ptr = BitPtr::at(&mut b, p, 6);
    store_float_with_exponent(&mut b, digits_ptr, exponent_ptr, cft, x_val);
    let back = load_float_with_exponent(&mut b, digits_ptr, exponent_ptr, cft, false);
    b.ret(back);
    f32_ret(call(&rt, b, "round_trip", &[word, f32_arg(x)]))
}

#[test]
fn exponent_floats_keep_representable_values() {
    assert_eq!(exponent_round_trip(3.5, cu32(13, false)), 3.5);
    assert_eq!(exponent_round_trip(0.75, cu32(13, false)), 0.75);
    assert_eq!(exponent_round_trip(-3.5, cu32(14, true)), -3.5);
    assert_eq!(exponent_round_trip(0.0, cu32(13, false)), 0.0);
}

#[test]
fn exponent_floats_round_the_digits() {
    // 1 + 2^-12 needs 12 fraction bits; 4 digit bits round it back to 1.
    let x = 1.0 + 2f32.powi(-12);
    assert_eq!(exponent_round_trip(x, cu32(4, false)), 1.0);
}

#[test]
fn shared_exponent_is_the_largest_member_exponent() {
    let rt = runtime_for(&SNodeTree::new());
    let mut b = IrBuilder::new();
    let f = open(&mut b, "shared", &[Ty::F32, Ty::F32], Ty::I32);
    let members = [b.param(f, 0), b.param(f, 1)];
    let exp = shared_exponent(&mut b, &members).unwrap();
    b.ret(exp);
    assert_eq!(call(&rt, b, "shared", &[f32_arg(2.0), f32_arg(0.5)]), 128);
}

#[test]
fn shared_exponent_members_decode_exactly() {
    let cft = CustomFloatType::with_exponent(cu32(10, false), cu32(6, false));
    let rt = runtime_for(&SNodeTree::new());
    let mut b = IrBuilder::new();
    let f = open(&mut b, "member", &[Ty::F32, Ty::F32], Ty::F32);
    let (x, other) = (b.param(f, 0), b.param(f, 1));
    let exp = shared_exponent(&mut b, &[x, other]).unwrap();
    let stored = shared_exponent_to_store(&mut b, exp, cft);
    let digits = encode_shared_digits(&mut b, x, exp, cft);
    let back = reconstruct_float_with_exponent(&mut b, digits, stored, cft, true);
    b.ret(back);
    let module = b.into_module();
    let program = crate::backend::link(&module).unwrap();
    let machine = crate::backend::Machine::new(&rt, &program);
    for x in [2.0f32, 0.5, 0.0] {
        let out = machine.run(0, &[f32_arg(x), f32_arg(2.0)], &strata_rt::Lane::SERIAL);
        assert_eq!(f32_ret(out), x);
    }
}
