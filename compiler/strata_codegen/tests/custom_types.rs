//! End-to-end tests for bit-packed custom types.
//!
//! Kernels store into and load from fields of a bit struct; the runtime
//! words are inspected directly to check the packing.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless,
    reason = "Tests move raw words between integer widths"
)]

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use strata_codegen::{compile_kernel, CompileConfig, KernelArgs};
use strata_ir::{
    CustomFloatType, CustomIntType, DataType, KernelBuilder, KernelIr, PrimitiveType, SNodeId,
    SNodeTree,
};
use strata_rt::{Runtime, RuntimeConfig};

fn runtime_for(tree: &SNodeTree) -> Runtime {
    Runtime::new(tree, RuntimeConfig::default().with_memory_bytes(1 << 20))
}

fn run(rt: &Runtime, tree: &SNodeTree, ir: &KernelIr, args: &KernelArgs) -> Option<u64> {
    let kernel = compile_kernel("custom", ir, tree, &CompileConfig::default()).unwrap();
    kernel.launch(rt, args).unwrap()
}

fn low_mask(bits: u32) -> u64 {
    if bits == 64 {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

// -- Custom integers --

/// `dense[1] -> bit_struct(u64)` with `cit` at bit 0 and, when it does not
/// fill the word, an unsigned neighbour above it.
struct IntWord {
    tree: SNodeTree,
    word: SNodeId,
    field: SNodeId,
    neighbour: Option<SNodeId>,
}

fn int_word(cit: CustomIntType) -> IntWord {
    let mut tree = SNodeTree::new();
    let dense = tree.dense(SNodeId::ROOT, &[1]);
    let word = tree.bit_struct(dense, PrimitiveType::U64);
    let field = tree.place(word, cit);
    let rest = 64 - cit.num_bits();
    let neighbour = (rest > 0)
        .then(|| tree.place(word, CustomIntType::new(rest, false, PrimitiveType::U64)));
    IntWord {
        tree,
        word,
        field,
        neighbour,
    }
}

/// Store the `i64` argument into the field, then return its decoded value.
fn store_then_load(w: &IntWord) -> KernelIr {
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let ptr = b.snode_access(&w.tree, w.field, &[zero], false);
        let v = b.arg(0, PrimitiveType::I64);
        b.global_store(ptr, v);
    });
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let ptr = b.snode_access(&w.tree, w.field, &[zero], false);
        let v = b.global_load(ptr);
        let v = b.cast(v, PrimitiveType::I64);
        b.kernel_return(v);
    });
    kb.finish()
}

/// Any width from 1 to 64 bits, with a value that fits it.
fn custom_int_case() -> impl Strategy<Value = (u32, bool, i64)> {
    (1u32..=64, any::<bool>(), any::<u64>()).prop_map(|(bits, signed, raw)| {
        let v = raw & low_mask(bits);
        let v = if signed && bits < 64 {
            // Sign-extend the low `bits` bits.
            let shift = 64 - bits;
            ((v << shift) as i64) >> shift
        } else {
            v as i64
        };
        (bits, signed, v)
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        ..ProptestConfig::default()
    })]

    #[test]
    fn custom_ints_round_trip_at_every_width((bits, signed, value) in custom_int_case()) {
        let cit = CustomIntType::new(bits, signed, PrimitiveType::U64);
        let w = int_word(cit);
        let rt = runtime_for(&w.tree);
        if let Some(neighbour) = w.neighbour {
            let above = w.tree[neighbour].bit_offset;
            rt.write_bits(w.word, &[0], u64::MAX << above);
        }
        let args = KernelArgs::new().arg_i64(value);
        let back = run(&rt, &w.tree, &store_then_load(&w), &args).unwrap();

        prop_assert_eq!(back as i64, value);

        let word = rt.read_bits(w.word, &[0]);
        prop_assert_eq!(word & low_mask(bits), (value as u64) & low_mask(bits));
        if bits < 64 {
            prop_assert_eq!(word >> bits, u64::MAX >> bits, "neighbour bits changed");
        }
    }
}

#[test]
fn custom_int_compute_types_follow_width_and_sign() {
    let cases = [
        (5, true, PrimitiveType::I32),
        (32, false, PrimitiveType::U32),
        (33, true, PrimitiveType::I64),
        (64, false, PrimitiveType::U64),
    ];
    for (bits, signed, compute) in cases {
        let cit = CustomIntType::new(bits, signed, PrimitiveType::U64);
        let w = int_word(cit);
        let mut kb = KernelBuilder::new();
        let mut loaded = None;
        kb.serial_task(|b| {
            let zero = b.const_i32(0);
            let ptr = b.snode_access(&w.tree, w.field, &[zero], false);
            loaded = Some(b.global_load(ptr));
        });
        let ir = kb.finish();
        let v = loaded.unwrap();
        assert_eq!(ir.graph[v].ret_type, DataType::from(compute), "{cit}");
    }
}

// -- Custom floats --

/// A single float field in a `u32` word, read back as `f32`.
fn float_round_trip(place: impl FnOnce(&mut SNodeTree, SNodeId) -> SNodeId, xs: &[f32]) -> Vec<f32> {
    let mut tree = SNodeTree::new();
    let dense = tree.dense(SNodeId::ROOT, &[1]);
    let word = tree.bit_struct(dense, PrimitiveType::U32);
    let field = place(&mut tree, word);
    let rt = runtime_for(&tree);

    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let ptr = b.snode_access(&tree, field, &[zero], false);
        let x = b.arg(0, PrimitiveType::F32);
        b.global_store(ptr, x);
        let v = b.global_load(ptr);
        b.kernel_return(v);
    });
    let ir = kb.finish();
    xs.iter()
        .map(|&x| {
            let out = run(&rt, &tree, &ir, &KernelArgs::new().arg_f32(x)).unwrap();
            f32::from_bits(out as u32)
        })
        .collect()
}

#[test]
fn fixed_point_floats_round_to_the_scale() {
    let cft = CustomFloatType::fixed(
        CustomIntType::new(16, true, PrimitiveType::U32),
        1.0 / 64.0,
        PrimitiveType::F32,
    );
    let out = float_round_trip(|tree, word| tree.place(word, cft), &[1.5, -2.25, 0.0, 0.005]);
    assert_eq!(out, vec![1.5, -2.25, 0.0, 0.0]);
}

#[test]
fn exponent_floats_keep_their_leading_digits() {
    let cft = CustomFloatType::with_exponent(
        CustomIntType::new(13, true, PrimitiveType::U32),
        CustomIntType::new(6, false, PrimitiveType::U32),
    );
    let xs = [1.0, -0.375, 6.0, 0.0, 1024.0];
    let out = float_round_trip(|tree, word| tree.place_float_with_exponent(word, cft), &xs);
    assert_eq!(out, xs.to_vec());
}

/// Three members sharing a 6-bit exponent in a `u32` word: stores `xs` in
/// one bit-struct store, then returns the raw shared exponent field and
/// each member read back as `f32`.
fn shared_exponent_group(digits: CustomIntType, xs: [f32; 3]) -> (u64, Vec<f32>) {
    let mut tree = SNodeTree::new();
    let dense = tree.dense(SNodeId::ROOT, &[1]);
    let word = tree.bit_struct(dense, PrimitiveType::U32);
    let exponent = CustomIntType::new(6, false, PrimitiveType::U32);
    let cft = CustomFloatType::with_exponent(digits, exponent);
    let (exp, members) = tree.place_shared_exponent(word, exponent, &[cft, cft, cft]);
    assert_eq!(tree[exp].exponent_users, members);
    let rt = runtime_for(&tree);

    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let (ptr, _) = b.snode_node(&tree, word, &[zero]);
        let values = xs.map(|x| b.const_f32(x));
        b.bit_struct_store(ptr, word, &[1, 2, 3], &values);
    });
    run(&rt, &tree, &kb.finish(), &KernelArgs::new());
    let stored = (rt.read_bits(word, &[0]) >> tree[exp].bit_offset) & low_mask(6);

    let load = |member: SNodeId| {
        let mut kb = KernelBuilder::new();
        kb.serial_task(|b| {
            let zero = b.const_i32(0);
            let ptr = b.snode_access(&tree, member, &[zero], false);
            let v = b.global_load(ptr);
            b.kernel_return(v);
        });
        let out = run(&rt, &tree, &kb.finish(), &KernelArgs::new()).unwrap();
        f32::from_bits(out as u32)
    };
    (stored, members.iter().map(|&m| load(m)).collect())
}

#[test]
fn shared_exponent_members_decode_exactly() {
    let digits = CustomIntType::new(4, false, PrimitiveType::U32);
    let (stored, decoded) = shared_exponent_group(digits, [2.0, 0.5, 0.0]);
    // Biased exponent of 2.0 (128) moved into the 6-bit field's range.
    let cft = CustomFloatType::with_exponent(digits, CustomIntType::new(6, false, PrimitiveType::U32));
    assert_eq!(stored, 128 - cft.exponent_conversion_offset() as u64);
    assert_eq!(decoded, vec![2.0, 0.5, 0.0]);
}

#[test]
fn signed_shared_exponent_members_keep_their_signs() {
    let digits = CustomIntType::new(5, true, PrimitiveType::U32);
    let (_, decoded) = shared_exponent_group(digits, [-2.0, 0.5, -0.75]);
    assert_eq!(decoded, vec![-2.0, 0.5, -0.75]);
}

#[test]
fn smaller_members_lose_digits_to_the_largest() {
    // 15.9 sets the exponent to 2^3, so four digits step by 1.0 and
    // rounding saturates at the widest value.
    let digits = CustomIntType::new(4, false, PrimitiveType::U32);
    let (_, decoded) = shared_exponent_group(digits, [15.9, 2.7, 0.1]);
    assert_eq!(decoded, vec![15.0, 3.0, 0.0]);
}
