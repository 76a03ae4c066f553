use pretty_assertions::assert_eq;

use super::*;
use crate::backend::ir::{BinOp, CastOp};

fn with_function(ret: Ty) -> (IrBuilder, FunctionId) {
    let mut b = IrBuilder::new();
    let f = b.declare_function("f", &[Ty::I32, Ty::F32], ret);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    (b, f)
}

#[test]
fn constants_are_masked_to_width() {
    let (mut b, _) = with_function(Ty::Void);
    let c = b.const_int(Ty::I8, 0x1ff);
    let block = b.current_block().unwrap();
    let inst = b.module().block(block).insts.last().unwrap().clone();
    assert_eq!(inst.op, Op::Const(0xff));
    assert_eq!(b.ty(c), Ty::I8);
}

#[test]
fn mixed_operand_types_are_counted() {
    let (mut b, f) = with_function(Ty::Void);
    let i = b.param(f, 0);
    let x = b.param(f, 1);
    b.binary(BinOp::Add, i, x);
    b.binary(BinOp::FAdd, i, i);
    assert_eq!(b.codegen_error_count(), 2);
}

#[test]
fn invalid_casts_are_counted() {
    let (mut b, f) = with_function(Ty::Void);
    let i = b.param(f, 0);
    b.cast(CastOp::Trunc, i, Ty::I64);
    assert_eq!(b.codegen_error_count(), 1);
    let wide = b.int_cast(i, Ty::I64, true);
    assert_eq!(b.ty(wide), Ty::I64);
    assert_eq!(b.codegen_error_count(), 1);
}

#[test]
fn entry_allocas_land_before_the_entry_terminator() {
    let (mut b, f) = with_function(Ty::Void);
    let next = b.append_block(f, "next");
    b.br(next);
    b.position_at_end(next);
    let slot = b.entry_alloca(f, Ty::I64, 2, 8);
    b.ret_void();
    let entry = b.entry_block(f).unwrap();
    let insts = &b.module().block(entry).insts;
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].result, slot);
    assert!(insts[1].op.is_terminator());
    assert_eq!(b.current_block(), Some(next));
}

#[test]
fn missing_parameter_is_counted() {
    let (b, f) = with_function(Ty::Void);
    assert!(b.param(f, 5).is_none());
    assert_eq!(b.codegen_error_count(), 1);
}

#[test]
fn clone_function_remaps_values_and_blocks() {
    let (mut b, f) = with_function(Ty::I32);
    let exit = b.append_block(f, "exit");
    b.br(exit);
    b.position_at_end(exit);
    let i = b.param(f, 0);
    let one = b.const_i32(1);
    let sum = b.add(i, one);
    b.ret(sum);

    let g = b.module_mut().clone_function(f, "g");
    let module = b.module();
    let gf = module.function(g);
    assert_eq!(gf.blocks.len(), 2);
    let original: Vec<_> = module.insts(f).cloned().collect();
    let copied: Vec<_> = module.insts(g).cloned().collect();
    assert_eq!(original.len(), copied.len());
    for (a, c) in original.iter().zip(&copied) {
        if !a.result.is_none() {
            assert_ne!(a.result, c.result);
        }
    }
    match &copied[0].op {
        Op::Br(t) => assert_eq!(*t, gf.blocks[1]),
        other => panic!("expected branch, got {other:?}"),
    }
    module.verify().unwrap();
}
