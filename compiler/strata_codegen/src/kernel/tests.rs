use pretty_assertions::assert_eq;
use strata_ir::{BinaryOpType, KernelBuilder, PrimitiveType, RangeBound};
use strata_rt::RuntimeError;

use super::*;
use crate::codegen::tests::{dense_i32_tree, runtime_for};
use crate::config::Arch;

#[test]
fn scalar_arguments_reach_the_kernel() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let n = b.arg(0, PrimitiveType::I32);
        let x = b.arg(1, PrimitiveType::F32);
        let x = b.cast(x, PrimitiveType::I32);
        let wide = b.arg(2, PrimitiveType::I64);
        let wide = b.cast(wide, PrimitiveType::I32);
        let sum = b.binary(BinaryOpType::Add, n, x);
        let sum = b.binary(BinaryOpType::Add, sum, wide);
        b.kernel_return(sum);
    });
    let kernel = compile_kernel("args", &kb.finish(), &tree, &CompileConfig::default()).unwrap();
    let rt = runtime_for(&tree);
    let args = KernelArgs::new().arg_i32(40).arg_f32(2.5).arg_i64(-10);
    assert_eq!(kernel.launch(&rt, &args).unwrap(), Some(32));
}

#[test]
fn kernels_without_a_return_yield_none() {
    let (tree, place) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let ptr = b.snode_access(&tree, place, &[zero], false);
        let v = b.const_i32(9);
        b.global_store(ptr, v);
    });
    let kernel = compile_kernel("store", &kb.finish(), &tree, &CompileConfig::default()).unwrap();
    let rt = runtime_for(&tree);
    assert_eq!(kernel.launch(&rt, &KernelArgs::new()).unwrap(), None);
    assert_eq!(rt.read_i32(place, &[0]), 9);
}

#[test]
fn tasks_launch_in_order_and_share_one_context() {
    let (tree, place) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    // A: field[0] = arg; B: field[1] = field[0] * 2; C: field[2] = field[1] + 1
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let dst = b.snode_access(&tree, place, &[zero], false);
        let v = b.arg(0, PrimitiveType::I32);
        b.global_store(dst, v);
    });
    kb.range_for_task(RangeBound::Const(1), RangeBound::Const(2), |b, task| {
        let i = b.loop_index(task, 0);
        let zero = b.const_i32(0);
        let src = b.snode_access(&tree, place, &[zero], false);
        let v = b.global_load(src);
        let two = b.const_i32(2);
        let v = b.binary(BinaryOpType::Mul, v, two);
        let dst = b.snode_access(&tree, place, &[i], false);
        b.global_store(dst, v);
    });
    kb.serial_task(|b| {
        let (one, two) = (b.const_i32(1), b.const_i32(2));
        let src = b.snode_access(&tree, place, &[one], false);
        let v = b.global_load(src);
        let v = b.binary(BinaryOpType::Add, v, one);
        let dst = b.snode_access(&tree, place, &[two], false);
        b.global_store(dst, v);
    });
    let kernel = compile_kernel("chain", &kb.finish(), &tree, &CompileConfig::default()).unwrap();
    let names: Vec<_> = kernel.task_names().collect();
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.starts_with("chain_")), "{names:?}");
    assert!(names[1].ends_with("range_for"), "{names:?}");

    let rt = runtime_for(&tree);
    kernel.launch(&rt, &KernelArgs::new().arg_i32(5)).unwrap();
    let values: Vec<_> = (0..3).map(|i| rt.read_i32(place, &[i])).collect();
    assert_eq!(values, vec![5, 10, 11]);
}

#[test]
fn a_failed_assert_stops_the_launch() {
    let (tree, place) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let n = b.arg(0, PrimitiveType::I32);
        let zero = b.const_i32(0);
        let ok = b.binary(BinaryOpType::CmpGe, n, zero);
        b.assert(ok, "n = %d must not be negative", &[n]);
    });
    kb.serial_task(|b| {
        let zero = b.const_i32(0);
        let dst = b.snode_access(&tree, place, &[zero], false);
        let v = b.const_i32(1);
        b.global_store(dst, v);
    });
    let kernel = compile_kernel("guarded", &kb.finish(), &tree, &CompileConfig::default()).unwrap();
    let rt = runtime_for(&tree);

    let err = kernel.launch(&rt, &KernelArgs::new().arg_i32(-4)).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::AssertionFailed("n = -4 must not be negative".to_owned())
    );
    assert_eq!(rt.read_i32(place, &[0]), 0);
    assert!(rt.take_error().is_none());

    kernel.launch(&rt, &KernelArgs::new().arg_i32(4)).unwrap();
    assert_eq!(rt.read_i32(place, &[0]), 1);
}

#[test]
fn launch_arguments_are_validated() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.serial_task(|_| {});
    let kernel = compile_kernel("noop", &kb.finish(), &tree, &CompileConfig::default()).unwrap();
    let rt = runtime_for(&tree);

    let too_many = (0..9).fold(KernelArgs::new(), |args, i| args.arg_i32(i));
    assert!(matches!(
        kernel.launch(&rt, &too_many),
        Err(RuntimeError::InvalidArgument(_))
    ));
    let deep = KernelArgs::new().arg_array(0, &[1; 9]);
    assert!(matches!(
        kernel.launch(&rt, &deep),
        Err(RuntimeError::InvalidArgument(_))
    ));
}

#[test]
fn linked_programs_hold_only_reachable_functions() {
    let (tree, place) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.struct_for_task(&tree, tree[place].parent.unwrap(), |_, _| {});
    let config = CompileConfig::default().with_arch(Arch::Cuda);
    let kernel = compile_kernel("pruned", &kb.finish(), &tree, &config).unwrap();
    let names: Vec<_> = kernel.program().function_names().collect();
    assert!(!names.contains(&"gpu_parallel_struct_for"), "{names:?}");
    assert!(
        names.iter().any(|n| n.ends_with("_parallel_struct_for")),
        "{names:?}"
    );
    for task in kernel.task_names() {
        assert!(kernel.program().function_index(task).is_some(), "{task}");
    }
    assert_eq!(kernel.name(), "pruned");
}
