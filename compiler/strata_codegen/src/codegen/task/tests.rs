use strata_ir::{
    BinaryOpType, KernelBuilder, Offload, PrimitiveType, RangeBound, SNodeId, SNodeTree, TaskKind,
};
use strata_rt::RuntimeFn;

use crate::backend::LaunchShape;
use crate::codegen::tests::{dense_i32_tree, lower, runtime_for};
use crate::config::{Arch, CompileConfig};
use crate::error::CodegenError;
use crate::kernel::{compile_kernel, KernelArgs};

#[test]
fn range_tasks_emit_body_and_thread_local_functions() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.range_for_task(RangeBound::Const(0), RangeBound::Const(4), |_, _| {});
    let with_tls = kb.range_for_task(RangeBound::Const(0), RangeBound::Const(4), |_, _| {});
    kb.task_tls(with_tls, 8, |_| {}, |_| {});
    let (text, tasks) = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap();

    let (first, second) = (&tasks[0].name, &tasks[1].name);
    assert!(text.contains(&format!("@{first}_body(")), "{text}");
    assert!(!text.contains(&format!("@{first}_tls_prologue(")), "{text}");
    assert!(text.contains(&format!("@{second}_tls_prologue(")), "{text}");
    assert!(text.contains(&format!("@{second}_tls_epilogue(")), "{text}");
    assert!(text.contains(&format!("@{}(", RuntimeFn::CpuParallelRangeFor)), "{text}");
}

#[test]
fn gpu_range_tasks_use_the_grid_stride_driver() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.range_for_task(RangeBound::Const(0), RangeBound::Const(4), |_, _| {});
    let config = CompileConfig::default().with_arch(Arch::Cuda);
    let (text, tasks) = lower(&kb.finish(), &tree, &config).unwrap();
    assert!(text.contains(&format!("@{}(", RuntimeFn::GpuParallelRangeFor)), "{text}");
    assert_eq!(
        tasks[0].shape,
        LaunchShape {
            grid_dim: config.gpu_grid_dim,
            block_dim: config.default_gpu_block_dim,
            bls_size: 0,
        }
    );
}

#[test]
fn range_tasks_reject_block_local_storage() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    let task = kb.range_for_task(RangeBound::Const(0), RangeBound::Const(4), |_, _| {});
    kb.task_bls(task, 64, |_| {}, |_| {});
    let config = CompileConfig::default().with_arch(Arch::Cuda);
    let err = lower(&kb.finish(), &tree, &config).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported(_)), "{err}");
}

#[test]
fn range_tasks_cover_the_whole_range_on_every_target() {
    for config in [
        CompileConfig::default(),
        CompileConfig::default().with_num_cpu_threads(3).with_default_cpu_block_dim(2),
        CompileConfig::default().with_arch(Arch::Cuda).with_gpu_grid_dim(2),
    ] {
        let mut tree = SNodeTree::new();
        let dense = tree.dense(SNodeId::ROOT, &[16]);
        let place = tree.place(dense, PrimitiveType::I32);
        let rt = runtime_for(&tree);
        let mut kb = KernelBuilder::new();
        kb.range_for_task(RangeBound::Const(3), RangeBound::Const(13), |b, task| {
            let i = b.loop_index(task, 0);
            let ptr = b.snode_access(&tree, place, &[i], false);
            let v = b.binary(BinaryOpType::Mul, i, i);
            b.global_store(ptr, v);
        });
        let kernel = compile_kernel("cover", &kb.finish(), &tree, &config).unwrap();
        kernel.launch(&rt, &KernelArgs::new()).unwrap();
        let values: Vec<_> = (0..16).map(|i| rt.read_i32(place, &[i])).collect();
        let expected: Vec<_> = (0..16).map(|i| if (3..13).contains(&i) { i * i } else { 0 }).collect();
        assert_eq!(values, expected, "{:?}", config.arch);
    }
}

#[test]
fn listgen_collects_active_parent_cells() {
    let mut tree = SNodeTree::new();
    let pointer = tree.pointer(SNodeId::ROOT, &[4]);
    let dense = tree.dense(pointer, &[2]);
    let place = tree.place(dense, PrimitiveType::I32);
    let rt = runtime_for(&tree);

    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        for c in [0, 5] {
            let c = b.const_i32(c);
            let ptr = b.snode_access(&tree, place, &[c], true);
            b.global_store(ptr, c);
        }
    });
    kb.struct_for_task(&tree, dense, |_, _| {});
    let kernel = compile_kernel("listgen", &kb.finish(), &tree, &CompileConfig::default()).unwrap();
    let kinds: Vec<_> = kernel.tasks().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TaskKind::Serial,
            TaskKind::Serial,
            TaskKind::Listgen,
            TaskKind::Serial,
            TaskKind::Listgen,
            TaskKind::StructFor,
        ]
    );
    kernel.launch(&rt, &KernelArgs::new()).unwrap();
    assert_eq!(rt.list_len(pointer), 1);
    assert_eq!(rt.list_len(dense), 2);
}

#[test]
fn listgen_and_gc_need_a_node_with_a_parent() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    let mut listgen = Offload::new(TaskKind::Listgen);
    listgen.snode = Some(SNodeId::ROOT);
    kb.offload(listgen, |_, _| {});
    let err = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, CodegenError::Invariant(_)), "{err}");

    let mut kb = KernelBuilder::new();
    kb.offload(Offload::new(TaskKind::Gc), |_, _| {});
    let err = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, CodegenError::Invariant(_)), "{err}");
}

#[test]
fn gc_tasks_call_the_collector_for_their_node() {
    let mut tree = SNodeTree::new();
    let pointer = tree.pointer(SNodeId::ROOT, &[4]);
    tree.place(pointer, PrimitiveType::I32);
    let mut kb = KernelBuilder::new();
    kb.gc_task(pointer);
    let (text, tasks) = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap();
    assert_eq!(tasks[0].kind, TaskKind::Gc);
    assert!(tasks[0].shape.is_serial());
    assert!(text.contains(&format!("@{}(", RuntimeFn::NodeGc)), "{text}");
}
