use strata_ir::{
    CustomIntType, KernelBuilder, KernelIr, PrimitiveType, RangeBound, SNodeId, SNodeOpType,
    SNodeTree,
};
use strata_rt::Runtime;

use crate::codegen::tests::{dense_i32_tree, lower, runtime_for};
use crate::config::CompileConfig;
use crate::error::CodegenError;
use crate::kernel::{compile_kernel, KernelArgs};

fn launch(rt: &Runtime, tree: &SNodeTree, ir: &KernelIr) -> Option<u64> {
    let kernel = compile_kernel("snode", ir, tree, &CompileConfig::default()).unwrap();
    kernel.launch(rt, &KernelArgs::new()).unwrap()
}

fn serial(body: impl FnOnce(&mut KernelBuilder)) -> KernelIr {
    let mut kb = KernelBuilder::new();
    kb.serial_task(body);
    kb.finish()
}

/// `pointer[4] -> dense[2] -> i32`: coordinate `c` lives in pointer cell
/// `c >> 1`.
fn pointer_tree() -> (SNodeTree, SNodeId, SNodeId) {
    let mut tree = SNodeTree::new();
    let pointer = tree.pointer(SNodeId::ROOT, &[4]);
    let dense = tree.dense(pointer, &[2]);
    let place = tree.place(dense, PrimitiveType::I32);
    (tree, pointer, place)
}

fn is_active(rt: &Runtime, tree: &SNodeTree, container: SNodeId, coord: i32) -> bool {
    let ir = serial(|b| {
        let c = b.const_i32(coord);
        let (ptr, index) = b.snode_node(tree, container, &[c]);
        let active = b.snode_op(SNodeOpType::IsActive, container, ptr, Some(index), None);
        b.kernel_return(active);
    });
    launch(rt, tree, &ir).unwrap() != 0
}

#[test]
fn activating_accesses_allocate_sparse_cells() {
    let (tree, pointer, place) = pointer_tree();
    let rt = runtime_for(&tree);
    let ir = serial(|b| {
        let c = b.const_i32(5);
        let ptr = b.snode_access(&tree, place, &[c], true);
        let v = b.const_i32(42);
        b.global_store(ptr, v);
    });
    launch(&rt, &tree, &ir);

    assert_eq!(rt.read_i32(place, &[5]), 42);
    assert_eq!(rt.place_address(place, &[0]), None);
    assert!(is_active(&rt, &tree, pointer, 5));
    assert!(is_active(&rt, &tree, pointer, 4));
    assert!(!is_active(&rt, &tree, pointer, 0));
}

#[test]
fn deactivation_clears_bitmasked_cells() {
    let mut tree = SNodeTree::new();
    let mask = tree.bitmasked(SNodeId::ROOT, &[8]);
    tree.place(mask, PrimitiveType::I32);
    let rt = runtime_for(&tree);
    let op = |kind: SNodeOpType| {
        serial(|b| {
            let c = b.const_i32(3);
            let (ptr, index) = b.snode_node(&tree, mask, &[c]);
            b.snode_op(kind, mask, ptr, Some(index), None);
        })
    };
    launch(&rt, &tree, &op(SNodeOpType::Activate));
    assert!(is_active(&rt, &tree, mask, 3));
    assert!(!is_active(&rt, &tree, mask, 2));
    launch(&rt, &tree, &op(SNodeOpType::Deactivate));
    assert!(!is_active(&rt, &tree, mask, 3));
}

#[test]
fn dense_nodes_cannot_be_deactivated() {
    let (tree, place) = dense_i32_tree();
    let dense = tree[place].parent.unwrap();
    let ir = serial(|b| {
        let c = b.const_i32(0);
        let (ptr, index) = b.snode_node(&tree, dense, &[c]);
        b.snode_op(SNodeOpType::Deactivate, dense, ptr, Some(index), None);
    });
    let err = lower(&ir, &tree, &CompileConfig::default()).unwrap_err();
    assert_eq!(err, CodegenError::MissingRuntimeSymbol("Dense_deactivate".into()));
}

#[test]
fn dynamic_nodes_append_and_report_their_length() {
    let mut tree = SNodeTree::new();
    let list = tree.dynamic(SNodeId::ROOT, 16, 4);
    let place = tree.place(list, PrimitiveType::I32);
    let rt = runtime_for(&tree);
    let ir = serial(|b| {
        let zero = b.const_i32(0);
        let (ptr, _) = b.snode_node(&tree, list, &[zero]);
        for v in [7, 8, 9, 10, 11] {
            let v = b.const_i32(v);
            b.snode_op(SNodeOpType::Append, list, ptr, None, Some(v));
        }
        let len = b.snode_op(SNodeOpType::Length, list, ptr, None, None);
        b.kernel_return(len);
    });
    assert_eq!(launch(&rt, &tree, &ir), Some(5));
    let values: Vec<_> = (0..5).map(|i| rt.read_i32(place, &[i])).collect();
    assert_eq!(values, vec![7, 8, 9, 10, 11]);
}

#[test]
fn appends_need_a_value() {
    let mut tree = SNodeTree::new();
    let list = tree.dynamic(SNodeId::ROOT, 16, 4);
    tree.place(list, PrimitiveType::I32);
    let ir = serial(|b| {
        let zero = b.const_i32(0);
        let (ptr, _) = b.snode_node(&tree, list, &[zero]);
        b.snode_op(SNodeOpType::Append, list, ptr, None, None);
    });
    let err = lower(&ir, &tree, &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, CodegenError::Invariant(_)), "{err}");
}

#[test]
fn bit_array_elements_are_consecutive_bit_ranges() {
    let mut tree = SNodeTree::new();
    let dense = tree.dense(SNodeId::ROOT, &[2]);
    let array = tree.bit_array(dense, 8, PrimitiveType::U32);
    let nibble = tree.place(array, CustomIntType::new(4, false, PrimitiveType::U32));
    let rt = runtime_for(&tree);

    let mut kb = KernelBuilder::new();
    // Cell 1 of the dense level: coordinates 8..16.
    kb.range_for_task(RangeBound::Const(8), RangeBound::Const(16), |b, task| {
        let i = b.loop_index(task, 0);
        let ptr = b.snode_access(&tree, nibble, &[i], false);
        b.global_store(ptr, i);
    });
    launch(&rt, &tree, &kb.finish());

    // Each element keeps the low four bits of its coordinate.
    assert_eq!(rt.read_bits(array, &[8]), 0xfedc_ba98);
    assert_eq!(rt.read_bits(array, &[0]), 0);
}

#[test]
fn struct_for_indices_outside_struct_for_are_rejected() {
    let (tree, _) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.range_for_task(RangeBound::Const(0), RangeBound::Const(4), |b, task| {
        b.loop_linear_index(task);
    });
    let err = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported(_)), "{err}");

    let mut kb = KernelBuilder::new();
    kb.range_for_task(RangeBound::Const(0), RangeBound::Const(4), |b, task| {
        b.block_corner_index(task, 0);
    });
    let err = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported(_)), "{err}");
}

#[test]
fn cpu_block_dim_is_the_requested_or_default_size() {
    let (tree, place) = dense_i32_tree();
    let rt = runtime_for(&tree);
    let mut kb = KernelBuilder::new();
    let task = kb.range_for_task(RangeBound::Const(0), RangeBound::Const(1), |b, _| {
        let zero = b.const_i32(0);
        let ptr = b.snode_access(&tree, place, &[zero], false);
        let dim = b.block_dim();
        b.global_store(ptr, dim);
    });
    kb.configure_task(task, |o| o.block_dim = 16);
    kb.serial_task(|b| {
        let one = b.const_i32(1);
        let ptr = b.snode_access(&tree, place, &[one], false);
        let dim = b.block_dim();
        b.global_store(ptr, dim);
    });
    launch(&rt, &tree, &kb.finish());
    assert_eq!(rt.read_i32(place, &[0]), 16);
    assert_eq!(rt.read_i32(place, &[1]), 32);
}
