use strata_ir::{KernelBuilder, RangeBound, SNodeId, SNodeTree};
use strata_rt::abi;

use crate::codegen::tests::{dense_i32_tree, lower};
use crate::config::CompileConfig;

fn meta_records(text: &str) -> usize {
    text.matches(&format!("alloca i8 x {}, align 8", abi::meta::SIZE))
        .count()
}

#[test]
fn each_function_builds_a_node_record_once() {
    let (tree, place) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        for i in [1, 2, 3] {
            let i = b.const_i32(i);
            let ptr = b.snode_access(&tree, place, &[i], false);
            b.global_store(ptr, i);
        }
    });
    let (text, _) = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap();
    assert_eq!(meta_records(&text), 1, "{text}");
}

#[test]
fn records_do_not_leak_across_functions() {
    let (tree, place) = dense_i32_tree();
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let i = b.const_i32(0);
        let ptr = b.snode_access(&tree, place, &[i], false);
        b.global_store(ptr, i);
    });
    kb.range_for_task(RangeBound::Const(0), RangeBound::Const(8), |b, task| {
        let i = b.loop_index(task, 0);
        let ptr = b.snode_access(&tree, place, &[i], false);
        b.global_store(ptr, i);
    });
    let (text, _) = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap();
    assert_eq!(meta_records(&text), 2, "{text}");
}

#[test]
fn every_container_on_the_path_gets_a_record() {
    let mut tree = SNodeTree::new();
    let outer = tree.pointer(SNodeId::ROOT, &[2]);
    let inner = tree.dense(outer, &[4]);
    let place = tree.place(inner, strata_ir::PrimitiveType::F32);
    let mut kb = KernelBuilder::new();
    kb.serial_task(|b| {
        let i = b.const_i32(5);
        let ptr = b.snode_access(&tree, place, &[i], true);
        let v = b.const_f32(1.0);
        b.global_store(ptr, v);
    });
    let (text, _) = lower(&kb.finish(), &tree, &CompileConfig::default()).unwrap();
    assert_eq!(meta_records(&text), 2, "{text}");
}
