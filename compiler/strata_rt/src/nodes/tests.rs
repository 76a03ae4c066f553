use super::*;
use crate::symbols::RuntimeFn;
use crate::testing::TestHost;
use strata_ir::{PrimitiveType, SNodeTree};

fn node_fn(kind: SNodeKind, method: NodeMethod) -> RuntimeFn {
    RuntimeFn::Node(kind, method)
}

#[test]
fn pointer_activation_allocates_and_gc_reclaims() {
    let mut tree = SNodeTree::new();
    let ptr = tree.pointer(SNodeId::ROOT, &[4]);
    let _x = tree.place(ptr, PrimitiveType::I32);
    let host = TestHost::new(&tree);
    let meta = host.meta(&tree, ptr);
    let node = host.rt.root();
    let f = |m| node_fn(SNodeKind::Pointer, m);

    assert_eq!(host.native(f(NodeMethod::IsActive), &[meta, node, 2]), 0);
    let ambient = host.native(f(NodeMethod::LookupElement), &[meta, node, 2]);
    assert_eq!(ambient, host.rt.ambient(ptr));

    host.native(f(NodeMethod::Activate), &[meta, node, 2]);
    assert_eq!(host.native(f(NodeMethod::IsActive), &[meta, node, 2]), 1);
    let cell = host.native(f(NodeMethod::LookupElement), &[meta, node, 2]);
    assert_ne!(cell, ambient);
    // Activation is idempotent.
    host.native(f(NodeMethod::Activate), &[meta, node, 2]);
    assert_eq!(host.native(f(NodeMethod::LookupElement), &[meta, node, 2]), cell);

    host.native(f(NodeMethod::Deactivate), &[meta, node, 2]);
    assert_eq!(host.native(f(NodeMethod::IsActive), &[meta, node, 2]), 0);
    assert_eq!(host.rt.node_gc(ptr), 1);
    assert_eq!(host.rt.node_gc(ptr), 0);
}

#[test]
fn bitmasked_bits_are_independent() {
    let mut tree = SNodeTree::new();
    let bm = tree.bitmasked(SNodeId::ROOT, &[128]);
    tree.place(bm, PrimitiveType::F32);
    let host = TestHost::new(&tree);
    let meta = host.meta(&tree, bm);
    let node = host.rt.root();
    let f = |m| node_fn(SNodeKind::Bitmasked, m);

    for i in [0u64, 63, 64, 127] {
        host.native(f(NodeMethod::Activate), &[meta, node, i]);
    }
    host.native(f(NodeMethod::Deactivate), &[meta, node, 63]);
    let active: Vec<u64> = (0..128)
        .filter(|&i| host.native(f(NodeMethod::IsActive), &[meta, node, i]) == 1)
        .collect();
    assert_eq!(active, vec![0, 64, 127]);
    assert_eq!(host.native(f(NodeMethod::GetNumElements), &[meta, node]), 128);
}

#[test]
fn dynamic_append_spans_chunks() {
    let mut tree = SNodeTree::new();
    let dy = tree.dynamic(SNodeId::ROOT, 64, 4);
    tree.place(dy, PrimitiveType::I32);
    let host = TestHost::new(&tree);
    let meta = host.meta(&tree, dy);
    let node = host.rt.root();
    let f = |m| node_fn(SNodeKind::Dynamic, m);

    for v in 0..10u64 {
        assert_eq!(host.native(f(NodeMethod::Append), &[meta, node, v * 10]), v);
    }
    assert_eq!(host.native(f(NodeMethod::GetNumElements), &[meta, node]), 10);
    let mem = host.rt.memory();
    for i in 0..10u64 {
        let cell = host.native(f(NodeMethod::LookupElement), &[meta, node, i]);
        assert_eq!(mem.load_i32(cell), i as i32 * 10);
    }
    assert_eq!(host.native(f(NodeMethod::IsActive), &[meta, node, 9]), 1);
    assert_eq!(host.native(f(NodeMethod::IsActive), &[meta, node, 10]), 0);

    host.native(f(NodeMethod::Deactivate), &[meta, node]);
    assert_eq!(host.native(f(NodeMethod::GetNumElements), &[meta, node]), 0);
    let cell = host.native(f(NodeMethod::LookupElement), &[meta, node, 5]);
    assert_eq!(mem.load_i32(cell), 0);
}

#[test]
fn refine_appends_local_bits_per_axis() {
    let mut tree = SNodeTree::new();
    let outer = tree.dense(SNodeId::ROOT, &[4, 2]);
    let inner = tree.dense(outer, &[8, 4]);
    tree.place(inner, PrimitiveType::I32);
    let host = TestHost::new(&tree);
    let mem = host.rt.memory();
    let input = mem.alloc(abi::coordinates::SIZE, 8);
    let output = mem.alloc(abi::coordinates::SIZE, 8);
    mem.store_i32(input, 3);
    mem.store_i32(input + 4, 1);
    // inner index 13 = (axis0 local 3) << 2 | (axis1 local 1)
    host.native(RuntimeFn::RefineCoordinates(inner), &[input, output, 13]);
    assert_eq!(mem.load_i32(output), (3 << 3) | 3);
    assert_eq!(mem.load_i32(output + 4), (1 << 2) | 1);
}

#[test]
fn from_parent_element_adds_child_offset() {
    let mut tree = SNodeTree::new();
    let d = tree.dense(SNodeId::ROOT, &[4]);
    let a = tree.place(d, PrimitiveType::I8);
    let b = tree.place(d, PrimitiveType::F64);
    let host = TestHost::new(&tree);
    assert_eq!(host.native(RuntimeFn::FromParentElement(a), &[1000]), 1000);
    assert_eq!(host.native(RuntimeFn::FromParentElement(b), &[1000]), 1008);
}
