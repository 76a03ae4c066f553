use super::*;
use crate::symbols::{NodeMethod, RuntimeFn};
use crate::testing::TestHost;
use pretty_assertions::assert_eq;

#[test]
fn root_list_holds_one_element() {
    let tree = SNodeTree::new();
    let rt = Runtime::new(&tree, RuntimeConfig::default().with_memory_bytes(1 << 20));
    assert_eq!(rt.list_len(SNodeId::ROOT), 1);
    let header = rt.header();
    assert_eq!(rt.memory().load_u64(header + abi::runtime::ROOT), rt.root());
}

#[test]
fn context_layout() {
    let tree = SNodeTree::new();
    let rt = Runtime::new(&tree, RuntimeConfig::default().with_memory_bytes(1 << 20));
    let ctx = rt.create_context(&[11, 22]).unwrap();
    let mem = rt.memory();
    assert_eq!(mem.load_u64(ctx + abi::context::ARGS + 8), 22);
    assert_eq!(mem.load_u64(ctx + abi::context::RUNTIME), rt.header());
    rt.set_extra_arg(ctx, 1, 2, 640).unwrap();
    assert_eq!(
        mem.load_i32(ctx + abi::context::EXTRA_ARGS + (8 + 2) * 4),
        640
    );
    assert!(rt.create_context(&[0; 9]).is_err());
    assert!(rt.set_extra_arg(ctx, 8, 0, 1).is_err());
}

#[test]
fn host_access_through_dense_levels() {
    let mut tree = SNodeTree::new();
    let outer = tree.dense(SNodeId::ROOT, &[4]);
    let inner = tree.dense(outer, &[8]);
    let x = tree.place(inner, PrimitiveType::I32);
    let y = tree.place(inner, PrimitiveType::F64);
    let rt = Runtime::new(&tree, RuntimeConfig::default().with_memory_bytes(1 << 20));

    assert!(rt.write_i32(x, &[27], -5));
    assert!(rt.write_f64(y, &[27], 2.5));
    assert_eq!(rt.read_i32(x, &[27]), -5);
    assert_eq!(rt.read_f64(y, &[27]), 2.5);
    assert_eq!(rt.read_i32(x, &[26]), 0);

    // Coordinate 27 = outer 3, inner 3; cells of `inner` are 16 bytes.
    let inner_layout = rt.layout(inner);
    let expected = rt.root() + 3 * rt.layout(outer).cell_size + 3 * inner_layout.cell_size;
    assert_eq!(rt.place_address(x, &[27]), Some(expected));
}

#[test]
fn host_access_skips_inactive_cells() {
    let mut tree = SNodeTree::new();
    let bm = tree.bitmasked(SNodeId::ROOT, &[8]);
    let x = tree.place(bm, PrimitiveType::F32);
    let host = TestHost::new(&tree);
    assert!(!host.rt.write_f32(x, &[5], 1.0));
    let meta = host.meta(&tree, bm);
    host.native(
        RuntimeFn::Node(SNodeKind::Bitmasked, NodeMethod::Activate),
        &[meta, host.rt.root(), 5],
    );
    assert!(host.rt.write_f32(x, &[5], 1.0));
    assert_eq!(host.rt.read_f32(x, &[5]), 1.0);
}

/// Listgen for a bitmasked leaf under a dense node, then a struct-for over
/// the leaf's list with a body that records visited active coordinates.
#[test]
fn listgen_and_struct_for_visit_active_cells_once() {
    let mut tree = SNodeTree::new();
    let block = tree.dense(SNodeId::ROOT, &[2]);
    let leaf = tree.bitmasked(block, &[4]);
    tree.place(leaf, PrimitiveType::I32);

    let visited = std::sync::Arc::new(Mutex::new(Vec::new()));
    let mut host = TestHost::new(&tree);
    let sink = std::sync::Arc::clone(&visited);
    let leaf_id = leaf;
    let body = host.func(move |h, args, _| {
        let rt = &h.rt;
        let mem = rt.memory();
        let (element, lower, upper) = (args[2], args[3] as i32, args[4] as i32);
        let node = mem.load_u64(element + abi::element::ELEMENT);
        let layout = rt.layout(leaf_id);
        for i in lower..upper {
            if crate::nodes::bitmask_get(rt, node, layout.bitmask_offset, i as u64) {
                let parent = mem.load_i32(element + abi::element::PCOORD);
                sink.lock().push((parent << 2) | i);
            }
        }
        0
    });

    let root_meta = host.meta(&tree, SNodeId::ROOT);
    let block_meta = host.meta(&tree, block);
    let leaf_meta = host.meta(&tree, leaf);
    let rt_ptr = host.rt.header();
    host.native(RuntimeFn::ElementListgenRoot, &[rt_ptr, root_meta, block_meta]);
    assert_eq!(host.rt.list_len(block), 1);

    // Activate coordinates 1, 4 and 6 before generating the leaf list.
    let activate = RuntimeFn::Node(SNodeKind::Bitmasked, NodeMethod::Activate);
    let block_cell = host.rt.layout(block).cell_size;
    for c in [1u64, 4, 6] {
        let node = host.rt.root() + (c >> 2) * block_cell;
        host.native(activate, &[leaf_meta, node, c & 3]);
    }
    host.native(RuntimeFn::ElementListgenNonroot, &[rt_ptr, block_meta, leaf_meta]);
    assert_eq!(host.rt.list_len(leaf), 2);

    let ctx = host.rt.create_context(&[]).unwrap();
    host.native(
        RuntimeFn::ParallelStructFor,
        &[ctx, u64::from(leaf.raw()), 4, 2, body, 0, 3],
    );
    let mut seen = visited.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 4, 6]);

    host.native(RuntimeFn::ClearList, &[rt_ptr, u64::from(leaf.raw())]);
    assert_eq!(host.rt.list_len(leaf), 0);
}

#[test]
fn listgen_splits_long_ranges() {
    let mut tree = SNodeTree::new();
    let d = tree.dense(SNodeId::ROOT, &[100]);
    tree.place(d, PrimitiveType::I32);
    let mut host = TestHost::new(&tree);
    host.rt = Runtime::new(
        &tree,
        RuntimeConfig::default()
            .with_memory_bytes(1 << 20)
            .with_listgen_max_element_size(32),
    );
    let root_meta = host.meta(&tree, SNodeId::ROOT);
    let d_meta = host.meta(&tree, d);
    host.native(RuntimeFn::ElementListgenRoot, &[host.rt.header(), root_meta, d_meta]);
    // 128 addressable cells in chunks of 32.
    assert_eq!(host.rt.list_len(d), 4);
}
