use super::*;
use pretty_assertions::assert_eq;

fn cu(bits: u32) -> CustomIntType {
    CustomIntType::new(bits, false, PrimitiveType::U32)
}

#[test]
fn axis_bits_round_up_to_power_of_two() {
    assert_eq!(Axis::new(0, 1).bits, 0);
    assert_eq!(Axis::new(0, 8).bits, 3);
    assert_eq!(Axis::new(0, 5).bits, 3);
    assert!(!Axis::new(0, 5).is_pot());
}

#[test]
fn dense_layout_is_padded_to_power_of_two() {
    let mut tree = SNodeTree::new();
    let d = tree.dense(tree.root(), &[3, 4]);
    let x = tree.place(d, PrimitiveType::F32);
    let y = tree.place(d, PrimitiveType::I64);

    let dl = tree.layout(d);
    assert_eq!(dl.max_num_elements, 16);
    assert_eq!(dl.cell_size, 16);
    assert_eq!(dl.node_size, 256);
    assert_eq!(tree.layout(x).offset_in_parent, 0);
    assert_eq!(tree.layout(y).offset_in_parent, 8);
    assert_eq!(tree.layout(tree.root()).cell_size, 256);
}

#[test]
fn bitmasked_mask_follows_cells() {
    let mut tree = SNodeTree::new();
    let b = tree.bitmasked(tree.root(), &[100]);
    tree.place(b, PrimitiveType::I32);
    let l = tree.layout(b);
    assert_eq!(l.max_num_elements, 128);
    assert_eq!(l.bitmask_offset, 128 * 4);
    assert_eq!(l.node_size, 128 * 4 + 16);
}

#[test]
fn bit_struct_fields_get_consecutive_offsets() {
    let mut tree = SNodeTree::new();
    let d = tree.dense(tree.root(), &[4]);
    let bs = tree.bit_struct(d, PrimitiveType::U32);
    let a = tree.place(bs, cu(5));
    let b = tree.place(bs, cu(11));
    assert_eq!(tree[a].bit_offset, 0);
    assert_eq!(tree[b].bit_offset, 5);
    assert_eq!(tree.layout(bs).node_size, 4);
    assert_eq!(tree.layout(d).cell_size, 4);
}

#[test]
#[should_panic(expected = "overflow")]
fn bit_struct_overflow_rejected() {
    let mut tree = SNodeTree::new();
    let bs = tree.bit_struct(tree.root(), PrimitiveType::U32);
    tree.place(bs, cu(20));
    tree.place(bs, cu(13));
}

#[test]
fn shared_exponent_links_users() {
    let mut tree = SNodeTree::new();
    let bs = tree.bit_struct(tree.root(), PrimitiveType::U32);
    let exp = cu(8);
    let ft = CustomFloatType::with_exponent(cu(4), exp);
    let (e, users) = tree.place_shared_exponent(bs, exp, &[ft, ft, ft]);
    assert!(tree[e].owns_shared_exponent);
    assert_eq!(tree[e].exponent_users, users);
    for u in &users {
        assert_eq!(tree[*u].exp_snode, Some(e));
    }
    assert_eq!(tree[users[2]].bit_offset, 16);
}

#[test]
fn path_and_child_index() {
    let mut tree = SNodeTree::new();
    let p = tree.pointer(tree.root(), &[4]);
    let d = tree.dense(p, &[8]);
    let x = tree.place(d, PrimitiveType::I32);
    assert_eq!(tree.path_to(x), vec![SNodeId::ROOT, p, d, x]);
    assert_eq!(tree.child_index(p, d), Some(0));
    assert_eq!(tree.child_index(tree.root(), d), None);
}

#[test]
fn dynamic_and_bit_array_element_counts() {
    let mut tree = SNodeTree::new();
    let dy = tree.dynamic(tree.root(), 100, 16);
    tree.place(dy, PrimitiveType::I32);
    let d = tree.dense(tree.root(), &[2]);
    let ba = tree.bit_array(d, 8, PrimitiveType::U32);
    tree.place(ba, cu(4));
    assert_eq!(tree.max_num_elements(dy), 100);
    assert_eq!(tree.max_num_elements(ba), 8);
    assert_eq!(tree.layout(dy).node_size, 16);
}

#[test]
fn fields_of_bit_level_nodes_lay_out_at_the_word() {
    let mut tree = SNodeTree::new();
    let d = tree.dense(tree.root(), &[2]);
    let bs = tree.bit_struct(d, PrimitiveType::U32);
    let a = tree.place(bs, cu(5));
    let b = tree.place(bs, cu(7));
    let ba = tree.bit_array(d, 8, PrimitiveType::U32);
    let c = tree.place(ba, cu(4));

    for field in [a, b, c] {
        assert_eq!(tree.layout(field).offset_in_parent, 0);
    }
    assert_eq!(tree.layout(ba).offset_in_parent, 4);
    for node in tree.iter() {
        tree.layout(node.id);
    }
}
