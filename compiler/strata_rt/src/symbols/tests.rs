use super::*;
use pretty_assertions::assert_eq;

#[test]
fn every_symbol_resolves_to_itself() {
    for f in RuntimeFn::all() {
        assert_eq!(RuntimeFn::from_symbol(&f.symbol()), Some(f), "{f}");
    }
}

#[test]
fn symbols_are_unique() {
    let all = RuntimeFn::all();
    let mut names: Vec<_> = all.iter().map(|f| f.symbol().into_owned()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), all.len());
}

#[test]
fn well_known_names() {
    assert_eq!(
        RuntimeFn::Math(MathFn::Pow, PrimitiveType::F64).symbol(),
        "pow_f64"
    );
    assert_eq!(
        RuntimeFn::Node(SNodeKind::Dense, NodeMethod::IsActive).symbol(),
        "Dense_is_active"
    );
    assert_eq!(
        RuntimeFn::VendorMath(MathFn::Exp, PrimitiveType::F32).symbol(),
        "__nv_expf"
    );
    assert_eq!(RuntimeFn::SetPartialBits(32).symbol(), "set_partial_bits_b32");
    assert_eq!(RuntimeFn::RuntimeGetRoot.symbol(), "LLVMRuntime_get_root");
}

#[test]
fn per_node_callbacks_parse() {
    assert_eq!(
        RuntimeFn::from_symbol("S12_refine_coordinates"),
        Some(RuntimeFn::RefineCoordinates(SNodeId::new(12)))
    );
    assert_eq!(
        RuntimeFn::from_symbol("S0_from_parent_element"),
        Some(RuntimeFn::FromParentElement(SNodeId::ROOT))
    );
    assert_eq!(RuntimeFn::from_symbol("S1_lookup_element"), None);
    assert_eq!(RuntimeFn::from_symbol("Sx_refine_coordinates"), None);
}

#[test]
fn unsupported_combinations_are_missing() {
    for name in [
        "pow_u8",
        "logic_not_f32",
        "BitStruct_activate",
        "Dense_deactivate",
        "Pointer_append",
        "floordiv_u32",
        "set_partial_bits_b24",
    ] {
        assert_eq!(RuntimeFn::from_symbol(name), None, "{name}");
    }
}
