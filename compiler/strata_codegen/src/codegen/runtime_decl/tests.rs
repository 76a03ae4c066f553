use strata_ir::{PrimitiveType, SNodeKind};
use strata_rt::MathFn;

use super::*;

#[test]
fn every_runtime_symbol_has_a_signature() {
    for f in RuntimeFn::all() {
        let sig = signature(f);
        assert!(sig.params.iter().all(|&t| t != Ty::Void), "{f}");
    }
}

#[test]
fn binary_math_takes_two_operands() {
    let sig = signature(RuntimeFn::Math(MathFn::Pow, PrimitiveType::F64));
    assert_eq!(sig.params.as_slice(), &[Ty::F64, Ty::F64]);
    assert_eq!(sig.ret, Ty::F64);
    let sig = signature(RuntimeFn::VendorMath(MathFn::Sin, PrimitiveType::F32));
    assert_eq!(sig.params.as_slice(), &[Ty::F32]);
}

#[test]
fn variadic_printf_accepts_extra_arguments() {
    check_call(RuntimeFn::HostPrintf, &[Ty::Ptr, Ty::I32, Ty::F64], Ty::I32).unwrap();
    assert!(check_call(RuntimeFn::HostPrintf, &[], Ty::I32).is_err());
}

#[test]
fn mismatched_operands_are_rejected() {
    let f = RuntimeFn::Node(SNodeKind::Dense, NodeMethod::LookupElement);
    check_call(f, &[Ty::Ptr, Ty::Ptr, Ty::I32], Ty::Ptr).unwrap();
    let err = check_call(f, &[Ty::Ptr, Ty::Ptr, Ty::I64], Ty::Ptr).unwrap_err();
    match err {
        CodegenError::SignatureMismatch { callee, detail } => {
            assert_eq!(callee, "Dense_lookup_element");
            assert!(detail.contains("i64"), "{detail}");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn unknown_names_do_not_resolve() {
    assert_eq!(resolve("pow_f32").unwrap(), RuntimeFn::Math(MathFn::Pow, PrimitiveType::F32));
    assert_eq!(
        resolve("BitArray_lookup_element"),
        Err(CodegenError::MissingRuntimeSymbol("BitArray_lookup_element".into()))
    );
}

#[test]
fn partial_bit_helpers_use_the_physical_width() {
    let sig = signature(RuntimeFn::AtomicAddPartialBits(16));
    assert_eq!(sig.params.as_slice(), &[Ty::Ptr, Ty::I32, Ty::I32, Ty::I16]);
    assert_eq!(sig.ret, Ty::I16);
}
