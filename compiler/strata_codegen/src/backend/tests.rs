use pretty_assertions::assert_eq;
use strata_ir::SNodeTree;
use strata_rt::{Lane, Runtime, RuntimeConfig, RuntimeFn};

use super::*;
use crate::error::CodegenError;

fn runtime() -> Runtime {
    Runtime::new(&SNodeTree::new(), RuntimeConfig::default().with_memory_bytes(1 << 20))
}

/// `fn sum_below(n: i32) -> i32 { let mut s = 0; for i in 0..n { s += i }; s }`
fn build_sum_below(b: &mut IrBuilder) -> FunctionId {
    let f = b.declare_function("sum_below", &[Ty::I32], Ty::I32);
    let entry = b.append_block(f, "entry");
    let head = b.append_block(f, "head");
    let body = b.append_block(f, "body");
    let exit = b.append_block(f, "exit");
    b.position_at_end(entry);
    let i = b.alloca(Ty::I32, 1, 4);
    let s = b.alloca(Ty::I32, 1, 4);
    let zero = b.const_i32(0);
    b.store(zero, i);
    b.store(zero, s);
    b.br(head);

    b.position_at_end(head);
    let iv = b.load(Ty::I32, i);
    let n = b.param(f, 0);
    let more = b.icmp(IntPredicate::Slt, iv, n);
    b.cond_br(more, body, exit);

    b.position_at_end(body);
    let sv = b.load(Ty::I32, s);
    let iv = b.load(Ty::I32, i);
    let next_s = b.add(sv, iv);
    b.store(next_s, s);
    let one = b.const_i32(1);
    let next_i = b.add(iv, one);
    b.store(next_i, i);
    b.br(head);

    b.position_at_end(exit);
    let sv = b.load(Ty::I32, s);
    b.ret(sv);
    f
}

#[test]
fn loop_executes() {
    let mut b = IrBuilder::new();
    build_sum_below(&mut b);
    assert_eq!(b.codegen_error_count(), 0);
    let module = b.into_module();
    module.verify().unwrap();
    let program = link(&module).unwrap();
    let rt = runtime();
    let machine = Machine::new(&rt, &program);
    let index = program.function_index("sum_below").unwrap();
    assert_eq!(machine.run(index, &[10], &Lane::SERIAL), 45);
    assert_eq!(machine.run(index, &[0], &Lane::SERIAL), 0);
}

#[test]
fn negative_results_stay_in_width() {
    let mut b = IrBuilder::new();
    let f = b.declare_function("neg", &[Ty::I32], Ty::I32);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    let x = b.param(f, 0);
    let y = b.unary(UnOp::Neg, x);
    b.ret(y);
    let program = link(&b.into_module()).unwrap();
    let rt = runtime();
    let machine = Machine::new(&rt, &program);
    let out = machine.run(0, &[5], &Lane::SERIAL);
    assert_eq!(out, u64::from((-5i32) as u32));
}

#[test]
fn indirect_call_through_function_address() {
    let mut b = IrBuilder::new();
    let callee = b.declare_function("twice", &[Ty::I64], Ty::I64);
    let entry = b.append_block(callee, "entry");
    b.position_at_end(entry);
    let x = b.param(callee, 0);
    let y = b.add(x, x);
    b.ret(y);

    let caller = b.declare_function("caller", &[Ty::I64], Ty::I64);
    let entry = b.append_block(caller, "entry");
    b.position_at_end(entry);
    let target = b.func_addr(callee);
    let x = b.param(caller, 0);
    let r = b.call_indirect(target, &[x], Ty::I64);
    b.ret(r);

    let module = b.into_module();
    module.verify().unwrap();
    let program = link(&module).unwrap();
    let rt = runtime();
    let machine = Machine::new(&rt, &program);
    let index = program.function_index("caller").unwrap();
    assert_eq!(machine.run(index, &[21], &Lane::SERIAL), 42);
}

#[test]
fn unterminated_block_fails_verification() {
    let mut b = IrBuilder::new();
    let f = b.declare_function("open", &[], Ty::Void);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    b.const_i32(1);
    let err = b.into_module().verify().unwrap_err();
    assert!(matches!(err, CodegenError::Verify(ref m) if m.contains("not terminated")), "{err}");
}

#[test]
fn emitting_after_terminator_is_counted() {
    let mut b = IrBuilder::new();
    let f = b.declare_function("f", &[], Ty::Void);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    b.ret_void();
    b.const_i32(3);
    assert_eq!(b.codegen_error_count(), 1);
}

#[test]
fn unreachable_functions_are_dropped_before_linking() {
    let mut b = IrBuilder::new();
    build_sum_below(&mut b);
    let unused = b.declare_function("unused", &[], Ty::Void);
    let entry = b.append_block(unused, "entry");
    b.position_at_end(entry);
    b.ret_void();

    let mut module = b.into_module();
    let root = module.function_by_name("sum_below").unwrap();
    assert_eq!(module.retain_reachable(&[root]), 1);
    let program = link(&module).unwrap();
    assert_eq!(program.function_names().collect::<Vec<_>>(), vec!["sum_below"]);
}

#[test]
fn runtime_call_with_wrong_operands_is_rejected() {
    let mut b = IrBuilder::new();
    let f = b.declare_function("bad", &[Ty::I32], Ty::Void);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    let x = b.param(f, 0);
    // runtime_get_root takes a pointer
    b.call_runtime(RuntimeFn::RuntimeGetRoot, &[x]);
    b.ret_void();
    let err = link(&b.into_module()).unwrap_err();
    assert!(matches!(err, CodegenError::SignatureMismatch { .. }), "{err}");
}

#[test]
fn grid_launch_runs_every_lane() {
    let mut b = IrBuilder::new();
    let f = b.declare_function("count", &[Ty::Ptr], Ty::Void);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    let tid = b.intrinsic(Intrinsic::ThreadIdx, &[]);
    let bid = b.intrinsic(Intrinsic::BlockIdx, &[]);
    let dim = b.intrinsic(Intrinsic::BlockDim, &[]);
    let base = b.mul(bid, dim);
    let linear = b.add(base, tid);
    let wide = b.int_cast(linear, Ty::I64, false);
    let out = b.param(f, 0);
    b.atomic_rmw(RmwOp::Add, out, wide);
    b.ret_void();

    let program = link(&b.into_module()).unwrap();
    let rt = runtime();
    let cell = rt.memory().alloc(8, 8);
    let machine = Machine::new(&rt, &program);
    machine.launch(
        0,
        &[cell],
        LaunchShape {
            grid_dim: 3,
            block_dim: 4,
            bls_size: 16,
        },
    );
    // 0 + 1 + ... + 11
    assert_eq!(rt.memory().load_u64(cell), 66);
}

#[test]
fn strings_are_materialized_in_device_memory() {
    let mut b = IrBuilder::new();
    let f = b.declare_function("greet", &[], Ty::Ptr);
    let entry = b.append_block(f, "entry");
    b.position_at_end(entry);
    let s = b.global_str("hello");
    b.ret(s);
    let program = link(&b.into_module()).unwrap();
    let rt = runtime();
    let machine = Machine::new(&rt, &program);
    let addr = machine.run(0, &[], &Lane::SERIAL);
    assert_eq!(rt.memory().read_c_str(addr), "hello");
}

#[test]
fn printed_module_names_functions_and_blocks() {
    let mut b = IrBuilder::new();
    build_sum_below(&mut b);
    let text = b.module().print();
    assert!(text.starts_with("define i32 @sum_below(i32 %0)"), "{text}");
    assert!(text.contains("head."));
    assert!(text.contains("icmp slt"));
}
