//! Calls and symbol addresses for `IrBuilder`.

use smallvec::SmallVec;
use strata_rt::RuntimeFn;

use super::IrBuilder;
use crate::backend::ir::{Callee, Op, Ty};
use crate::backend::value_id::{FunctionId, ValueId};
use crate::codegen::runtime_decl;

impl IrBuilder {
    /// Call with an explicit return type. Operand types are checked when
    /// the module is linked.
    pub fn call(&mut self, callee: Callee, args: &[ValueId], ret: Ty) -> ValueId {
        let args: SmallVec<[ValueId; 4]> = args.iter().copied().collect();
        self.emit(ret, Op::Call { callee, args })
    }

    /// Direct call of a function in this module.
    pub fn call_function(&mut self, f: FunctionId, args: &[ValueId]) -> ValueId {
        let ret = self.module().function(f).ret;
        self.call(Callee::Function(f), args, ret)
    }

    /// Call a runtime entry point; the return type comes from its declaration.
    pub fn call_runtime(&mut self, f: RuntimeFn, args: &[ValueId]) -> ValueId {
        let ret = runtime_decl::signature(f).ret;
        self.call(Callee::Runtime(f), args, ret)
    }

    /// Call through a function pointer.
    pub fn call_indirect(&mut self, target: ValueId, args: &[ValueId], ret: Ty) -> ValueId {
        if self.ty(target) != Ty::Ptr {
            tracing::error!(ty = %self.ty(target), "indirect call through non-pointer");
            self.record_codegen_error();
        }
        self.call(Callee::Indirect(target), args, ret)
    }

    /// Address of a function in this module.
    pub fn func_addr(&mut self, f: FunctionId) -> ValueId {
        self.emit(Ty::Ptr, Op::FuncAddr(f))
    }

    /// Address of a runtime entry point.
    pub fn runtime_addr(&mut self, f: RuntimeFn) -> ValueId {
        self.emit(Ty::Ptr, Op::RuntimeAddr(f))
    }

    /// Address of a NUL-terminated copy of `s`.
    pub fn global_str(&mut self, s: &str) -> ValueId {
        self.emit(Ty::Ptr, Op::GlobalStr(s.to_owned()))
    }
}
