//! ID-based instruction builder.
//!
//! `IrBuilder` owns the [`Module`] under construction and a cursor (current
//! function and block). Callers only ever hold `Copy` IDs.
//!
//! # Method Organization
//!
//! | Category | Methods |
//! |----------|---------|
//! | Constants | `const_int`, `const_i32`, `const_i64`, `const_f32`, `const_f64`, `const_bool`, `null` |
//! | Arithmetic | `binary`, `add`, `sub`, `mul`, `and`, `or`, `shl`, `lshr`, `ashr`, `unary` |
//! | Comparisons | `icmp`, `fcmp` |
//! | Conversions | `cast`, `int_cast`, `select`, `intrinsic` |
//! | Memory | `alloca`, `entry_alloca`, `load`, `store`, `ptr_add`, `ptr_offset`, `atomic_rmw` |
//! | Calls | `call`, `call_function`, `call_runtime`, `call_indirect`, `func_addr`, `runtime_addr`, `global_str` |
//! | Control flow | `br`, `cond_br`, `ret`, `ret_void`, `unreachable` |
//! | Blocks | `append_block`, `position_at_end`, `current_block`, `is_terminated` |
//! | Functions | `declare_function`, `param`, `entry_block` |
//!
//! Misuse (operand type mismatches, emitting after a terminator, emitting
//! without a cursor) does not panic: it is logged, counted in
//! [`IrBuilder::codegen_error_count`], and makes compilation fail.

mod arithmetic;
mod calls;
mod memory;

use std::cell::Cell;

use super::ir::{Inst, Module, Op, Ty};
use super::value_id::{BlockId, FunctionId, ValueId};

pub struct IrBuilder {
    module: Module,
    current_function: Option<FunctionId>,
    current_block: Option<BlockId>,
    /// Count of misuse errors during construction. When non-zero the module
    /// is malformed and must not be linked.
    codegen_errors: Cell<u32>,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        IrBuilder {
            module: Module::new(),
            current_function: None,
            current_block: None,
            codegen_errors: Cell::new(0),
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub(crate) fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    pub(crate) fn record_codegen_error(&self) {
        self.codegen_errors.set(self.codegen_errors.get() + 1);
    }

    pub fn codegen_error_count(&self) -> u32 {
        self.codegen_errors.get()
    }

    /// Type of a value.
    #[inline]
    pub fn ty(&self, v: ValueId) -> Ty {
        self.module.value_ty(v)
    }

    // -----------------------------------------------------------------------
    // Functions and blocks
    // -----------------------------------------------------------------------

    pub fn declare_function(&mut self, name: &str, params: &[Ty], ret: Ty) -> FunctionId {
        tracing::trace!(name, ?params, %ret, "declare function");
        self.module.add_function(name, params, ret)
    }

    /// Parameter `index` of `f`.
    pub fn param(&self, f: FunctionId, index: usize) -> ValueId {
        match self.module.function(f).params.get(index) {
            Some(&p) => p,
            None => {
                tracing::error!(?f, index, "parameter index out of range");
                self.record_codegen_error();
                ValueId::NONE
            }
        }
    }

    pub fn append_block(&mut self, f: FunctionId, name: &str) -> BlockId {
        self.module.add_block(f, name)
    }

    /// First block of `f`, if it has any.
    pub fn entry_block(&self, f: FunctionId) -> Option<BlockId> {
        self.module.function(f).blocks.first().copied()
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current_function = Some(self.module.block(block).func);
        self.current_block = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current_block
    }

    pub fn current_function(&self) -> Option<FunctionId> {
        self.current_function
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        self.current_block
            .is_some_and(|b| self.module.block(b).terminator().is_some())
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    fn result_for(&mut self, ty: Ty) -> ValueId {
        if ty == Ty::Void {
            ValueId::NONE
        } else {
            self.module.new_value(ty)
        }
    }

    /// Append an instruction at the cursor.
    pub(crate) fn emit(&mut self, ty: Ty, op: Op) -> ValueId {
        let result = self.result_for(ty);
        let Some(block) = self.current_block else {
            tracing::error!(?op, "instruction emitted without an insertion block");
            self.record_codegen_error();
            return result;
        };
        let data = self.module.block_mut(block);
        if data.terminator().is_some() {
            tracing::error!(?block, ?op, "instruction emitted after a terminator");
            self.codegen_errors.set(self.codegen_errors.get() + 1);
            return result;
        }
        data.insts.push(Inst { result, op });
        result
    }

    /// Emit into `block` without moving the cursor, before its terminator
    /// if it has one.
    pub(crate) fn emit_into(&mut self, block: BlockId, ty: Ty, op: Op) -> ValueId {
        let result = self.result_for(ty);
        let data = self.module.block_mut(block);
        let at = if data.terminator().is_some() {
            data.insts.len() - 1
        } else {
            data.insts.len()
        };
        data.insts.insert(at, Inst { result, op });
        result
    }

    // -----------------------------------------------------------------------
    // Constants
    // -----------------------------------------------------------------------

    /// Integer (or pointer) constant; `bits` is truncated to the width.
    pub fn const_int(&mut self, ty: Ty, bits: u64) -> ValueId {
        let masked = match ty.bits() {
            0 | 64 => bits,
            w => bits & ((1u64 << w) - 1),
        };
        self.emit(ty, Op::Const(masked))
    }

    #[inline]
    pub fn const_i32(&mut self, v: i32) -> ValueId {
        self.const_int(Ty::I32, u64::from(v as u32))
    }

    #[inline]
    pub fn const_i64(&mut self, v: i64) -> ValueId {
        self.const_int(Ty::I64, v as u64)
    }

    #[inline]
    pub fn const_bool(&mut self, v: bool) -> ValueId {
        self.const_int(Ty::I1, u64::from(v))
    }

    #[inline]
    pub fn const_f32(&mut self, v: f32) -> ValueId {
        self.emit(Ty::F32, Op::Const(u64::from(v.to_bits())))
    }

    #[inline]
    pub fn const_f64(&mut self, v: f64) -> ValueId {
        self.emit(Ty::F64, Op::Const(v.to_bits()))
    }

    /// Constant of a float type from an `f64` value.
    pub fn const_float(&mut self, ty: Ty, v: f64) -> ValueId {
        match ty {
            Ty::F32 => self.const_f32(v as f32),
            _ => self.const_f64(v),
        }
    }

    #[inline]
    pub fn null(&mut self) -> ValueId {
        self.emit(Ty::Ptr, Op::Const(0))
    }

    // -----------------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------------

    pub fn br(&mut self, target: BlockId) {
        self.emit(Ty::Void, Op::Br(target));
    }

    /// Conditional branch on an `i1`.
    pub fn cond_br(&mut self, cond: ValueId, then: BlockId, otherwise: BlockId) {
        if self.ty(cond) != Ty::I1 {
            tracing::error!(ty = %self.ty(cond), "cond_br on non-i1 condition");
            self.record_codegen_error();
        }
        self.emit(Ty::Void, Op::CondBr(cond, then, otherwise));
    }

    pub fn ret(&mut self, value: ValueId) {
        self.emit(Ty::Void, Op::Ret(Some(value)));
    }

    pub fn ret_void(&mut self) {
        self.emit(Ty::Void, Op::Ret(None));
    }

    pub fn unreachable(&mut self) {
        self.emit(Ty::Void, Op::Unreachable);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
