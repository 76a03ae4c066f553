//! Memory operations (alloca, load, store, pointer arithmetic, atomics).

use super::IrBuilder;
use crate::backend::ir::{Op, RmwOp, Ty};
use crate::backend::value_id::{FunctionId, ValueId};

impl IrBuilder {
    /// Stack slot of `count` elements of `ty` at the cursor.
    pub fn alloca(&mut self, ty: Ty, count: u32, align: u32) -> ValueId {
        self.emit(Ty::Ptr, Op::Alloca { ty, count, align })
    }

    /// Stack slot in the entry block of `function`, leaving the cursor alone.
    ///
    /// Slots must dominate every use; lowering discovers them while emitting
    /// the body, so they are hoisted here.
    pub fn entry_alloca(&mut self, function: FunctionId, ty: Ty, count: u32, align: u32) -> ValueId {
        match self.entry_block(function) {
            Some(entry) => self.emit_into(entry, Ty::Ptr, Op::Alloca { ty, count, align }),
            None => {
                tracing::error!(?function, "entry alloca in a function without blocks");
                self.record_codegen_error();
                ValueId::NONE
            }
        }
    }

    /// Load a value of type `ty`.
    pub fn load(&mut self, ty: Ty, ptr: ValueId) -> ValueId {
        if self.ty(ptr) != Ty::Ptr {
            tracing::error!(ty = %self.ty(ptr), "load from non-pointer");
            self.record_codegen_error();
        }
        self.emit(ty, Op::Load(ptr))
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) {
        if self.ty(ptr) != Ty::Ptr || self.ty(value) == Ty::Void {
            tracing::error!(ptr = %self.ty(ptr), value = %self.ty(value), "invalid store");
            self.record_codegen_error();
        }
        self.emit(Ty::Void, Op::Store { ptr, value });
    }

    /// `ptr + offset` bytes; the offset is an `i32` or `i64` value.
    pub fn ptr_add(&mut self, ptr: ValueId, offset: ValueId) -> ValueId {
        let offset = match self.ty(offset) {
            Ty::I64 => offset,
            ty if ty.is_int() => self.int_cast(offset, Ty::I64, true),
            ty => {
                tracing::error!(%ty, "pointer offset is not an integer");
                self.record_codegen_error();
                offset
            }
        };
        if self.ty(ptr) != Ty::Ptr {
            tracing::error!(ty = %self.ty(ptr), "pointer add on non-pointer");
            self.record_codegen_error();
        }
        self.emit(Ty::Ptr, Op::PtrAdd(ptr, offset))
    }

    /// `ptr + bytes` for a constant byte count.
    pub fn ptr_offset(&mut self, ptr: ValueId, bytes: u64) -> ValueId {
        if bytes == 0 {
            return ptr;
        }
        let offset = self.const_int(Ty::I64, bytes);
        self.ptr_add(ptr, offset)
    }

    /// Atomic read-modify-write; yields the previous value.
    pub fn atomic_rmw(&mut self, op: RmwOp, ptr: ValueId, value: ValueId) -> ValueId {
        let ty = self.ty(value);
        let ok = match op {
            RmwOp::FAdd => ty.is_float(),
            RmwOp::Xchg => ty != Ty::Void,
            _ => ty.is_int(),
        };
        if !ok || self.ty(ptr) != Ty::Ptr {
            tracing::error!(op = op.name(), %ty, "invalid atomic operand");
            self.record_codegen_error();
        }
        self.emit(ty, Op::AtomicRmw(op, ptr, value))
    }
}
