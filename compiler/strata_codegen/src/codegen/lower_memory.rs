//! Memory statements: locals, global fields, atomics, external arrays,
//! scratch buffers and the autodiff stack.
//!
//! Global accesses split on the lowered pointer. A byte pointer is read and
//! written directly in the machine type. A bit pointer goes through the
//! custom type codec, and stores to floats sharing an exponent rewrite the
//! whole exponent group of their `bit_struct` word.

use rustc_hash::FxHashSet;
use strata_ir::{
    AtomicOpType, CustomFloatType, DataType, PrimitiveType, SNodeId, SNodeTree, StmtId, StmtKind,
};
use strata_rt::{abi, RuntimeFn};

use super::codec::{
    atomic_add_custom_int, custom_bits, encode_shared_digits, extract_custom_int, float_to_custom_int,
    fp_cast, load_custom_int, load_float_with_exponent, reconstruct_custom_float,
    reconstruct_float_with_exponent, shared_exponent, shared_exponent_to_store, store_custom_int,
    store_float_with_exponent,
};
use super::runtime_decl;
use super::{machine_ty, BitPtr, KernelCodegen, Lowered};
use crate::backend::{BinOp, Intrinsic, IrBuilder, RmwOp, Ty, UnOp, ValueId};
use crate::error::{CodegenError, CodegenResult};

fn zero_of(b: &mut IrBuilder, ty: Ty) -> ValueId {
    match ty {
        Ty::F32 | Ty::F64 => b.const_float(ty, 0.0),
        Ty::Ptr => b.null(),
        _ => b.const_int(ty, 0),
    }
}

impl KernelCodegen<'_> {
    // -- Locals --

    /// Zero-initialised slot in the entry block.
    pub(super) fn lower_alloca(&mut self, ptr_ty: &DataType) -> CodegenResult<ValueId> {
        let ty = ptr_ty.pointee().map_or(Ty::Void, machine_ty);
        if ty == Ty::Void {
            return Err(CodegenError::unsupported(format!("local variable of type {ptr_ty}")));
        }
        self.in_entry(|b| {
            let slot = b.alloca(ty, 1, ty.bytes() as u32);
            let zero = zero_of(b, ty);
            b.store(zero, slot);
            slot
        })
    }

    pub(super) fn lower_local_load(&mut self, ptr: StmtId, ty: &DataType) -> CodegenResult<ValueId> {
        let ptr = self.value(ptr)?;
        Ok(self.builder.load(machine_ty(ty), ptr))
    }

    pub(super) fn lower_local_store(&mut self, ptr: StmtId, value: StmtId) -> CodegenResult<()> {
        let ptr = self.value(ptr)?;
        let value = self.value(value)?;
        self.builder.store(value, ptr);
        Ok(())
    }

    // -- Global fields --

    /// The `bit_struct` and field a bit pointer statement addresses.
    fn bit_field_of(&self, ptr: StmtId) -> CodegenResult<(SNodeId, SNodeId)> {
        match &self.stmt(ptr).kind {
            StmtKind::GetCh {
                input_snode, chid, ..
            } => self.tree[*input_snode]
                .children
                .get(*chid)
                .map(|&field| (*input_snode, field))
                .ok_or_else(|| {
                    CodegenError::invariant(format!("{input_snode} has no child {chid}"))
                }),
            other => Err(CodegenError::invariant(format!(
                "bit pointer {ptr:?} does not come from a child access: {other:?}"
            ))),
        }
    }

    pub(super) fn lower_global_load(&mut self, ptr: StmtId, ty: &DataType) -> CodegenResult<ValueId> {
        let pointee = self.ret_type(ptr).pointee().cloned().unwrap_or(DataType::Void);
        let p = match self.lowered(ptr)? {
            Lowered::Value(p) => {
                if pointee.is_custom() {
                    return Err(CodegenError::invariant(format!(
                        "custom type {pointee} behind a byte pointer"
                    )));
                }
                return Ok(self.builder.load(machine_ty(ty), p));
            }
            Lowered::BitPtr(p) => p,
        };
        match pointee {
            DataType::CustomInt(cit) => Ok(load_custom_int(&mut self.builder, p, cit)),
            DataType::CustomFloat(cft) if cft.exponent_type().is_none() => {
                let b = &mut self.builder;
                let digits = load_custom_int(b, p, cft.digits_type());
                let real = reconstruct_custom_float(b, digits, cft);
                Ok(fp_cast(b, real, machine_ty(ty)))
            }
            DataType::CustomFloat(cft) => {
                let tree = self.tree;
                let (_, field) = self.bit_field_of(ptr)?;
                let exp = exponent_field(tree, field)?;
                let exponent_ptr = p.offset_by(
                    &mut self.builder,
                    tree[exp].bit_offset as i32 - tree[field].bit_offset as i32,
                );
                let b = &mut self.builder;
                let f = load_float_with_exponent(b, p, exponent_ptr, cft, tree[exp].owns_shared_exponent);
                Ok(fp_cast(b, f, machine_ty(ty)))
            }
            other => Err(CodegenError::invariant(format!(
                "bit pointer to non-custom type {other}"
            ))),
        }
    }

    pub(super) fn lower_global_store(&mut self, ptr: StmtId, value: StmtId) -> CodegenResult<()> {
        let pointee = self.ret_type(ptr).pointee().cloned().unwrap_or(DataType::Void);
        let v = self.value(value)?;
        let p = match self.lowered(ptr)? {
            Lowered::Value(p) => {
                if pointee.is_custom() {
                    return Err(CodegenError::invariant(format!(
                        "custom type {pointee} behind a byte pointer"
                    )));
                }
                self.builder.store(v, p);
                return Ok(());
            }
            Lowered::BitPtr(p) => p,
        };
        match pointee {
            DataType::CustomInt(cit) => store_custom_int(&mut self.builder, p, cit, v),
            DataType::CustomFloat(cft) if cft.exponent_type().is_none() => {
                let b = &mut self.builder;
                let digits = float_to_custom_int(b, cft, v);
                store_custom_int(b, p, cft.digits_type(), digits);
            }
            DataType::CustomFloat(cft) => {
                let tree = self.tree;
                let (bit_struct, field) = self.bit_field_of(ptr)?;
                let exp = exponent_field(tree, field)?;
                if tree[exp].owns_shared_exponent {
                    let chid = tree
                        .child_index(bit_struct, field)
                        .ok_or_else(|| CodegenError::invariant(format!("{field} not under {bit_struct}")))?;
                    return self.store_bit_struct(p.byte_ptr, bit_struct, &[(chid, v)]);
                }
                let exponent_ptr = p.offset_by(
                    &mut self.builder,
                    tree[exp].bit_offset as i32 - tree[field].bit_offset as i32,
                );
                store_float_with_exponent(&mut self.builder, p, exponent_ptr, cft, v);
            }
            other => {
                return Err(CodegenError::invariant(format!(
                    "bit pointer to non-custom type {other}"
                )))
            }
        }
        Ok(())
    }

    pub(super) fn lower_bit_struct_store(
        &mut self,
        ptr: StmtId,
        bit_struct: SNodeId,
        ch_ids: &[usize],
        values: &[StmtId],
    ) -> CodegenResult<()> {
        if ch_ids.len() != values.len() {
            return Err(CodegenError::invariant(format!(
                "bit_struct store of {} fields with {} values",
                ch_ids.len(),
                values.len()
            )));
        }
        let word = self.value(ptr)?;
        let fields = ch_ids
            .iter()
            .zip(values)
            .map(|(&chid, &v)| Ok((chid, self.value(v)?)))
            .collect::<CodegenResult<Vec<_>>>()?;
        self.store_bit_struct(word, bit_struct, &fields)
    }

    /// Store `fields` (`(child index, value)`) of the `bit_struct` word at
    /// `word`.
    fn store_bit_struct(
        &mut self,
        word: ValueId,
        bit_struct: SNodeId,
        fields: &[(usize, ValueId)],
    ) -> CodegenResult<()> {
        let tree = self.tree;
        let node = &tree[bit_struct];
        let word_ty = Ty::of_primitive(node.physical.unwrap_or(PrimitiveType::U32));
        let mut targets = Vec::with_capacity(fields.len());
        for &(chid, value) in fields {
            let field = node.children.get(chid).copied().ok_or_else(|| {
                CodegenError::invariant(format!("{bit_struct} has no child {chid}"))
            })?;
            targets.push((field, value));
        }

        let writes_every_field = {
            let written: FxHashSet<SNodeId> = targets.iter().map(|&(f, _)| f).collect();
            written.len() == node.children.len()
        };
        let exponent_free = node
            .children
            .iter()
            .all(|&c| tree[c].exp_snode.is_none() && tree[c].exponent_users.is_empty());

        if writes_every_field && exponent_free {
            let b = &mut self.builder;
            let mut packed = b.const_int(word_ty, 0);
            for &(field, value) in &targets {
                let bits = match &tree[field].dt {
                    DataType::CustomInt(cit) => custom_bits(b, value, *cit, None, word_ty),
                    DataType::CustomFloat(cft) => {
                        custom_bits(b, value, cft.digits_type(), Some(*cft), word_ty)
                    }
                    other => {
                        return Err(CodegenError::invariant(format!(
                            "bit_struct field of type {other}"
                        )))
                    }
                };
                let shift = b.const_int(word_ty, u64::from(tree[field].bit_offset));
                let shifted = b.shl(bits, shift);
                packed = b.or(packed, shifted);
            }
            b.store(packed, word);
            return Ok(());
        }

        // Shared exponent groups touched by this store, in first-use order.
        let mut groups: Vec<SNodeId> = Vec::new();
        for &(field, _) in &targets {
            if let Some(exp) = tree[field].exp_snode {
                if tree[exp].owns_shared_exponent && !groups.contains(&exp) {
                    groups.push(exp);
                }
            }
        }
        // Members not written here are re-encoded from the word as it was
        // before the store.
        let mut snapshot: Option<ValueId> = None;
        for &exp in &groups {
            let DataType::CustomInt(exp_cit) = tree[exp].dt else {
                return Err(CodegenError::invariant(format!("exponent field {exp} is not a custom int")));
            };
            let users = &tree[exp].exponent_users;
            let b = &mut self.builder;
            let snapshot = *snapshot.get_or_insert_with(|| b.load(word_ty, word));
            let mut floats = Vec::with_capacity(users.len());
            let mut types = Vec::with_capacity(users.len());
            for &user in users {
                let cft = custom_float_of(tree, user)?;
                let f = match targets.iter().find(|&&(f, _)| f == user) {
                    Some(&(_, v)) => v,
                    None => {
                        let digit_offset = b.const_i32(tree[user].bit_offset as i32);
                        let digits = extract_custom_int(b, snapshot, digit_offset, cft.digits_type());
                        let exp_offset = b.const_i32(tree[exp].bit_offset as i32);
                        let exponent = extract_custom_int(b, snapshot, exp_offset, exp_cit);
                        reconstruct_float_with_exponent(b, digits, exponent, cft, true)
                    }
                };
                floats.push(f);
                types.push((user, cft));
            }
            let (Some(max), Some(&(_, first))) = (shared_exponent(b, &floats), types.first()) else {
                continue;
            };
            let stored = shared_exponent_to_store(b, max, first);
            let exp_ptr = BitPtr::at(b, word, tree[exp].bit_offset);
            store_custom_int(b, exp_ptr, exp_cit, stored);
            for (&f, &(user, cft)) in floats.iter().zip(&types) {
                let digits = encode_shared_digits(b, f, max, cft);
                let ptr = BitPtr::at(b, word, tree[user].bit_offset);
                store_custom_int(b, ptr, cft.digits_type(), digits);
            }
        }

        for &(field, value) in &targets {
            let in_group = tree[field].exp_snode.is_some_and(|e| groups.contains(&e));
            if in_group {
                continue;
            }
            let b = &mut self.builder;
            let ptr = BitPtr::at(b, word, tree[field].bit_offset);
            match &tree[field].dt {
                DataType::CustomInt(cit) => store_custom_int(b, ptr, *cit, value),
                DataType::CustomFloat(cft) => match tree[field].exp_snode {
                    Some(exp) => {
                        let exp_ptr = BitPtr::at(b, word, tree[exp].bit_offset);
                        store_float_with_exponent(b, ptr, exp_ptr, *cft, value);
                    }
                    None => {
                        let digits = float_to_custom_int(b, *cft, value);
                        store_custom_int(b, ptr, cft.digits_type(), digits);
                    }
                },
                other => {
                    return Err(CodegenError::invariant(format!(
                        "bit_struct field of type {other}"
                    )))
                }
            }
        }
        Ok(())
    }

    // -- Atomics --

    /// Atomic update of `dest`; yields the previous value.
    pub(super) fn lower_atomic(
        &mut self,
        op: AtomicOpType,
        dest: StmtId,
        value: StmtId,
    ) -> CodegenResult<ValueId> {
        let pointee = self.ret_type(dest).pointee().cloned().unwrap_or(DataType::Void);
        let value_ty = self.ret_type(value);
        let v = self.value(value)?;
        match self.lowered(dest)? {
            Lowered::BitPtr(p) => self.atomic_custom(op, p, &pointee, v, value_ty),
            Lowered::Value(p) => {
                let Some(prim) = pointee.primitive() else {
                    return Err(CodegenError::unsupported(format!(
                        "{} on {pointee} behind a byte pointer",
                        op.name()
                    )));
                };
                self.atomic_primitive(op, p, prim, v)
            }
        }
    }

    fn atomic_custom(
        &mut self,
        op: AtomicOpType,
        p: BitPtr,
        pointee: &DataType,
        v: ValueId,
        value_ty: &DataType,
    ) -> CodegenResult<ValueId> {
        let negate = match op {
            AtomicOpType::Add => false,
            AtomicOpType::Sub => true,
            _ => return Err(CodegenError::unsupported(format!("{} on {pointee}", op.name()))),
        };
        let result_ty = machine_ty(value_ty);
        let b = &mut self.builder;
        match *pointee {
            DataType::CustomInt(cit) => {
                let v = if negate { b.unary(UnOp::Neg, v) } else { v };
                let old = atomic_add_custom_int(b, p, cit, v, value_ty.is_signed());
                Ok(b.int_cast(old, result_ty, cit.is_signed()))
            }
            DataType::CustomFloat(cft) if cft.exponent_type().is_none() => {
                let v = if negate { b.unary(UnOp::FNeg, v) } else { v };
                let digits = float_to_custom_int(b, cft, v);
                let digits_ty = cft.digits_type();
                let old = atomic_add_custom_int(b, p, digits_ty, digits, digits_ty.is_signed());
                let old = reconstruct_custom_float(b, old, cft);
                Ok(fp_cast(b, old, result_ty))
            }
            _ => Err(CodegenError::unsupported(format!("{} on {pointee}", op.name()))),
        }
    }

    fn atomic_primitive(
        &mut self,
        op: AtomicOpType,
        p: ValueId,
        prim: PrimitiveType,
        v: ValueId,
    ) -> CodegenResult<ValueId> {
        let b = &mut self.builder;
        if prim.is_real() {
            return Ok(match op {
                AtomicOpType::Add => b.atomic_rmw(RmwOp::FAdd, p, v),
                AtomicOpType::Sub => {
                    let neg = b.unary(UnOp::FNeg, v);
                    b.atomic_rmw(RmwOp::FAdd, p, neg)
                }
                AtomicOpType::Min => b.call_runtime(RuntimeFn::AtomicMinF(prim), &[p, v]),
                AtomicOpType::Max => b.call_runtime(RuntimeFn::AtomicMaxF(prim), &[p, v]),
                AtomicOpType::BitAnd | AtomicOpType::BitOr | AtomicOpType::BitXor => {
                    return Err(CodegenError::unsupported(format!("{} on {prim}", op.name())))
                }
            });
        }
        let signed = prim.is_signed();
        Ok(match op {
            AtomicOpType::Add => b.atomic_rmw(RmwOp::Add, p, v),
            AtomicOpType::Sub => {
                let neg = b.unary(UnOp::Neg, v);
                b.atomic_rmw(RmwOp::Add, p, neg)
            }
            AtomicOpType::Min => b.atomic_rmw(if signed { RmwOp::Min } else { RmwOp::UMin }, p, v),
            AtomicOpType::Max => b.atomic_rmw(if signed { RmwOp::Max } else { RmwOp::UMax }, p, v),
            AtomicOpType::BitAnd => b.atomic_rmw(RmwOp::And, p, v),
            AtomicOpType::BitOr => b.atomic_rmw(RmwOp::Or, p, v),
            AtomicOpType::BitXor => b.atomic_rmw(RmwOp::Xor, p, v),
        })
    }

    // -- External arrays --

    /// Element address of an external array argument, row-major over the
    /// extents recorded in the context.
    pub(super) fn lower_external_ptr(
        &mut self,
        base: StmtId,
        indices: &[StmtId],
        ty: &DataType,
    ) -> CodegenResult<ValueId> {
        let StmtKind::ArgLoad { arg_id, .. } = self.stmt(base).kind else {
            return Err(CodegenError::invariant(format!(
                "external pointer base {base:?} is not an argument"
            )));
        };
        let element_bytes = ty
            .pointee()
            .and_then(DataType::primitive)
            .map(PrimitiveType::bytes)
            .ok_or_else(|| CodegenError::unsupported(format!("external array of {ty}")))?;
        let base = self.value(base)?;
        let context = self.context()?;
        let indices = indices
            .iter()
            .map(|&i| self.value(i))
            .collect::<CodegenResult<Vec<_>>>()?;

        let b = &mut self.builder;
        let arg = b.const_i32(arg_id as i32);
        let mut linear = b.const_i32(0);
        for (axis, &index) in indices.iter().enumerate() {
            let axis = b.const_i32(axis as i32);
            let extent = b.call_runtime(RuntimeFn::ContextGetExtraArgs, &[context, arg, axis]);
            let index = b.int_cast(index, Ty::I32, true);
            let scaled = b.mul(linear, extent);
            linear = b.add(scaled, index);
        }
        let linear = b.int_cast(linear, Ty::I64, true);
        let size = b.const_i64(element_bytes as i64);
        let offset = b.mul(linear, size);
        Ok(b.ptr_add(base, offset))
    }

    pub(super) fn lower_external_shape(&mut self, arg_id: u32, axis: u32) -> CodegenResult<ValueId> {
        let context = self.context()?;
        let b = &mut self.builder;
        let arg = b.const_i32(arg_id as i32);
        let axis = b.const_i32(axis as i32);
        Ok(b.call_runtime(RuntimeFn::ContextGetExtraArgs, &[context, arg, axis]))
    }

    // -- Scratch buffers --

    pub(super) fn lower_global_temporary(&mut self, offset: u64) -> CodegenResult<ValueId> {
        let runtime = self.runtime_ptr()?;
        let offset = self.builder.const_i64(offset as i64);
        Ok(self
            .builder
            .call_runtime(RuntimeFn::GetTemporaryPointer, &[runtime, offset]))
    }

    pub(super) fn lower_thread_local_ptr(&mut self, offset: u64) -> CodegenResult<ValueId> {
        let tls = self
            .frame()?
            .tls
            .ok_or_else(|| CodegenError::invariant("thread-local access outside a loop body"))?;
        Ok(self.builder.ptr_offset(tls, offset))
    }

    pub(super) fn lower_block_local_ptr(&mut self, offset: StmtId) -> CodegenResult<ValueId> {
        if !self.config.arch.is_gpu() {
            return Err(CodegenError::unsupported(format!(
                "block-local storage on {}",
                self.config.arch
            )));
        }
        let offset = self.value(offset)?;
        let b = &mut self.builder;
        let base = b.intrinsic(Intrinsic::BlsBase, &[]);
        Ok(b.ptr_add(base, offset))
    }

    // -- Runtime services --

    pub(super) fn lower_internal_func(&mut self, name: &str) -> CodegenResult<ValueId> {
        let f = runtime_decl::resolve(name)?;
        let sig = runtime_decl::signature(f);
        let args = match sig.params.as_slice() {
            [] => Vec::new(),
            [Ty::Ptr] => vec![self.context()?],
            other => {
                return Err(CodegenError::unsupported(format!(
                    "internal function `{name}` with {} parameters",
                    other.len()
                )))
            }
        };
        tracing::trace!(name, "internal function call");
        let b = &mut self.builder;
        let result = b.call_runtime(f, &args);
        Ok(match sig.ret {
            Ty::Void => b.const_i32(0),
            _ => b.int_cast(result, Ty::I32, true),
        })
    }

    /// Max size and element type of the stack created by `stack`.
    fn stack_of(&self, stack: StmtId) -> CodegenResult<(u32, PrimitiveType)> {
        match self.stmt(stack).kind {
            StmtKind::StackAlloca { max_size, element } => Ok((max_size, element)),
            ref other => Err(CodegenError::invariant(format!(
                "stack operand {stack:?} is not a stack: {other:?}"
            ))),
        }
    }

    pub(super) fn lower_stack_alloca(
        &mut self,
        max_size: u32,
        element: PrimitiveType,
    ) -> CodegenResult<ValueId> {
        let bytes = abi::stack::size(u64::from(max_size), element.bytes());
        let bytes = u32::try_from(bytes)
            .map_err(|_| CodegenError::unsupported(format!("stack of {bytes} bytes")))?;
        let stack = self.entry_slot(Ty::I8, bytes, 8)?;
        self.builder.call_runtime(RuntimeFn::StackInit, &[stack]);
        Ok(stack)
    }

    pub(super) fn lower_stack_push(&mut self, stack: StmtId, value: StmtId) -> CodegenResult<()> {
        let (max_size, element) = self.stack_of(stack)?;
        let s = self.value(stack)?;
        let v = self.value(value)?;
        let b = &mut self.builder;
        let max = b.const_i64(i64::from(max_size));
        let size = b.const_i64(element.bytes() as i64);
        b.call_runtime(RuntimeFn::StackPush, &[s, max, size]);
        let primal = b.call_runtime(RuntimeFn::StackTopPrimal, &[s, size]);
        b.store(v, primal);
        Ok(())
    }

    pub(super) fn lower_stack_load_top(
        &mut self,
        stack: StmtId,
        ty: &DataType,
        adjoint: bool,
    ) -> CodegenResult<ValueId> {
        let (_, element) = self.stack_of(stack)?;
        let s = self.value(stack)?;
        let b = &mut self.builder;
        let size = b.const_i64(element.bytes() as i64);
        let top = if adjoint {
            RuntimeFn::StackTopAdjoint
        } else {
            RuntimeFn::StackTopPrimal
        };
        let ptr = b.call_runtime(top, &[s, size]);
        Ok(b.load(machine_ty(ty), ptr))
    }

    pub(super) fn lower_stack_acc_adjoint(&mut self, stack: StmtId, value: StmtId) -> CodegenResult<()> {
        let (_, element) = self.stack_of(stack)?;
        let s = self.value(stack)?;
        let v = self.value(value)?;
        let ty = Ty::of_primitive(element);
        let b = &mut self.builder;
        let size = b.const_i64(element.bytes() as i64);
        let ptr = b.call_runtime(RuntimeFn::StackTopAdjoint, &[s, size]);
        let old = b.load(ty, ptr);
        let op = if ty.is_float() { BinOp::FAdd } else { BinOp::Add };
        let sum = b.binary(op, old, v);
        b.store(sum, ptr);
        Ok(())
    }
}

/// Exponent field of a float-with-exponent field.
fn exponent_field(tree: &SNodeTree, field: SNodeId) -> CodegenResult<SNodeId> {
    tree[field]
        .exp_snode
        .ok_or_else(|| CodegenError::invariant(format!("{field} has no exponent field")))
}

fn custom_float_of(tree: &SNodeTree, field: SNodeId) -> CodegenResult<CustomFloatType> {
    match tree[field].dt {
        DataType::CustomFloat(cft) => Ok(cft),
        ref other => Err(CodegenError::invariant(format!(
            "exponent user {field} has type {other}"
        ))),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
