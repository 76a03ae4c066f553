//! Structured control flow and diagnostics.
//!
//! Every construct opens fresh blocks in the current function and leaves the
//! cursor on its join block. Statements after a `continue` land in an
//! unreachable `after_continue` block so that the enclosing structure can
//! still close normally.

use strata_ir::{DataType, PrimitiveType, PrintItem, StmtId};
use strata_rt::RuntimeFn;

use super::{KernelCodegen, LoopContext, LoopVar};
use crate::backend::{BlockId, CastOp, IntPredicate, Ty, ValueId};
use crate::error::{CodegenError, CodegenResult};

/// Most arguments an `assert` message may reference.
pub(crate) const MAX_ASSERT_ARGS: usize = 32;

impl KernelCodegen<'_> {
    fn new_block(&mut self, name: &str) -> CodegenResult<BlockId> {
        let function = self.frame()?.function;
        Ok(self.builder.append_block(function, name))
    }

    /// Branch to `target` unless the current block already ended.
    fn br_if_open(&mut self, target: BlockId) {
        if !self.builder.is_terminated() {
            self.builder.br(target);
        }
    }

    pub(super) fn lower_if(
        &mut self,
        cond: StmtId,
        true_block: Option<&[StmtId]>,
        false_block: Option<&[StmtId]>,
    ) -> CodegenResult<()> {
        let cond = self.value(cond)?;
        let true_bb = self.new_block("true_block")?;
        let false_bb = self.new_block("false_block")?;
        let after = self.new_block("after_if")?;
        let test = self.builder.is_nonzero(cond);
        self.builder.cond_br(test, true_bb, false_bb);

        for (bb, block) in [(true_bb, true_block), (false_bb, false_block)] {
            self.builder.position_at_end(bb);
            if let Some(block) = block {
                self.lower_block(block)?;
            }
            self.br_if_open(after);
        }
        self.builder.position_at_end(after);
        Ok(())
    }

    pub(super) fn lower_while(&mut self, id: StmtId, body: &[StmtId]) -> CodegenResult<()> {
        let head = self.new_block("while_loop_body")?;
        let after = self.new_block("after_while")?;
        self.builder.br(head);
        self.builder.position_at_end(head);

        self.push_loop(LoopContext {
            scope: id,
            reentry: head,
            after_while: Some(after),
        })?;
        let result = self.lower_block(body);
        self.pop_loop()?;
        result?;

        self.br_if_open(head);
        self.builder.position_at_end(after);
        Ok(())
    }

    /// Leave the innermost `while` when `cond` is zero.
    pub(super) fn lower_while_control(&mut self, cond: StmtId) -> CodegenResult<()> {
        let cond = self.value(cond)?;
        let after_while = self
            .frame()?
            .loops
            .iter()
            .rev()
            .find_map(|l| l.after_while)
            .ok_or_else(|| CodegenError::invariant("while control outside a while loop"))?;
        let after_break = self.new_block("after_break")?;
        let keep_going = self.builder.is_nonzero(cond);
        self.builder.cond_br(keep_going, after_break, after_while);
        self.builder.position_at_end(after_break);
        Ok(())
    }

    /// Jump to the reentry block of `scope`; inside a task-level loop body
    /// function, return from it instead.
    pub(super) fn lower_continue(&mut self, scope: StmtId) -> CodegenResult<()> {
        let reentry = self
            .frame()?
            .loops
            .iter()
            .rev()
            .find(|l| l.scope == scope)
            .map(|l| l.reentry);
        match reentry {
            Some(target) => self.builder.br(target),
            None if self.current_task.as_ref().is_some_and(|(task, _)| *task == scope) => {
                self.builder.ret_void();
            }
            None => {
                return Err(CodegenError::invariant(format!(
                    "continue targets {scope:?}, which is not an enclosing loop"
                )))
            }
        }
        let after = self.new_block("after_continue")?;
        self.builder.position_at_end(after);
        Ok(())
    }

    /// Serial counted loop over `[begin, end)`, descending when `reversed`.
    pub(super) fn lower_range_for(
        &mut self,
        id: StmtId,
        begin: StmtId,
        end: StmtId,
        reversed: bool,
        body: &[StmtId],
    ) -> CodegenResult<()> {
        let begin = self.value(begin)?;
        let end = self.value(end)?;
        let counter = self.entry_slot(Ty::I32, 1, 4)?;
        let b = &mut self.builder;
        let begin = b.int_cast(begin, Ty::I32, true);
        let end = b.int_cast(end, Ty::I32, true);
        let first = if reversed {
            let one = b.const_i32(1);
            b.sub(end, one)
        } else {
            begin
        };
        b.store(first, counter);

        let test = self.new_block("for_loop_test")?;
        let body_bb = self.new_block("for_loop_body")?;
        let inc = self.new_block("for_loop_inc")?;
        let after = self.new_block("after_for")?;
        self.builder.br(test);

        self.builder.position_at_end(test);
        let i = self.builder.load(Ty::I32, counter);
        let cond = if reversed {
            self.builder.icmp(IntPredicate::Sge, i, begin)
        } else {
            self.builder.icmp(IntPredicate::Slt, i, end)
        };
        self.builder.cond_br(cond, body_bb, after);

        self.builder.position_at_end(body_bb);
        self.set_loop_var(id, LoopVar::Slot(counter));
        self.push_loop(LoopContext {
            scope: id,
            reentry: inc,
            after_while: None,
        })?;
        let result = self.lower_block(body);
        self.pop_loop()?;
        result?;
        self.br_if_open(inc);

        self.builder.position_at_end(inc);
        let i = self.builder.load(Ty::I32, counter);
        let step = self.builder.const_i32(if reversed { -1 } else { 1 });
        let next = self.builder.add(i, step);
        self.builder.store(next, counter);
        self.builder.br(test);

        self.builder.position_at_end(after);
        Ok(())
    }

    // -- Diagnostics --

    /// Formatted print through the host `printf` the runtime hands out.
    pub(super) fn lower_print(&mut self, contents: &[PrintItem]) -> CodegenResult<()> {
        if self.config.arch.is_gpu() {
            tracing::warn!(arch = %self.config.arch, "print statement skipped on this target");
            return Ok(());
        }
        let mut format = String::new();
        let mut args: Vec<ValueId> = Vec::with_capacity(contents.len());
        for item in contents {
            match item {
                PrintItem::Str(s) => format.push_str(&s.replace('%', "%%")),
                PrintItem::Value(id) => {
                    let ty = self.ret_type(*id);
                    let v = self.value(*id)?;
                    let (spec, arg) = self.printf_arg(v, ty)?;
                    format.push_str(spec);
                    args.push(arg);
                }
            }
        }
        let runtime = self.runtime_ptr()?;
        let b = &mut self.builder;
        let printf = b.call_runtime(RuntimeFn::RuntimeGetHostPrintf, &[runtime]);
        let fmt = b.global_str(&format);
        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(fmt);
        operands.extend(args);
        b.call_indirect(printf, &operands, Ty::I32);
        Ok(())
    }

    /// Conversion spec and promoted argument for one printed value.
    fn printf_arg(&mut self, v: ValueId, ty: &DataType) -> CodegenResult<(&'static str, ValueId)> {
        use PrimitiveType::{F32, F64, I16, I32, I64, I8, U1, U16, U32, U64, U8};
        let Some(prim) = ty.compute_type() else {
            return Err(CodegenError::unsupported(format!("printing a value of type {ty}")));
        };
        let b = &mut self.builder;
        Ok(match prim {
            F32 => ("%f", b.cast(CastOp::FpExt, v, Ty::F64)),
            F64 => ("%f", v),
            I8 | I16 | I32 => ("%d", b.int_cast(v, Ty::I32, true)),
            U1 | U8 | U16 | U32 => ("%u", b.int_cast(v, Ty::I32, false)),
            I64 => ("%lld", v),
            U64 => ("%llu", v),
        })
    }

    /// Runtime assertion: arguments travel as zero-extended 64-bit slots.
    pub(super) fn lower_assert(
        &mut self,
        cond: StmtId,
        message: &str,
        args: &[StmtId],
    ) -> CodegenResult<()> {
        if args.len() > MAX_ASSERT_ARGS {
            return Err(CodegenError::invariant(format!(
                "assert with {} arguments, at most {MAX_ASSERT_ARGS} supported",
                args.len()
            )));
        }
        let cond = self.value(cond)?;
        let values = args
            .iter()
            .map(|&a| self.value(a))
            .collect::<CodegenResult<Vec<_>>>()?;
        let buffer = self.entry_slot(Ty::I64, (values.len() as u32).max(1), 8)?;
        let runtime = self.runtime_ptr()?;

        let b = &mut self.builder;
        for (i, &v) in values.iter().enumerate() {
            let bits = b.bits_of(v);
            let slot_value = b.int_cast(bits, Ty::I64, false);
            let slot = b.ptr_offset(buffer, i as u64 * 8);
            b.store(slot_value, slot);
        }
        let cond = b.int_cast(cond, Ty::I32, false);
        let text = b.global_str(message);
        let count = b.const_i32(values.len() as i32);
        b.call_runtime(RuntimeFn::AssertFormat, &[runtime, cond, text, count, buffer]);
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
