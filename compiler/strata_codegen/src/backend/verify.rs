//! Structural verification of a module before linking.
//!
//! Checks, per live function: at least one block; every block ends in
//! exactly one terminator; branch targets and operands belong to the same
//! function; returns match the declared return type.

use rustc_hash::FxHashSet;

use super::ir::{Module, Op, Ty};
use super::value_id::FunctionId;
use crate::error::{CodegenError, CodegenResult};

impl Module {
    pub fn verify(&self) -> CodegenResult<()> {
        for (id, _) in self.functions() {
            self.verify_function(id)?;
        }
        Ok(())
    }

    fn verify_function(&self, f: FunctionId) -> CodegenResult<()> {
        let func = self.function(f);
        let fail = |what: String| Err(CodegenError::Verify(format!("@{}: {what}", func.name)));
        if func.blocks.is_empty() {
            return fail("function has no blocks".into());
        }

        let mut defined: FxHashSet<_> = func.params.iter().copied().collect();
        for &b in &func.blocks {
            for inst in &self.block(b).insts {
                if !inst.result.is_none() {
                    defined.insert(inst.result);
                }
            }
        }

        for &b in &func.blocks {
            let block = self.block(b);
            let label = format!("{}.{}", block.name, b.raw());
            match block.insts.last() {
                Some(last) if last.op.is_terminator() => {}
                _ => return fail(format!("block {label} is not terminated")),
            }
            let n = block.insts.len();
            for (i, inst) in block.insts.iter().enumerate() {
                if inst.op.is_terminator() && i + 1 != n {
                    return fail(format!("terminator in the middle of block {label}"));
                }
                for v in inst.op.operands() {
                    if !defined.contains(&v) {
                        return fail(format!("block {label} uses {v:?}, which is not defined in this function"));
                    }
                }
                for t in inst.op.successors() {
                    if self.block(t).func != f {
                        return fail(format!("block {label} branches into another function"));
                    }
                }
                match &inst.op {
                    Op::Ret(Some(v)) if self.value_ty(*v) != func.ret => {
                        return fail(format!(
                            "returns {} from a function declared {}",
                            self.value_ty(*v),
                            func.ret
                        ));
                    }
                    Op::Ret(None) if func.ret != Ty::Void => {
                        return fail(format!("returns void from a function declared {}", func.ret));
                    }
                    Op::Call { callee: super::ir::Callee::Function(g), .. } | Op::FuncAddr(g)
                        if !self.function(*g).live =>
                    {
                        return fail(format!("refers to removed function @{}", self.function(*g).name));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
