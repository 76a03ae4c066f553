//! Generated runtime glue.
//!
//! GPU struct-for tasks enter the runtime through a small entry function
//! that reserves the per-lane thread-local buffer on its own stack and
//! hands it to `gpu_struct_for_parts`. The entry is emitted once per module
//! as a template with a one-byte buffer, then cloned per task with the
//! buffer resized to the task's thread-local size. The template itself is
//! never called and is dropped when the module is pruned.

use strata_rt::RuntimeFn;

use super::KernelCodegen;
use crate::backend::{FunctionId, Op, Ty};
use crate::error::{CodegenError, CodegenResult};

/// Name of the GPU struct-for entry template.
pub(crate) const STRUCT_FOR_TEMPLATE: &str = "gpu_parallel_struct_for";

/// Thread-local buffer of the template: `[1 x i8]`, 8-byte aligned.
const TEMPLATE_TLS: (Ty, u32, u32) = (Ty::I8, 1, 8);

impl KernelCodegen<'_> {
    /// The entry template, declared on first use.
    ///
    /// `(context, snode, element_size, split, body, tls_size, threads) -> void`;
    /// the last two parameters mirror the CPU driver and are unused.
    fn struct_for_template(&mut self) -> FunctionId {
        if let Some(f) = self.struct_for_template {
            return f;
        }
        let b = &mut self.builder;
        let cursor = b.current_block();
        let f = b.declare_function(
            STRUCT_FOR_TEMPLATE,
            &[Ty::Ptr, Ty::I32, Ty::I32, Ty::I32, Ty::Ptr, Ty::I32, Ty::I32],
            Ty::Void,
        );
        let entry = b.append_block(f, "entry");
        b.position_at_end(entry);
        let (ty, count, align) = TEMPLATE_TLS;
        let tls = b.alloca(ty, count, align);
        let args: Vec<_> = (0..5).map(|i| b.param(f, i)).collect();
        b.call_runtime(
            RuntimeFn::GpuStructForParts,
            &[args[0], args[1], args[2], args[3], args[4], tls],
        );
        b.ret_void();
        if let Some(block) = cursor {
            b.position_at_end(block);
        }
        self.struct_for_template = Some(f);
        f
    }

    /// Per-task copy of the entry template with a `tls_size`-byte buffer.
    pub(crate) fn gpu_struct_for_entry(&mut self, task_name: &str, tls_size: u32) -> CodegenResult<FunctionId> {
        let template = self.struct_for_template();
        let module = self.builder.module_mut();
        let entry = module.clone_function(template, &format!("{task_name}_parallel_struct_for"));

        let (ty, count, align) = TEMPLATE_TLS;
        let size = tls_size.max(1);
        let mut rewritten = 0usize;
        module.for_each_inst_mut(entry, |inst| {
            if let Op::Alloca { ty: t, count: c, align: a } = &mut inst.op {
                if *t == ty && *c == count && *a == align {
                    *c = size;
                    rewritten += 1;
                }
            }
        });
        if rewritten != 1 {
            return Err(CodegenError::invariant(format!(
                "struct-for entry template has {rewritten} thread-local buffers, expected one"
            )));
        }
        tracing::debug!(task = task_name, tls_size = size, "monomorphized struct-for entry");
        Ok(entry)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
