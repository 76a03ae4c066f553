//! Offloaded tasks.
//!
//! Each `Offloaded` statement becomes one task function `(context) -> void`
//! named `{kernel}_{n}_{kind}`, where `n` comes from a process-wide counter
//! so that names stay unique across kernels. The task function either runs
//! the body inline (serial tasks) or calls a runtime loop driver with the
//! addresses of separately emitted body functions.

use std::sync::atomic::{AtomicU64, Ordering};

use strata_ir::{Offload, RangeBound, SNodeKind, StmtId, TaskKind};
use strata_rt::RuntimeFn;

use super::{KernelCodegen, LoopVar};
use crate::backend::{FunctionId, LaunchShape, Ty, ValueId};
use crate::error::{CodegenError, CodegenResult};

static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One compiled task, in kernel launch order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffloadedTask {
    pub name: String,
    pub kind: TaskKind,
    pub function: FunctionId,
    pub shape: LaunchShape,
}

impl<'a> KernelCodegen<'a> {
    pub(super) fn lower_offload(&mut self, id: StmtId, task: &'a Offload) -> CodegenResult<()> {
        let n = TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}_{n}_{}", self.kernel_name, task.kind.name());
        let _span = tracing::debug_span!("task", %name, kind = %task.kind).entered();

        self.current_task = Some((id, name.clone()));
        let result = self.with_function(&name, &[Ty::Ptr], false, |cg| match task.kind {
            TaskKind::Serial => cg.lower_block(&task.body),
            TaskKind::RangeFor => cg.lower_range_for_task(id, task, &name),
            TaskKind::StructFor => cg.lower_struct_for_task(id, task, &name),
            TaskKind::Listgen => cg.lower_listgen(task),
            TaskKind::Gc => cg.lower_gc(task),
        });
        self.current_task = None;
        let function = result?;

        let shape = self.launch_shape(task);
        tracing::debug!(?shape, "task lowered");
        self.tasks.push(OffloadedTask {
            name,
            kind: task.kind,
            function,
            shape,
        });
        Ok(())
    }

    /// Grid shape of `task`: loops spread over the configured grid on GPU
    /// targets, everything else runs on a single lane.
    fn launch_shape(&self, task: &Offload) -> LaunchShape {
        let parallel = matches!(task.kind, TaskKind::RangeFor | TaskKind::StructFor);
        if !(parallel && self.config.arch.is_gpu()) {
            return LaunchShape::SERIAL;
        }
        LaunchShape {
            grid_dim: self.config.gpu_grid_dim.max(1),
            block_dim: self.config.block_dim(task.block_dim),
            bls_size: task.bls_size,
        }
    }

    fn range_bound(&mut self, bound: RangeBound) -> CodegenResult<ValueId> {
        match bound {
            RangeBound::Const(v) => Ok(self.builder.const_i32(v)),
            RangeBound::Temporary(offset) => {
                let runtime = self.runtime_ptr()?;
                let b = &mut self.builder;
                let offset = b.const_i64(offset as i64);
                let at = b.call_runtime(RuntimeFn::GetTemporaryPointer, &[runtime, offset]);
                Ok(b.load(Ty::I32, at))
            }
        }
    }

    /// Function `(context, tls) -> void` running `block`, for thread-local
    /// prologues and epilogues.
    fn tls_function(&mut self, name: String, block: Option<&'a [StmtId]>) -> CodegenResult<Option<FunctionId>> {
        block
            .map(|block| self.with_function(&name, &[Ty::Ptr, Ty::Ptr], true, |cg| cg.lower_block(block)))
            .transpose()
    }

    fn lower_range_for_task(&mut self, id: StmtId, task: &'a Offload, name: &str) -> CodegenResult<()> {
        if task.bls_prologue.is_some() || task.bls_epilogue.is_some() {
            return Err(CodegenError::unsupported(format!(
                "block-local storage in range-for task {name}"
            )));
        }
        let begin = self.range_bound(task.begin)?;
        let end = self.range_bound(task.end)?;

        let body = self.with_function(
            &format!("{name}_body"),
            &[Ty::Ptr, Ty::Ptr, Ty::I32],
            true,
            |cg| {
                let function = cg.frame()?.function;
                let index = cg.builder.param(function, 2);
                cg.set_loop_var(id, LoopVar::Value(index));
                cg.lower_block(&task.body)
            },
        )?;
        let prologue = self.tls_function(format!("{name}_tls_prologue"), task.tls_prologue.as_deref())?;
        let epilogue = self.tls_function(format!("{name}_tls_epilogue"), task.tls_epilogue.as_deref())?;

        let config = self.config;
        let ctx = self.context()?;
        let b = &mut self.builder;
        let mut addr = |f: Option<FunctionId>| match f {
            Some(f) => b.func_addr(f),
            None => b.null(),
        };
        let body = addr(Some(body));
        let prologue = addr(prologue);
        let epilogue = addr(epilogue);
        let tls_size = b.const_i32(task.tls_size as i32);
        if config.arch.is_gpu() {
            b.call_runtime(
                RuntimeFn::GpuParallelRangeFor,
                &[ctx, begin, end, prologue, body, epilogue, tls_size],
            );
        } else {
            let threads = if task.num_cpu_threads == 0 {
                config.num_cpu_threads
            } else {
                task.num_cpu_threads
            };
            let threads = b.const_i32(threads as i32);
            let block_dim = b.const_i32(config.block_dim(task.block_dim) as i32);
            b.call_runtime(
                RuntimeFn::CpuParallelRangeFor,
                &[ctx, threads, begin, end, block_dim, prologue, body, epilogue, tls_size],
            );
        }
        Ok(())
    }

    /// Append the active cells of the task node's parents to its list.
    fn lower_listgen(&mut self, task: &Offload) -> CodegenResult<()> {
        let snode = task
            .snode
            .ok_or_else(|| CodegenError::invariant("listgen task without a node"))?;
        let parent = self.tree[snode]
            .parent
            .ok_or_else(|| CodegenError::invariant(format!("listgen of parentless {snode}")))?;
        let runtime = self.runtime_ptr()?;
        let parent_meta = self.node_meta(parent)?;
        let child_meta = self.node_meta(snode)?;
        let f = if self.tree[parent].kind == SNodeKind::Root {
            RuntimeFn::ElementListgenRoot
        } else {
            RuntimeFn::ElementListgenNonroot
        };
        self.builder.call_runtime(f, &[runtime, parent_meta, child_meta]);
        Ok(())
    }

    fn lower_gc(&mut self, task: &Offload) -> CodegenResult<()> {
        let snode = task
            .snode
            .ok_or_else(|| CodegenError::invariant("gc task without a node"))?;
        let runtime = self.runtime_ptr()?;
        let id = self.builder.const_i32(snode.raw() as i32);
        self.builder.call_runtime(RuntimeFn::NodeGc, &[runtime, id]);
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
