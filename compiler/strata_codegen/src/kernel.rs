//! Compiled kernels: lowering, linking and launching.
//!
//! [`compile_kernel`] drives [`KernelCodegen`] over a kernel, prunes the
//! module to the functions its tasks reach, verifies and links it. The
//! resulting [`CompiledKernel`] launches its tasks in order against a
//! [`Runtime`], one fresh context per launch.

use strata_ir::{KernelIr, SNodeTree, StmtKind};
use strata_rt::{Runtime, RuntimeError};

use crate::backend::{link, Machine, Program};
use crate::codegen::{KernelCodegen, OffloadedTask};
use crate::config::CompileConfig;
use crate::error::{CodegenError, CodegenResult};

/// A task of a linked kernel.
#[derive(Clone, Debug)]
struct LinkedTask {
    task: OffloadedTask,
    index: usize,
}

/// A linked kernel, ready to launch.
pub struct CompiledKernel {
    name: String,
    program: Program,
    tasks: Vec<LinkedTask>,
    has_return: bool,
}

/// Launch arguments: scalar and pointer argument words plus the extents of
/// external arrays.
#[derive(Clone, Debug, Default)]
pub struct KernelArgs {
    args: Vec<u64>,
    extents: Vec<(usize, usize, i32)>,
}

impl KernelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg_i32(mut self, v: i32) -> Self {
        self.args.push(u64::from(v as u32));
        self
    }

    pub fn arg_i64(mut self, v: i64) -> Self {
        self.args.push(v as u64);
        self
    }

    pub fn arg_f32(mut self, v: f32) -> Self {
        self.args.push(u64::from(v.to_bits()));
        self
    }

    pub fn arg_f64(mut self, v: f64) -> Self {
        self.args.push(v.to_bits());
        self
    }

    /// External array at device address `addr`, with one extent per axis.
    pub fn arg_array(mut self, addr: u64, shape: &[i32]) -> Self {
        let arg = self.args.len();
        self.args.push(addr);
        self.extents
            .extend(shape.iter().enumerate().map(|(axis, &extent)| (arg, axis, extent)));
        self
    }
}

/// Lower, verify and link `ir` for `config.arch`.
pub fn compile_kernel(
    name: &str,
    ir: &KernelIr,
    tree: &SNodeTree,
    config: &CompileConfig,
) -> CodegenResult<CompiledKernel> {
    let _span = tracing::debug_span!("compile_kernel", kernel = name, arch = %config.arch).entered();

    let mut codegen = KernelCodegen::new(name, ir, tree, config);
    codegen.lower_kernel()?;
    let (builder, tasks) = codegen.finish();
    let errors = builder.codegen_error_count();
    if errors > 0 {
        return Err(CodegenError::Verify(format!(
            "{errors} instruction(s) could not be emitted"
        )));
    }

    let mut module = builder.into_module();
    let roots: Vec<_> = tasks.iter().map(|t| t.function).collect();
    let removed = module.retain_reachable(&roots);
    tracing::debug!(tasks = tasks.len(), removed, "pruned module");
    module.verify()?;
    if config.print_kernel_ir {
        eprintln!("{}", module.print());
    }

    let program = link(&module)?;
    let tasks = tasks
        .into_iter()
        .map(|task| {
            let index = program.function_index(&task.name).ok_or_else(|| {
                CodegenError::invariant(format!("task `{}` missing after linking", task.name))
            })?;
            Ok(LinkedTask { task, index })
        })
        .collect::<CodegenResult<Vec<_>>>()?;
    let has_return = (0..ir.graph.len() as u32)
        .map(strata_ir::StmtId::new)
        .any(|id| matches!(ir.graph[id].kind, StmtKind::KernelReturn { .. }));

    Ok(CompiledKernel {
        name: name.to_owned(),
        program,
        tasks,
        has_return,
    })
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task function names, in launch order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.task.name.as_str())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &OffloadedTask> {
        self.tasks.iter().map(|t| &t.task)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Run every task in order. Returns the kernel's return value when it
    /// has one.
    ///
    /// A failed assertion stops the launch after the task that raised it.
    pub fn launch(&self, rt: &Runtime, args: &KernelArgs) -> Result<Option<u64>, RuntimeError> {
        let ctx = rt.create_context(&args.args)?;
        for &(arg, axis, extent) in &args.extents {
            if let Err(e) = rt.set_extra_arg(ctx, arg, axis, extent) {
                rt.free_context(ctx);
                return Err(e);
            }
        }

        let machine = Machine::new(rt, &self.program);
        for linked in &self.tasks {
            let LinkedTask { task, index } = linked;
            tracing::debug!(task = %task.name, serial = task.shape.is_serial(), "launch");
            machine.launch(*index, &[ctx], task.shape);
            if let Some(e) = rt.take_error() {
                tracing::debug!(task = %task.name, error = %e, "task failed");
                rt.free_context(ctx);
                return Err(e);
            }
        }
        rt.free_context(ctx);
        Ok(self.has_return.then(|| rt.fetch_result()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
