//! Kernel lowering: `strata_ir` statements into backend functions.
//!
//! `KernelCodegen` owns the lowering state of one kernel and dispatches each
//! [`StmtKind`] to a focused `lower_*` method. Every offloaded task becomes
//! one function `(context) -> void`; loop bodies and thread-local
//! prologue/epilogue blocks become their own functions that the runtime loop
//! drivers call back by address.
//!
//! # Architecture
//!
//! ```text
//! KernelCodegen
//!   ├── lower_arith.rs         Const, Rand, ArgLoad, UnaryOp, BinaryOp, Select, ...
//!   ├── lower_control_flow.rs  If, While, WhileControl, Continue, RangeFor, Print, Assert
//!   ├── lower_memory.rs        locals, global load/store, atomics, temporaries, stacks
//!   ├── lower_snode.rs         GetRoot, SNodeLookup, GetCh, SNodeOp, loop indices
//!   ├── codec.rs               custom int and custom float encode/decode
//!   ├── bit_ptr.rs             (byte pointer, bit offset) pairs
//!   ├── snode_meta.rs          per-node metadata objects, node method calls
//!   ├── struct_for.rs          struct-for body functions and launches
//!   ├── runtime_module.rs      GPU struct-for entry template
//!   └── task.rs                offloaded task functions and naming
//! ```
//!
//! # Lowering state
//!
//! - The value map (`StmtId -> Lowered`) is append-only. Every operand is
//!   lowered before its users; a missing or duplicate entry is an internal
//!   error, never a silent default.
//! - A [`FunctionFrame`] describes the function being emitted. Entering a
//!   nested function saves the frame and the builder cursor, and leaving it
//!   restores both ([`KernelCodegen::with_function`]).
//! - Per-function values that must dominate every use (the runtime pointer,
//!   node metadata objects, stack slots) are emitted into the entry block,
//!   which only receives its branch to the body when the function is closed.

pub mod runtime_decl;

mod bit_ptr;
mod codec;
mod lower_arith;
mod lower_control_flow;
mod lower_memory;
mod lower_snode;
mod runtime_module;
mod snode_meta;
mod struct_for;
mod task;

use rustc_hash::FxHashMap;
use strata_ir::{DataType, KernelIr, SNodeId, SNodeTree, Stmt, StmtId, StmtKind};
use strata_rt::RuntimeFn;

use crate::backend::{BlockId, FunctionId, IrBuilder, Ty, ValueId};
use crate::config::CompileConfig;
use crate::error::{CodegenError, CodegenResult};

pub(crate) use bit_ptr::BitPtr;
pub use task::OffloadedTask;

// ---------------------------------------------------------------------------
// Lowered values and frames
// ---------------------------------------------------------------------------

/// Lowered form of a statement result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Lowered {
    Value(ValueId),
    /// Field inside a physical word.
    BitPtr(BitPtr),
}

impl From<ValueId> for Lowered {
    fn from(v: ValueId) -> Self {
        Lowered::Value(v)
    }
}

impl From<BitPtr> for Lowered {
    fn from(p: BitPtr) -> Self {
        Lowered::BitPtr(p)
    }
}

/// Branch targets of an enclosing loop.
#[derive(Copy, Clone, Debug)]
pub(crate) struct LoopContext {
    /// Loop statement, or offloaded task, that `continue` refers to.
    pub scope: StmtId,
    pub reentry: BlockId,
    /// Target of a failed `while` control check; `None` for counted loops.
    pub after_while: Option<BlockId>,
}

/// Index storage of a loop, read by `LoopIndex` and friends.
#[derive(Copy, Clone, Debug)]
pub(crate) enum LoopVar {
    /// Serial range-for: `i32` counter slot.
    Slot(ValueId),
    /// Range-for task: index parameter of the body function.
    Value(ValueId),
    /// Struct-for: refined coordinates and the parent coordinates of the
    /// list element.
    StructFor { coords: ValueId, parent_coords: ValueId },
}

/// Lowering state of the function being emitted.
pub(crate) struct FunctionFrame {
    pub function: FunctionId,
    pub entry: BlockId,
    pub body: BlockId,
    /// Parameter 0 of every generated function.
    pub context: ValueId,
    /// Thread-local buffer parameter of loop bodies and TLS blocks.
    pub tls: Option<ValueId>,
    runtime: Option<ValueId>,
    metas: FxHashMap<SNodeId, ValueId>,
    pub loops: Vec<LoopContext>,
}

/// Lowering of one kernel.
pub struct KernelCodegen<'a> {
    pub(crate) ir: &'a KernelIr,
    pub(crate) tree: &'a SNodeTree,
    pub(crate) config: &'a CompileConfig,
    pub(crate) builder: IrBuilder,
    kernel_name: String,
    values: FxHashMap<StmtId, Lowered>,
    loop_vars: FxHashMap<StmtId, LoopVar>,
    frame: Option<FunctionFrame>,
    /// Offloaded task being lowered, and its function name.
    current_task: Option<(StmtId, String)>,
    tasks: Vec<OffloadedTask>,
    /// GPU struct-for entry template, declared on first use.
    struct_for_template: Option<FunctionId>,
}

impl<'a> KernelCodegen<'a> {
    pub fn new(
        kernel_name: &str,
        ir: &'a KernelIr,
        tree: &'a SNodeTree,
        config: &'a CompileConfig,
    ) -> Self {
        KernelCodegen {
            ir,
            tree,
            config,
            builder: IrBuilder::new(),
            kernel_name: kernel_name.to_owned(),
            values: FxHashMap::default(),
            loop_vars: FxHashMap::default(),
            frame: None,
            current_task: None,
            tasks: Vec::new(),
            struct_for_template: None,
        }
    }

    /// Lower every offloaded task of the kernel, in order.
    pub fn lower_kernel(&mut self) -> CodegenResult<()> {
        let ir = self.ir;
        for &id in &ir.body {
            match &ir.graph[id].kind {
                StmtKind::Offloaded(task) => self.lower_offload(id, task)?,
                other => {
                    return Err(CodegenError::invariant(format!(
                        "top-level statement {id:?} is not an offloaded task: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// The builder and the task list, in launch order.
    pub fn finish(self) -> (IrBuilder, Vec<OffloadedTask>) {
        (self.builder, self.tasks)
    }

    // -- Statement access --

    pub(crate) fn stmt(&self, id: StmtId) -> &'a Stmt {
        let ir = self.ir;
        &ir.graph[id]
    }

    pub(crate) fn ret_type(&self, id: StmtId) -> &'a DataType {
        &self.stmt(id).ret_type
    }

    // -- Value map --

    fn record(&mut self, id: StmtId, lowered: Lowered) -> CodegenResult<()> {
        if self.values.insert(id, lowered).is_some() {
            return Err(CodegenError::invariant(format!("statement {id:?} lowered twice")));
        }
        Ok(())
    }

    pub(crate) fn lowered(&self, id: StmtId) -> CodegenResult<Lowered> {
        self.values
            .get(&id)
            .copied()
            .ok_or_else(|| CodegenError::invariant(format!("operand {id:?} used before it was lowered")))
    }

    /// Lowered scalar or pointer value of `id`.
    pub(crate) fn value(&self, id: StmtId) -> CodegenResult<ValueId> {
        match self.lowered(id)? {
            Lowered::Value(v) => Ok(v),
            Lowered::BitPtr(_) => Err(CodegenError::invariant(format!(
                "operand {id:?} is a bit pointer where a value was expected"
            ))),
        }
    }

    /// Lowered bit pointer of `id`.
    pub(crate) fn bit_ptr(&self, id: StmtId) -> CodegenResult<BitPtr> {
        match self.lowered(id)? {
            Lowered::BitPtr(p) => Ok(p),
            Lowered::Value(_) => Err(CodegenError::invariant(format!(
                "operand {id:?} is not a bit pointer"
            ))),
        }
    }

    // -- Frames --

    pub(crate) fn frame(&self) -> CodegenResult<&FunctionFrame> {
        self.frame
            .as_ref()
            .ok_or_else(|| CodegenError::invariant("statement lowered outside any task function"))
    }

    pub(crate) fn frame_mut(&mut self) -> CodegenResult<&mut FunctionFrame> {
        self.frame
            .as_mut()
            .ok_or_else(|| CodegenError::invariant("statement lowered outside any task function"))
    }

    pub(crate) fn context(&self) -> CodegenResult<ValueId> {
        Ok(self.frame()?.context)
    }

    /// Emit a function `(params) -> void` whose body `emit` fills.
    ///
    /// Parameter 0 is the context; with `has_tls`, parameter 1 is the
    /// thread-local buffer. The caller's frame and cursor are restored
    /// afterwards, whether or not `emit` succeeds.
    pub(crate) fn with_function(
        &mut self,
        name: &str,
        params: &[Ty],
        has_tls: bool,
        emit: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<FunctionId> {
        let function = self.builder.declare_function(name, params, Ty::Void);
        let entry = self.builder.append_block(function, "entry");
        let body = self.builder.append_block(function, "body");
        let frame = FunctionFrame {
            function,
            entry,
            body,
            context: self.builder.param(function, 0),
            tls: has_tls.then(|| self.builder.param(function, 1)),
            runtime: None,
            metas: FxHashMap::default(),
            loops: Vec::new(),
        };
        let saved_frame = self.frame.replace(frame);
        let saved_cursor = self.builder.current_block();

        self.builder.position_at_end(body);
        let result = emit(self);
        if !self.builder.is_terminated() {
            self.builder.ret_void();
        }
        self.builder.position_at_end(entry);
        self.builder.br(body);

        self.frame = saved_frame;
        if let Some(block) = saved_cursor {
            self.builder.position_at_end(block);
        }
        result.map(|()| function)
    }

    /// Run `emit` with the cursor at the end of the entry block.
    pub(crate) fn in_entry<T>(&mut self, emit: impl FnOnce(&mut IrBuilder) -> T) -> CodegenResult<T> {
        let entry = self.frame()?.entry;
        let cursor = self.builder.current_block();
        self.builder.position_at_end(entry);
        let out = emit(&mut self.builder);
        if let Some(block) = cursor {
            self.builder.position_at_end(block);
        }
        Ok(out)
    }

    /// Stack slot of `count` values of `ty` in the entry block.
    pub(crate) fn entry_slot(&mut self, ty: Ty, count: u32, align: u32) -> CodegenResult<ValueId> {
        self.in_entry(|b| b.alloca(ty, count, align))
    }

    /// The runtime object, loaded once per function.
    pub(crate) fn runtime_ptr(&mut self) -> CodegenResult<ValueId> {
        if let Some(rt) = self.frame()?.runtime {
            return Ok(rt);
        }
        let context = self.context()?;
        let rt = self.in_entry(|b| b.call_runtime(RuntimeFn::ContextGetRuntime, &[context]))?;
        self.frame_mut()?.runtime = Some(rt);
        Ok(rt)
    }

    // -- Loops --

    pub(crate) fn push_loop(&mut self, cx: LoopContext) -> CodegenResult<()> {
        self.frame_mut()?.loops.push(cx);
        Ok(())
    }

    pub(crate) fn pop_loop(&mut self) -> CodegenResult<()> {
        self.frame_mut()?
            .loops
            .pop()
            .map(drop)
            .ok_or_else(|| CodegenError::invariant("loop stack underflow"))
    }

    pub(crate) fn set_loop_var(&mut self, scope: StmtId, var: LoopVar) {
        self.loop_vars.insert(scope, var);
    }

    pub(crate) fn loop_var(&self, scope: StmtId) -> CodegenResult<LoopVar> {
        self.loop_vars
            .get(&scope)
            .copied()
            .ok_or_else(|| CodegenError::invariant(format!("{scope:?} is not an enclosing loop")))
    }

    // -- Dispatch --

    pub(crate) fn lower_block(&mut self, block: &[StmtId]) -> CodegenResult<()> {
        for &id in block {
            self.lower_stmt(id)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines, reason = "one arm per statement kind")]
    pub(crate) fn lower_stmt(&mut self, id: StmtId) -> CodegenResult<()> {
        let stmt = self.stmt(id);
        let ty = &stmt.ret_type;
        let lowered: Option<Lowered> = match &stmt.kind {
            // -- Values --
            StmtKind::Const { bits } => Some(self.lower_const(ty, *bits).into()),
            StmtKind::Rand => Some(self.lower_rand(ty)?.into()),
            StmtKind::ArgLoad { arg_id, is_ptr } => {
                Some(self.lower_arg_load(ty, *arg_id, *is_ptr)?.into())
            }
            StmtKind::KernelReturn { value } => {
                self.lower_kernel_return(*value)?;
                None
            }
            StmtKind::UnaryOp { op, operand } => Some(self.lower_unary(*op, *operand, ty)?.into()),
            StmtKind::BinaryOp { op, lhs, rhs } => {
                Some(self.lower_binary(*op, *lhs, *rhs, ty)?.into())
            }
            StmtKind::Select { cond, lhs, rhs } => {
                Some(self.lower_select(*cond, *lhs, *rhs)?.into())
            }
            StmtKind::BitExtract { input, begin, end } => {
                Some(self.lower_bit_extract(*input, *begin, *end)?.into())
            }
            StmtKind::Linearize { inputs, strides } => {
                Some(self.lower_linearize(inputs, strides)?.into())
            }
            StmtKind::RangeAssumption { input, .. } | StmtKind::LoopUnique { input } => {
                Some(self.lowered(*input)?)
            }

            // -- Locals --
            StmtKind::Alloca => Some(self.lower_alloca(ty)?.into()),
            StmtKind::LocalLoad { ptr } => Some(self.lower_local_load(*ptr, ty)?.into()),
            StmtKind::LocalStore { ptr, value } => {
                self.lower_local_store(*ptr, *value)?;
                None
            }

            // -- Control flow --
            StmtKind::If {
                cond,
                true_block,
                false_block,
            } => {
                self.lower_if(*cond, true_block.as_deref(), false_block.as_deref())?;
                None
            }
            StmtKind::While { body } => {
                self.lower_while(id, body)?;
                None
            }
            StmtKind::WhileControl { cond } => {
                self.lower_while_control(*cond)?;
                None
            }
            StmtKind::Continue { scope } => {
                self.lower_continue(*scope)?;
                None
            }
            StmtKind::RangeFor {
                begin,
                end,
                reversed,
                body,
            } => {
                self.lower_range_for(id, *begin, *end, *reversed, body)?;
                None
            }
            StmtKind::Print { contents } => {
                self.lower_print(contents)?;
                None
            }
            StmtKind::Assert {
                cond,
                message,
                args,
            } => {
                self.lower_assert(*cond, message, args)?;
                None
            }

            // -- Global memory --
            StmtKind::GetRoot => Some(self.lower_get_root()?.into()),
            StmtKind::SNodeLookup {
                snode,
                input_snode,
                input_index,
                activate,
            } => Some(self.lower_snode_lookup(*snode, *input_snode, *input_index, *activate)?),
            StmtKind::GetCh {
                input_ptr,
                input_snode,
                chid,
            } => Some(self.lower_get_ch(*input_ptr, *input_snode, *chid, ty)?),
            StmtKind::GlobalLoad { ptr } => Some(self.lower_global_load(*ptr, ty)?.into()),
            StmtKind::GlobalStore { ptr, value } => {
                self.lower_global_store(*ptr, *value)?;
                None
            }
            StmtKind::BitStructStore {
                ptr,
                bit_struct,
                ch_ids,
                values,
            } => {
                self.lower_bit_struct_store(*ptr, *bit_struct, ch_ids, values)?;
                None
            }
            StmtKind::AtomicOp { op, dest, value } => {
                Some(self.lower_atomic(*op, *dest, *value)?.into())
            }
            StmtKind::SNodeOp {
                op,
                snode,
                ptr,
                index,
                value,
            } => self
                .lower_snode_op(*op, *snode, *ptr, *index, *value)?
                .map(Lowered::from),
            StmtKind::ExternalPtr { base, indices } => {
                Some(self.lower_external_ptr(*base, indices, ty)?.into())
            }
            StmtKind::ExternalTensorShapeAlongAxis { arg_id, axis } => {
                Some(self.lower_external_shape(*arg_id, *axis)?.into())
            }
            StmtKind::GlobalTemporary { offset } => {
                Some(self.lower_global_temporary(*offset)?.into())
            }
            StmtKind::ThreadLocalPtr { offset } => {
                Some(self.lower_thread_local_ptr(*offset)?.into())
            }
            StmtKind::BlockLocalPtr { offset } => {
                Some(self.lower_block_local_ptr(*offset)?.into())
            }

            // -- Loop context --
            StmtKind::LoopIndex { loop_, index } => {
                Some(self.lower_loop_index(*loop_, *index)?.into())
            }
            StmtKind::LoopLinearIndex { loop_ } => {
                Some(self.lower_loop_linear_index(*loop_)?.into())
            }
            StmtKind::BlockCornerIndex { loop_, index } => {
                Some(self.lower_block_corner_index(*loop_, *index)?.into())
            }
            StmtKind::BlockDim => Some(self.lower_block_dim()?.into()),

            // -- Runtime services --
            StmtKind::ClearList { snode } => {
                self.lower_clear_list(*snode)?;
                None
            }
            StmtKind::InternalFunc { name } => Some(self.lower_internal_func(name)?.into()),
            StmtKind::StackAlloca { max_size, element } => {
                Some(self.lower_stack_alloca(*max_size, *element)?.into())
            }
            StmtKind::StackPush { stack, value } => {
                self.lower_stack_push(*stack, *value)?;
                None
            }
            StmtKind::StackPop { stack } => {
                let stack = self.value(*stack)?;
                self.builder.call_runtime(RuntimeFn::StackPop, &[stack]);
                None
            }
            StmtKind::StackLoadTop { stack } => {
                Some(self.lower_stack_load_top(*stack, ty, false)?.into())
            }
            StmtKind::StackLoadTopAdj { stack } => {
                Some(self.lower_stack_load_top(*stack, ty, true)?.into())
            }
            StmtKind::StackAccAdjoint { stack, value } => {
                self.lower_stack_acc_adjoint(*stack, *value)?;
                None
            }

            // -- Tasks --
            StmtKind::Offloaded(_) => {
                return Err(CodegenError::invariant(format!(
                    "offloaded task {id:?} nested inside another task"
                )))
            }
        };
        if let Some(lowered) = lowered {
            self.record(id, lowered)?;
        }
        Ok(())
    }
}

/// Machine type of values of `dt`: custom types compute in their compute
/// type, pointers of any kind are `ptr`.
pub(crate) fn machine_ty(dt: &DataType) -> Ty {
    match dt {
        DataType::Void => Ty::Void,
        DataType::Primitive(p) => Ty::of_primitive(*p),
        DataType::CustomInt(c) => Ty::of_primitive(c.compute_type()),
        DataType::CustomFloat(c) => Ty::of_primitive(c.compute_type()),
        DataType::Pointer { .. } => Ty::Ptr,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
