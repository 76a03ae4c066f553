//! Struct-for tasks: a body function over active-list elements, launched
//! through the runtime's parallel struct-for drivers.
//!
//! The body function has the signature
//! `(context, tls, element, lower, upper) -> void` and walks the cell
//! indices `[lower, upper)` of the list element's node. On GPU targets each
//! lane starts at `lower + thread_idx` and strides by the block dimension.

use strata_ir::{Offload, SNodeId, SNodeKind, StmtId};
use strata_rt::{abi, NodeMethod, RuntimeFn};

use super::{KernelCodegen, LoopContext, LoopVar};
use crate::backend::{IntPredicate, Intrinsic, Ty, ValueId};
use crate::error::{CodegenError, CodegenResult};

impl<'a> KernelCodegen<'a> {
    /// Node whose active list a struct-for over `leaf` iterates.
    ///
    /// Bit arrays are walked one physical word at a time, so their loop runs
    /// over the dense parent.
    pub(crate) fn struct_for_list_node(&self, leaf: SNodeId) -> CodegenResult<SNodeId> {
        let node = &self.tree[leaf];
        if node.kind != SNodeKind::BitArray {
            return Ok(leaf);
        }
        match node.parent {
            Some(parent) if self.tree[parent].kind == SNodeKind::Dense => Ok(parent),
            _ => Err(CodegenError::invariant(format!(
                "struct-for over bit array {leaf} needs a dense parent"
            ))),
        }
    }

    /// Emit the body of a struct-for task and its launch call.
    pub(super) fn lower_struct_for_task(
        &mut self,
        id: StmtId,
        task: &'a Offload,
        name: &str,
    ) -> CodegenResult<()> {
        let leaf = task
            .snode
            .ok_or_else(|| CodegenError::invariant(format!("struct-for task {name} has no node")))?;
        let list_node = self.struct_for_list_node(leaf)?;

        let body = self.with_function(
            &format!("{name}_body"),
            &[Ty::Ptr, Ty::Ptr, Ty::Ptr, Ty::I32, Ty::I32],
            true,
            |cg| cg.emit_struct_for_body(id, task, leaf, list_node),
        )?;

        let config = self.config;
        let block_dim = config.block_dim(task.block_dim);
        let max_elements = self.tree.max_num_elements(list_node);
        let element_size = max_elements.min(u64::from(config.listgen_max_element_size)).max(1) as u32;
        let split = (element_size / block_dim.max(1)).max(1);
        let threads = if task.num_cpu_threads == 0 {
            config.num_cpu_threads
        } else {
            task.num_cpu_threads
        };
        tracing::debug!(
            task = name,
            node = %list_node,
            element_size,
            split,
            "struct-for launch"
        );

        let entry = if config.arch.is_gpu() {
            Some(self.gpu_struct_for_entry(name, task.tls_size)?)
        } else {
            None
        };
        let ctx = self.context()?;
        let b = &mut self.builder;
        let snode = b.const_i32(list_node.raw() as i32);
        let es = b.const_i32(element_size as i32);
        let split = b.const_i32(split as i32);
        let body = b.func_addr(body);
        let tls_size = b.const_i32(task.tls_size as i32);
        let threads = b.const_i32(threads as i32);
        match entry {
            Some(entry) => b.call_function(entry, &[ctx, snode, es, split, body, tls_size, threads]),
            None => b.call_runtime(
                RuntimeFn::ParallelStructFor,
                &[ctx, snode, es, split, body, tls_size, threads],
            ),
        };
        Ok(())
    }

    fn emit_struct_for_body(
        &mut self,
        id: StmtId,
        task: &'a Offload,
        leaf: SNodeId,
        list_node: SNodeId,
    ) -> CodegenResult<()> {
        let function = self.frame()?.function;
        let gpu = self.config.arch.is_gpu();
        let counter = self.entry_slot(Ty::I32, 1, 4)?;
        let coords = self.entry_slot(Ty::I32, abi::coordinates::NUM_AXES as u32, 4)?;

        let b = &mut self.builder;
        let element = b.param(function, 2);
        let lower = b.param(function, 3);
        let upper = b.param(function, 4);
        let node_at = b.ptr_offset(element, abi::element::ELEMENT);
        let node_ptr = b.load(Ty::Ptr, node_at);
        let parent_coords = b.ptr_offset(element, abi::element::PCOORD);

        if let Some(block) = &task.tls_prologue {
            self.lower_block(block)?;
        }
        if let Some(block) = &task.bls_prologue {
            self.builder.call_runtime(RuntimeFn::BlockBarrier, &[]);
            self.lower_block(block)?;
            self.builder.call_runtime(RuntimeFn::BlockBarrier, &[]);
        }

        let b = &mut self.builder;
        let (first, step) = if gpu {
            let lane = b.intrinsic(Intrinsic::ThreadIdx, &[]);
            (b.add(lower, lane), b.intrinsic(Intrinsic::BlockDim, &[]))
        } else {
            (lower, b.const_i32(1))
        };
        b.store(first, counter);

        let test = b.append_block(function, "loop_test");
        let loop_body = b.append_block(function, "loop_body");
        let struct_for_body = b.append_block(function, "struct_for_body_body");
        let tail = b.append_block(function, "loop_body_tail");
        let exit = b.append_block(function, "func_exit");
        b.br(test);

        b.position_at_end(test);
        let i = b.load(Ty::I32, counter);
        let more = b.icmp(IntPredicate::Slt, i, upper);
        b.cond_br(more, loop_body, exit);

        b.position_at_end(loop_body);
        b.call_runtime(RuntimeFn::RefineCoordinates(list_node), &[parent_coords, coords, i]);
        let exec = self.struct_for_exec_cond(list_node, coords, node_ptr, i)?;
        if leaf != list_node {
            self.widen_to_bit_array(coords, leaf);
        }
        self.builder.cond_br(exec, struct_for_body, tail);

        self.builder.position_at_end(struct_for_body);
        self.set_loop_var(id, LoopVar::StructFor { coords, parent_coords });
        self.push_loop(LoopContext {
            scope: id,
            reentry: tail,
            after_while: None,
        })?;
        let result = self.lower_block(&task.body);
        self.pop_loop()?;
        result?;
        if !self.builder.is_terminated() {
            self.builder.br(tail);
        }

        let b = &mut self.builder;
        b.position_at_end(tail);
        let i = b.load(Ty::I32, counter);
        let next = b.add(i, step);
        b.store(next, counter);
        b.br(test);

        b.position_at_end(exit);
        if let Some(block) = &task.bls_epilogue {
            self.builder.call_runtime(RuntimeFn::BlockBarrier, &[]);
            self.lower_block(block)?;
            self.builder.call_runtime(RuntimeFn::BlockBarrier, &[]);
        }
        if let Some(block) = &task.tls_epilogue {
            self.lower_block(block)?;
        }
        Ok(())
    }

    /// Shift word coordinates of a bit array's parent to the coordinates of
    /// the first element in that word.
    fn widen_to_bit_array(&mut self, coords: ValueId, bit_array: SNodeId) {
        let tree = self.tree;
        let b = &mut self.builder;
        for axis in &tree[bit_array].axes {
            let at = b.ptr_offset(coords, u64::from(axis.axis) * 4);
            let c = b.load(Ty::I32, at);
            let bits = b.const_i32(axis.bits as i32);
            let widened = b.shl(c, bits);
            b.store(widened, at);
        }
    }

    /// Whether cell `index` of `node_ptr` runs the body: padded cells of
    /// non power-of-two axes are skipped, and so are inactive cells of
    /// sparse nodes.
    fn struct_for_exec_cond(
        &mut self,
        snode: SNodeId,
        coords: ValueId,
        node_ptr: ValueId,
        index: ValueId,
    ) -> CodegenResult<ValueId> {
        let tree = self.tree;
        let node = &tree[snode];
        let mut exec = self.builder.const_bool(true);
        for axis in node.axes.iter().filter(|a| !a.is_pot()) {
            let b = &mut self.builder;
            let at = b.ptr_offset(coords, u64::from(axis.axis) * 4);
            let c = b.load(Ty::I32, at);
            let mask = b.const_i32(((1u64 << axis.bits) - 1) as i32);
            let local = b.and(c, mask);
            let extent = b.const_i32(axis.extent as i32);
            let inside = b.icmp(IntPredicate::Slt, local, extent);
            exec = b.and(exec, inside);
        }
        if matches!(node.kind, SNodeKind::Bitmasked | SNodeKind::Pointer) {
            let active = self.call_node_method(snode, NodeMethod::IsActive, node_ptr, &[index])?;
            let active = self.builder.is_nonzero(active);
            exec = self.builder.and(exec, active);
        }
        Ok(exec)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
