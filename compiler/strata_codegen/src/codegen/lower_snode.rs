//! Structure traversal: root access, per-level lookups, child access, node
//! operations and loop indices.
//!
//! Container levels go through their runtime node methods; bit-level nodes
//! never touch the runtime and turn into bit pointer arithmetic instead.

use strata_ir::{DataType, SNodeId, SNodeKind, SNodeOpType, StmtId};
use strata_rt::{NodeMethod, RuntimeFn};

use super::{BitPtr, KernelCodegen, Lowered, LoopVar};
use crate::backend::{Intrinsic, Ty, ValueId};
use crate::error::{CodegenError, CodegenResult};

impl KernelCodegen<'_> {
    pub(super) fn lower_get_root(&mut self) -> CodegenResult<ValueId> {
        let runtime = self.runtime_ptr()?;
        Ok(self.builder.call_runtime(RuntimeFn::RuntimeGetRoot, &[runtime]))
    }

    /// Element `input_index` of the node `snode` at `input_snode`.
    pub(super) fn lower_snode_lookup(
        &mut self,
        snode: SNodeId,
        input_snode: StmtId,
        input_index: StmtId,
        activate: bool,
    ) -> CodegenResult<Lowered> {
        let tree = self.tree;
        let node = &tree[snode];
        let parent = self.value(input_snode)?;
        let index = self.value(input_index)?;
        let index = self.builder.int_cast(index, Ty::I32, true);
        match node.kind {
            SNodeKind::Root => {
                let b = &mut self.builder;
                let index = b.int_cast(index, Ty::I64, true);
                let cell_size = b.const_i64(tree.layout(snode).cell_size as i64);
                let offset = b.mul(index, cell_size);
                Ok(b.ptr_add(parent, offset).into())
            }
            SNodeKind::Dense
            | SNodeKind::Pointer
            | SNodeKind::Dynamic
            | SNodeKind::Bitmasked
            | SNodeKind::Hash => {
                if activate {
                    self.call_node_method(snode, NodeMethod::Activate, parent, &[index])?;
                }
                Ok(self
                    .call_node_method(snode, NodeMethod::LookupElement, parent, &[index])?
                    .into())
            }
            SNodeKind::BitStruct => Ok(parent.into()),
            SNodeKind::BitArray => {
                let element_bits = node
                    .children
                    .first()
                    .map(|&c| tree[c].field_bits())
                    .filter(|&bits| bits > 0)
                    .ok_or_else(|| CodegenError::invariant(format!("{snode} has no custom int element")))?;
                let b = &mut self.builder;
                let bits = b.const_i32(element_bits as i32);
                let offset = b.mul(index, bits);
                Ok(BitPtr::new(b, parent, Some(offset)).into())
            }
            SNodeKind::Place => Err(CodegenError::unsupported(format!("lookup into place {snode}"))),
        }
    }

    /// Child `chid` of the cell of `input_snode` at `input_ptr`.
    pub(super) fn lower_get_ch(
        &mut self,
        input_ptr: StmtId,
        input_snode: SNodeId,
        chid: usize,
        ty: &DataType,
    ) -> CodegenResult<Lowered> {
        let tree = self.tree;
        let parent = &tree[input_snode];
        let child = parent
            .children
            .get(chid)
            .copied()
            .ok_or_else(|| CodegenError::invariant(format!("{input_snode} has no child {chid}")))?;
        let bit_level = matches!(parent.kind, SNodeKind::BitStruct | SNodeKind::BitArray);
        if ty.is_bit_pointer() != bit_level {
            return Err(CodegenError::invariant(format!(
                "child access of {} node {input_snode} typed {ty}",
                parent.kind
            )));
        }
        match parent.kind {
            SNodeKind::BitArray => Ok(Lowered::BitPtr(self.bit_ptr(input_ptr)?)),
            SNodeKind::BitStruct => {
                let word = self.value(input_ptr)?;
                Ok(BitPtr::at(&mut self.builder, word, tree[child].bit_offset).into())
            }
            _ => {
                let cell = self.value(input_ptr)?;
                Ok(self
                    .builder
                    .call_runtime(RuntimeFn::FromParentElement(child), &[cell])
                    .into())
            }
        }
    }

    pub(super) fn lower_snode_op(
        &mut self,
        op: SNodeOpType,
        snode: SNodeId,
        ptr: StmtId,
        index: Option<StmtId>,
        value: Option<StmtId>,
    ) -> CodegenResult<Option<ValueId>> {
        let node_ptr = self.value(ptr)?;
        let index = match index {
            Some(i) => {
                let i = self.value(i)?;
                self.builder.int_cast(i, Ty::I32, true)
            }
            None => self.builder.const_i32(0),
        };
        let kind = self.tree[snode].kind;
        match op {
            SNodeOpType::IsActive => self
                .call_node_method(snode, NodeMethod::IsActive, node_ptr, &[index])
                .map(Some),
            SNodeOpType::Activate => {
                self.call_node_method(snode, NodeMethod::Activate, node_ptr, &[index])?;
                Ok(None)
            }
            SNodeOpType::Deactivate => {
                // A dynamic node deactivates as a whole.
                let index = if kind == SNodeKind::Dynamic {
                    self.builder.const_i32(0)
                } else {
                    index
                };
                self.call_node_method(snode, NodeMethod::Deactivate, node_ptr, &[index])?;
                Ok(None)
            }
            SNodeOpType::Append => {
                let value = value
                    .ok_or_else(|| CodegenError::invariant(format!("append to {snode} without a value")))?;
                let value = self.value(value)?;
                let value = self.builder.int_cast(value, Ty::I32, true);
                self.call_node_method(snode, NodeMethod::Append, node_ptr, &[value])
                    .map(Some)
            }
            SNodeOpType::Length => self
                .call_node_method(snode, NodeMethod::GetNumElements, node_ptr, &[])
                .map(Some),
        }
    }

    pub(super) fn lower_clear_list(&mut self, snode: SNodeId) -> CodegenResult<()> {
        let runtime = self.runtime_ptr()?;
        let id = self.builder.const_i32(snode.raw() as i32);
        self.builder.call_runtime(RuntimeFn::ClearList, &[runtime, id]);
        Ok(())
    }

    // -- Loop context --

    pub(super) fn lower_loop_index(&mut self, loop_: StmtId, index: usize) -> CodegenResult<ValueId> {
        let var = self.loop_var(loop_)?;
        let b = &mut self.builder;
        Ok(match var {
            LoopVar::Slot(slot) => b.load(Ty::I32, slot),
            LoopVar::Value(v) => v,
            LoopVar::StructFor { coords, .. } => {
                let at = b.ptr_offset(coords, index as u64 * 4);
                b.load(Ty::I32, at)
            }
        })
    }

    pub(super) fn lower_loop_linear_index(&mut self, loop_: StmtId) -> CodegenResult<ValueId> {
        match self.loop_var(loop_)? {
            LoopVar::StructFor { .. } => Ok(self.builder.intrinsic(Intrinsic::ThreadIdx, &[])),
            _ => Err(CodegenError::unsupported(format!(
                "linear loop index of non-struct-for {loop_:?}"
            ))),
        }
    }

    pub(super) fn lower_block_corner_index(
        &mut self,
        loop_: StmtId,
        index: usize,
    ) -> CodegenResult<ValueId> {
        match self.loop_var(loop_)? {
            LoopVar::StructFor { parent_coords, .. } => {
                let b = &mut self.builder;
                let at = b.ptr_offset(parent_coords, index as u64 * 4);
                Ok(b.load(Ty::I32, at))
            }
            _ => Err(CodegenError::unsupported(format!(
                "block corner index of non-struct-for {loop_:?}"
            ))),
        }
    }

    /// Lanes per block: a machine query on GPU targets, the task's block
    /// dimension elsewhere.
    pub(super) fn lower_block_dim(&mut self) -> CodegenResult<ValueId> {
        if self.config.arch.is_gpu() {
            return Ok(self.builder.intrinsic(Intrinsic::BlockDim, &[]));
        }
        let requested = self
            .current_task
            .as_ref()
            .and_then(|(task, _)| self.ir.graph.offload(*task))
            .map_or(0, |o| o.block_dim);
        let block_dim = self.config.block_dim(requested);
        Ok(self.builder.const_i32(block_dim as i32))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
