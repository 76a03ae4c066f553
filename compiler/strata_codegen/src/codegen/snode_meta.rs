//! Node metadata objects and node method dispatch.
//!
//! Runtime node methods take a metadata record describing the node (id,
//! element size, capacity, method table) next to the node instance. Each
//! generated function builds the record of every node it touches once, in
//! its entry block, following the layout in `strata_rt::abi::meta`.

use strata_ir::SNodeId;
use strata_rt::{abi, NodeMethod, RuntimeFn};

use super::runtime_decl;
use super::KernelCodegen;
use crate::backend::{IrBuilder, Ty, ValueId};
use crate::error::{CodegenError, CodegenResult};

impl KernelCodegen<'_> {
    /// Metadata record of `snode` for the current function.
    pub(crate) fn node_meta(&mut self, snode: SNodeId) -> CodegenResult<ValueId> {
        if let Some(&meta) = self.frame()?.metas.get(&snode) {
            return Ok(meta);
        }
        let node = &self.tree[snode];
        if !node.kind.is_container() {
            return Err(CodegenError::unsupported(format!(
                "node methods of {} node {snode}",
                node.kind
            )));
        }
        let kind = node.kind;
        let layout = self.tree.layout(snode);
        let morton = i32::from(node.morton);
        let chunk_size = u64::from(node.chunk_size);
        let context = self.context()?;

        let meta = self.in_entry(|b| {
            let meta = b.alloca(Ty::I8, abi::meta::SIZE as u32, 8);
            let store = |b: &mut IrBuilder, offset: u64, value: ValueId| {
                let slot = b.ptr_offset(meta, offset);
                b.store(value, slot);
            };

            let id = b.const_i32(snode.raw() as i32);
            store(b, abi::meta::SNODE_ID, id);
            let morton = b.const_i32(morton);
            store(b, abi::meta::MORTON_DIM, morton);
            let element_size = b.const_i64(layout.cell_size as i64);
            store(b, abi::meta::ELEMENT_SIZE, element_size);
            let max = b.const_i64(layout.max_num_elements as i64);
            store(b, abi::meta::MAX_NUM_ELEMENTS, max);
            store(b, abi::meta::CONTEXT, context);
            let chunk = b.const_i64(chunk_size as i64);
            store(b, abi::meta::CHUNK_SIZE, chunk);

            for (method, offset) in [
                (NodeMethod::LookupElement, abi::meta::LOOKUP_ELEMENT),
                (NodeMethod::IsActive, abi::meta::IS_ACTIVE),
                (NodeMethod::GetNumElements, abi::meta::GET_NUM_ELEMENTS),
            ] {
                let addr = if method.is_defined_for(kind) {
                    b.runtime_addr(RuntimeFn::Node(kind, method))
                } else {
                    b.null()
                };
                store(b, offset, addr);
            }
            let from_parent = b.runtime_addr(RuntimeFn::FromParentElement(snode));
            store(b, abi::meta::FROM_PARENT_ELEMENT, from_parent);
            let refine = b.runtime_addr(RuntimeFn::RefineCoordinates(snode));
            store(b, abi::meta::REFINE_COORDINATES, refine);
            meta
        })?;

        self.frame_mut()?.metas.insert(snode, meta);
        Ok(meta)
    }

    /// Call node method `method` of `snode` on the node instance `node_ptr`.
    ///
    /// The method is resolved by its runtime symbol name, so a kind without
    /// that method fails with [`CodegenError::MissingRuntimeSymbol`].
    pub(crate) fn call_node_method(
        &mut self,
        snode: SNodeId,
        method: NodeMethod,
        node_ptr: ValueId,
        args: &[ValueId],
    ) -> CodegenResult<ValueId> {
        let kind = self.tree[snode].kind;
        let f = runtime_decl::resolve(&format!("{}_{}", kind.runtime_name(), method.name()))?;
        let meta = self.node_meta(snode)?;
        let mut operands = vec![meta, node_ptr];
        operands.extend_from_slice(args);
        Ok(self.builder.call_runtime(f, &operands))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
