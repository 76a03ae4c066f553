//! `KernelBuilder`: convenience construction of kernel IR.
//!
//! The builder keeps a stack of open blocks; every `push` appends to the
//! innermost one. Nested constructs (`if_`, `while_`, tasks) open a block,
//! run a closure, and attach the closed block to their statement.
//!
//! Besides one method per statement kind it offers two front-end style
//! helpers: [`KernelBuilder::snode_access`] emits the canonical root-to-field
//! traversal for a set of global coordinates, and
//! [`KernelBuilder::struct_for_task`] emits the list-generation tasks a
//! struct-for depends on.

use smallvec::SmallVec;

use crate::ops::{AtomicOpType, BinaryOpType, SNodeOpType, UnaryOpType};
use crate::snode::{SNodeId, SNodeKind, SNodeTree, MAX_NUM_AXES};
use crate::stmt::{Block, IrGraph, Offload, PrintItem, RangeBound, StmtId, StmtKind, TaskKind};
use crate::types::{DataType, PrimitiveType};

/// A finished kernel: statement arena plus the root list of tasks.
#[derive(Clone, Debug)]
pub struct KernelIr {
    pub graph: IrGraph,
    pub body: Block,
}

pub struct KernelBuilder {
    graph: IrGraph,
    blocks: Vec<Block>,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    pub fn new() -> Self {
        KernelBuilder {
            graph: IrGraph::new(),
            blocks: vec![Block::new()],
        }
    }

    pub fn graph(&self) -> &IrGraph {
        &self.graph
    }

    pub fn finish(mut self) -> KernelIr {
        let body = self.blocks.pop().unwrap_or_default();
        debug_assert!(self.blocks.is_empty(), "unbalanced block stack");
        KernelIr {
            graph: self.graph,
            body,
        }
    }

    /// Append a statement to the innermost open block.
    pub fn push(&mut self, kind: StmtKind, ret_type: DataType) -> StmtId {
        let id = self.graph.push(kind, ret_type);
        if let Some(block) = self.blocks.last_mut() {
            block.push(id);
        }
        id
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self)) -> Block {
        self.blocks.push(Block::new());
        f(self);
        self.blocks.pop().unwrap_or_default()
    }

    fn ret_type(&self, id: StmtId) -> DataType {
        self.graph[id].ret_type.clone()
    }

    // -- Constants and values --

    pub fn constant(&mut self, ty: PrimitiveType, bits: u64) -> StmtId {
        self.push(StmtKind::Const { bits }, ty.into())
    }

    pub fn const_i32(&mut self, v: i32) -> StmtId {
        self.constant(PrimitiveType::I32, u64::from(v as u32))
    }

    pub fn const_u32(&mut self, v: u32) -> StmtId {
        self.constant(PrimitiveType::U32, u64::from(v))
    }

    pub fn const_i64(&mut self, v: i64) -> StmtId {
        self.constant(PrimitiveType::I64, v as u64)
    }

    pub fn const_u64(&mut self, v: u64) -> StmtId {
        self.constant(PrimitiveType::U64, v)
    }

    pub fn const_f32(&mut self, v: f32) -> StmtId {
        self.constant(PrimitiveType::F32, u64::from(v.to_bits()))
    }

    pub fn const_f64(&mut self, v: f64) -> StmtId {
        self.constant(PrimitiveType::F64, v.to_bits())
    }

    pub fn rand(&mut self, ty: PrimitiveType) -> StmtId {
        self.push(StmtKind::Rand, ty.into())
    }

    pub fn arg(&mut self, arg_id: u32, ty: impl Into<DataType>) -> StmtId {
        self.push(StmtKind::ArgLoad { arg_id, is_ptr: false }, ty.into())
    }

    /// Pointer argument addressing an external array of `element`.
    pub fn arg_ptr(&mut self, arg_id: u32, element: PrimitiveType) -> StmtId {
        self.push(
            StmtKind::ArgLoad { arg_id, is_ptr: true },
            DataType::ptr_to(element.into()),
        )
    }

    pub fn kernel_return(&mut self, value: StmtId) -> StmtId {
        self.push(StmtKind::KernelReturn { value }, DataType::Void)
    }

    pub fn unary(&mut self, op: UnaryOpType, operand: StmtId) -> StmtId {
        let ty = self.ret_type(operand);
        self.push(StmtKind::UnaryOp { op, operand }, ty)
    }

    pub fn cast(&mut self, operand: StmtId, to: impl Into<DataType>) -> StmtId {
        self.push(
            StmtKind::UnaryOp { op: UnaryOpType::CastValue, operand },
            to.into(),
        )
    }

    pub fn cast_bits(&mut self, operand: StmtId, to: impl Into<DataType>) -> StmtId {
        self.push(
            StmtKind::UnaryOp { op: UnaryOpType::CastBits, operand },
            to.into(),
        )
    }

    /// Comparisons produce `i32`; everything else takes the left operand type.
    pub fn binary(&mut self, op: BinaryOpType, lhs: StmtId, rhs: StmtId) -> StmtId {
        let ty = if op.is_comparison() {
            DataType::I32
        } else {
            self.ret_type(lhs)
        };
        self.push(StmtKind::BinaryOp { op, lhs, rhs }, ty)
    }

    pub fn select(&mut self, cond: StmtId, lhs: StmtId, rhs: StmtId) -> StmtId {
        let ty = self.ret_type(lhs);
        self.push(StmtKind::Select { cond, lhs, rhs }, ty)
    }

    pub fn bit_extract(&mut self, input: StmtId, begin: u32, end: u32) -> StmtId {
        self.push(StmtKind::BitExtract { input, begin, end }, DataType::I32)
    }

    pub fn linearize(&mut self, inputs: &[StmtId], strides: &[u32]) -> StmtId {
        debug_assert_eq!(inputs.len(), strides.len());
        self.push(
            StmtKind::Linearize {
                inputs: inputs.iter().copied().collect(),
                strides: strides.iter().copied().collect(),
            },
            DataType::I32,
        )
    }

    pub fn range_assumption(&mut self, input: StmtId, base: StmtId, low: i32, high: i32) -> StmtId {
        let ty = self.ret_type(input);
        self.push(StmtKind::RangeAssumption { input, base, low, high }, ty)
    }

    pub fn loop_unique(&mut self, input: StmtId) -> StmtId {
        let ty = self.ret_type(input);
        self.push(StmtKind::LoopUnique { input }, ty)
    }

    // -- Locals --

    pub fn alloca(&mut self, ty: impl Into<DataType>) -> StmtId {
        self.push(StmtKind::Alloca, DataType::ptr_to(ty.into()))
    }

    pub fn local_load(&mut self, ptr: StmtId) -> StmtId {
        let ty = self.graph[ptr]
            .ret_type
            .pointee()
            .cloned()
            .unwrap_or(DataType::Void);
        self.push(StmtKind::LocalLoad { ptr }, ty)
    }

    pub fn local_store(&mut self, ptr: StmtId, value: StmtId) -> StmtId {
        self.push(StmtKind::LocalStore { ptr, value }, DataType::Void)
    }

    // -- Control flow --

    pub fn if_(&mut self, cond: StmtId, then: impl FnOnce(&mut Self)) -> StmtId {
        let true_block = Some(self.nested(then));
        self.push(
            StmtKind::If {
                cond,
                true_block,
                false_block: None,
            },
            DataType::Void,
        )
    }

    pub fn if_else(
        &mut self,
        cond: StmtId,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> StmtId {
        let true_block = Some(self.nested(then));
        let false_block = Some(self.nested(otherwise));
        self.push(
            StmtKind::If {
                cond,
                true_block,
                false_block,
            },
            DataType::Void,
        )
    }

    /// `while (true) { body }`; the closure receives the loop statement.
    pub fn while_(&mut self, body: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        let id = self.push(StmtKind::While { body: Block::new() }, DataType::Void);
        let block = self.nested(|b| body(b, id));
        if let StmtKind::While { body } = &mut self.graph.get_mut(id).kind {
            *body = block;
        }
        id
    }

    pub fn while_control(&mut self, cond: StmtId) -> StmtId {
        self.push(StmtKind::WhileControl { cond }, DataType::Void)
    }

    pub fn continue_(&mut self, scope: StmtId) -> StmtId {
        self.push(StmtKind::Continue { scope }, DataType::Void)
    }

    /// Serial counted loop; the closure receives the loop statement, whose
    /// index is read with [`KernelBuilder::loop_index`].
    pub fn range_for(
        &mut self,
        begin: StmtId,
        end: StmtId,
        reversed: bool,
        body: impl FnOnce(&mut Self, StmtId),
    ) -> StmtId {
        let id = self.push(
            StmtKind::RangeFor {
                begin,
                end,
                reversed,
                body: Block::new(),
            },
            DataType::Void,
        );
        let block = self.nested(|b| body(b, id));
        if let StmtKind::RangeFor { body, .. } = &mut self.graph.get_mut(id).kind {
            *body = block;
        }
        id
    }

    pub fn loop_index(&mut self, loop_: StmtId, index: usize) -> StmtId {
        self.push(StmtKind::LoopIndex { loop_, index }, DataType::I32)
    }

    pub fn loop_linear_index(&mut self, loop_: StmtId) -> StmtId {
        self.push(StmtKind::LoopLinearIndex { loop_ }, DataType::I32)
    }

    pub fn block_corner_index(&mut self, loop_: StmtId, index: usize) -> StmtId {
        self.push(StmtKind::BlockCornerIndex { loop_, index }, DataType::I32)
    }

    pub fn block_dim(&mut self) -> StmtId {
        self.push(StmtKind::BlockDim, DataType::I32)
    }

    // -- Diagnostics --

    pub fn print(&mut self, contents: Vec<PrintItem>) -> StmtId {
        self.push(StmtKind::Print { contents }, DataType::Void)
    }

    pub fn assert(&mut self, cond: StmtId, message: &str, args: &[StmtId]) -> StmtId {
        self.push(
            StmtKind::Assert {
                cond,
                message: message.to_owned(),
                args: args.to_vec(),
            },
            DataType::Void,
        )
    }

    // -- Global memory --

    pub fn get_root(&mut self) -> StmtId {
        self.push(StmtKind::GetRoot, DataType::raw_ptr())
    }

    pub fn snode_lookup(
        &mut self,
        snode: SNodeId,
        input_snode: StmtId,
        input_index: StmtId,
        activate: bool,
        ret_type: DataType,
    ) -> StmtId {
        self.push(
            StmtKind::SNodeLookup {
                snode,
                input_snode,
                input_index,
                activate,
            },
            ret_type,
        )
    }

    pub fn get_ch(
        &mut self,
        input_ptr: StmtId,
        input_snode: SNodeId,
        chid: usize,
        ret_type: DataType,
    ) -> StmtId {
        self.push(
            StmtKind::GetCh {
                input_ptr,
                input_snode,
                chid,
            },
            ret_type,
        )
    }

    pub fn global_load(&mut self, ptr: StmtId) -> StmtId {
        let ty = self.graph[ptr]
            .ret_type
            .pointee()
            .cloned()
            .unwrap_or(DataType::Void);
        let ty = match ty {
            DataType::CustomInt(c) => c.compute_type().into(),
            DataType::CustomFloat(c) => c.compute_type().into(),
            other => other,
        };
        self.push(StmtKind::GlobalLoad { ptr }, ty)
    }

    pub fn global_store(&mut self, ptr: StmtId, value: StmtId) -> StmtId {
        self.push(StmtKind::GlobalStore { ptr, value }, DataType::Void)
    }

    pub fn bit_struct_store(
        &mut self,
        ptr: StmtId,
        bit_struct: SNodeId,
        ch_ids: &[usize],
        values: &[StmtId],
    ) -> StmtId {
        debug_assert_eq!(ch_ids.len(), values.len());
        self.push(
            StmtKind::BitStructStore {
                ptr,
                bit_struct,
                ch_ids: ch_ids.to_vec(),
                values: values.to_vec(),
            },
            DataType::Void,
        )
    }

    /// Atomic update; yields the previous value.
    pub fn atomic(&mut self, op: AtomicOpType, dest: StmtId, value: StmtId) -> StmtId {
        let ty = self.ret_type(value);
        self.push(StmtKind::AtomicOp { op, dest, value }, ty)
    }

    pub fn snode_op(
        &mut self,
        op: SNodeOpType,
        snode: SNodeId,
        ptr: StmtId,
        index: Option<StmtId>,
        value: Option<StmtId>,
    ) -> StmtId {
        let ty = match op {
            SNodeOpType::IsActive | SNodeOpType::Append | SNodeOpType::Length => DataType::I32,
            SNodeOpType::Activate | SNodeOpType::Deactivate => DataType::Void,
        };
        self.push(
            StmtKind::SNodeOp {
                op,
                snode,
                ptr,
                index,
                value,
            },
            ty,
        )
    }

    pub fn external_ptr(&mut self, base: StmtId, indices: &[StmtId]) -> StmtId {
        let ty = self.ret_type(base);
        self.push(
            StmtKind::ExternalPtr {
                base,
                indices: indices.iter().copied().collect(),
            },
            ty,
        )
    }

    pub fn external_shape(&mut self, arg_id: u32, axis: u32) -> StmtId {
        self.push(
            StmtKind::ExternalTensorShapeAlongAxis { arg_id, axis },
            DataType::I32,
        )
    }

    pub fn global_temporary(&mut self, offset: u64, ty: PrimitiveType) -> StmtId {
        self.push(
            StmtKind::GlobalTemporary { offset },
            DataType::ptr_to(ty.into()),
        )
    }

    pub fn thread_local_ptr(&mut self, offset: u64, ty: PrimitiveType) -> StmtId {
        self.push(
            StmtKind::ThreadLocalPtr { offset },
            DataType::ptr_to(ty.into()),
        )
    }

    pub fn block_local_ptr(&mut self, offset: StmtId, ty: PrimitiveType) -> StmtId {
        self.push(
            StmtKind::BlockLocalPtr { offset },
            DataType::ptr_to(ty.into()),
        )
    }

    // -- Runtime services --

    pub fn clear_list(&mut self, snode: SNodeId) -> StmtId {
        self.push(StmtKind::ClearList { snode }, DataType::Void)
    }

    pub fn internal_func(&mut self, name: &str) -> StmtId {
        self.push(
            StmtKind::InternalFunc {
                name: name.to_owned(),
            },
            DataType::I32,
        )
    }

    pub fn stack_alloca(&mut self, element: PrimitiveType, max_size: u32) -> StmtId {
        self.push(StmtKind::StackAlloca { max_size, element }, DataType::raw_ptr())
    }

    fn stack_element(&self, stack: StmtId) -> DataType {
        match &self.graph[stack].kind {
            StmtKind::StackAlloca { element, .. } => (*element).into(),
            _ => DataType::Void,
        }
    }

    pub fn stack_push(&mut self, stack: StmtId, value: StmtId) -> StmtId {
        self.push(StmtKind::StackPush { stack, value }, DataType::Void)
    }

    pub fn stack_pop(&mut self, stack: StmtId) -> StmtId {
        self.push(StmtKind::StackPop { stack }, DataType::Void)
    }

    pub fn stack_load_top(&mut self, stack: StmtId) -> StmtId {
        let ty = self.stack_element(stack);
        self.push(StmtKind::StackLoadTop { stack }, ty)
    }

    pub fn stack_load_top_adj(&mut self, stack: StmtId) -> StmtId {
        let ty = self.stack_element(stack);
        self.push(StmtKind::StackLoadTopAdj { stack }, ty)
    }

    pub fn stack_acc_adjoint(&mut self, stack: StmtId, value: StmtId) -> StmtId {
        self.push(StmtKind::StackAccAdjoint { stack, value }, DataType::Void)
    }

    // -- Tasks --

    /// Open an offloaded task; the closure fills the body and receives the
    /// task statement for loop-index references.
    pub fn offload(&mut self, task: Offload, body: impl FnOnce(&mut Self, StmtId)) -> StmtId {
        let id = self.push(StmtKind::Offloaded(Box::new(task)), DataType::Void);
        let block = self.nested(|b| body(b, id));
        if let Some(task) = self.offload_mut(id) {
            task.body = block;
        }
        id
    }

    fn offload_mut(&mut self, id: StmtId) -> Option<&mut Offload> {
        match &mut self.graph.get_mut(id).kind {
            StmtKind::Offloaded(o) => Some(o),
            _ => None,
        }
    }

    pub fn serial_task(&mut self, body: impl FnOnce(&mut Self)) -> StmtId {
        self.offload(Offload::new(TaskKind::Serial), |b, _| body(b))
    }

    pub fn range_for_task(
        &mut self,
        begin: RangeBound,
        end: RangeBound,
        body: impl FnOnce(&mut Self, StmtId),
    ) -> StmtId {
        let mut task = Offload::new(TaskKind::RangeFor);
        task.begin = begin;
        task.end = end;
        self.offload(task, body)
    }

    /// Struct-for over the active elements of `leaf`, preceded by the
    /// clear-list and list-generation tasks for every level above it.
    pub fn struct_for_task(
        &mut self,
        tree: &SNodeTree,
        leaf: SNodeId,
        body: impl FnOnce(&mut Self, StmtId),
    ) -> StmtId {
        let list_leaf = if tree[leaf].kind == SNodeKind::BitArray {
            tree[leaf].parent.unwrap_or(leaf)
        } else {
            leaf
        };
        for &node in tree.path_to(list_leaf).iter().skip(1) {
            self.serial_task(|b| {
                b.clear_list(node);
            });
            let mut listgen = Offload::new(TaskKind::Listgen);
            listgen.snode = Some(node);
            self.offload(listgen, |_, _| {});
        }
        let mut task = Offload::new(TaskKind::StructFor);
        task.snode = Some(leaf);
        self.offload(task, body)
    }

    pub fn gc_task(&mut self, snode: SNodeId) -> StmtId {
        let mut task = Offload::new(TaskKind::Gc);
        task.snode = Some(snode);
        self.offload(task, |_, _| {})
    }

    /// Adjust the launch parameters of a task.
    pub fn configure_task(&mut self, task: StmtId, f: impl FnOnce(&mut Offload)) {
        if let Some(o) = self.offload_mut(task) {
            f(o);
        }
    }

    /// Attach a thread-local buffer with prologue and epilogue blocks.
    pub fn task_tls(
        &mut self,
        task: StmtId,
        size: u32,
        prologue: impl FnOnce(&mut Self),
        epilogue: impl FnOnce(&mut Self),
    ) {
        let pro = self.nested(prologue);
        let epi = self.nested(epilogue);
        self.configure_task(task, |o| {
            o.tls_size = size;
            o.tls_prologue = Some(pro);
            o.tls_epilogue = Some(epi);
        });
    }

    /// Attach a block-local buffer with prologue and epilogue blocks.
    pub fn task_bls(
        &mut self,
        task: StmtId,
        size: u32,
        prologue: impl FnOnce(&mut Self),
        epilogue: impl FnOnce(&mut Self),
    ) {
        let pro = self.nested(prologue);
        let epi = self.nested(epilogue);
        self.configure_task(task, |o| {
            o.bls_size = size;
            o.bls_prologue = Some(pro);
            o.bls_epilogue = Some(epi);
        });
    }

    // -- Structure access --

    /// Emit the traversal from the root to field `place` at global
    /// coordinates `indices` (one `i32` per axis). Returns the field pointer,
    /// a bit pointer when the field lives inside a bit-level node.
    pub fn snode_access(
        &mut self,
        tree: &SNodeTree,
        place: SNodeId,
        indices: &[StmtId],
        activate: bool,
    ) -> StmtId {
        assert_eq!(tree[place].kind, SNodeKind::Place, "access target must be a place");
        self.descend(tree, place, indices, activate).0
    }

    /// Emit the traversal to the node `container` and the linear index of the
    /// element addressed by `indices` inside it, for use with `snode_op`.
    pub fn snode_node(
        &mut self,
        tree: &SNodeTree,
        container: SNodeId,
        indices: &[StmtId],
    ) -> (StmtId, StmtId) {
        let (ptr, index) = self.descend(tree, container, indices, false);
        let index = match index {
            Some(i) => i,
            None => self.const_i32(0),
        };
        (ptr, index)
    }

    fn descend(
        &mut self,
        tree: &SNodeTree,
        target: SNodeId,
        indices: &[StmtId],
        activate: bool,
    ) -> (StmtId, Option<StmtId>) {
        let path = tree.path_to(target);
        // Bits owned by the levels below each path entry, per axis.
        let mut below = vec![[0u32; MAX_NUM_AXES]; path.len()];
        let mut acc = [0u32; MAX_NUM_AXES];
        for (depth, &node) in path.iter().enumerate().rev() {
            below[depth] = acc;
            for axis in &tree[node].axes {
                acc[axis.axis as usize] += axis.bits;
            }
        }

        let zero = self.const_i32(0);
        let root_ptr = self.get_root();
        let mut ptr = self.snode_lookup(path[0], root_ptr, zero, false, DataType::raw_ptr());
        let mut parent = path[0];
        for (depth, &node) in path.iter().enumerate().skip(1) {
            let chid = tree.child_index(parent, node).unwrap_or(0);
            let n = &tree[node];
            let ch_ty = match n.kind {
                SNodeKind::Place
                    if matches!(tree[parent].kind, SNodeKind::BitStruct | SNodeKind::BitArray) =>
                {
                    DataType::bit_ptr_to(n.dt.clone())
                }
                SNodeKind::Place => DataType::ptr_to(n.dt.clone()),
                _ => DataType::raw_ptr(),
            };
            ptr = self.get_ch(ptr, parent, chid, ch_ty);
            if n.kind == SNodeKind::Place {
                return (ptr, None);
            }
            let index = if n.kind == SNodeKind::BitStruct {
                zero
            } else {
                self.level_index(tree, node, &below[depth], indices)
            };
            if node == target {
                return (ptr, Some(index));
            }
            let lookup_ty = if n.kind == SNodeKind::BitArray {
                let element = n
                    .children
                    .first()
                    .map_or(DataType::Void, |&c| tree[c].dt.clone());
                DataType::bit_ptr_to(element)
            } else {
                DataType::raw_ptr()
            };
            ptr = self.snode_lookup(node, ptr, index, activate, lookup_ty);
            parent = node;
        }
        (ptr, None)
    }

    fn level_index(
        &mut self,
        tree: &SNodeTree,
        node: SNodeId,
        below: &[u32; MAX_NUM_AXES],
        indices: &[StmtId],
    ) -> StmtId {
        let axes = tree[node].axes.clone();
        let mut inputs: SmallVec<[StmtId; 4]> = SmallVec::new();
        let mut strides: SmallVec<[u32; 4]> = SmallVec::new();
        for axis in &axes {
            let begin = below[axis.axis as usize];
            let local = if axis.bits == 0 {
                self.const_i32(0)
            } else {
                self.bit_extract(indices[axis.axis as usize], begin, begin + axis.bits)
            };
            inputs.push(local);
            strides.push(1 << axis.bits);
        }
        match inputs.len() {
            0 => self.const_i32(0),
            1 => inputs[0],
            _ => self.linearize(&inputs, &strides),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
