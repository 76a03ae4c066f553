//! SNode trees: the hierarchical sparse data layout.
//!
//! Nodes live in an arena owned by [`SNodeTree`] and refer to each other by
//! [`SNodeId`]. Ownership is top-down (the `children` list); `parent` is a
//! plain back-reference. Node 0 is always the root.
//!
//! # Coordinates
//!
//! Every container level owns a few bits of each global axis. An axis with
//! extent `n` takes `ceil(log2(n))` bits, and the coordinate of an element is
//! the concatenation of the per-level indices, outermost level most
//! significant. Non-power-of-two extents therefore leave holes that loops
//! must guard against.
//!
//! # Memory layout
//!
//! A container's *cell* holds one instance of every child, laid out in child
//! order with natural alignment. The node itself holds `max_num_elements`
//! cells (`dense`, `bitmasked`), a slot table of cell pointers (`pointer`,
//! `hash`), a header for a chunk list (`dynamic`) or exactly one cell
//! (`root`). Bit-level nodes (`bit_struct`, `bit_array`) occupy one physical
//! word; their children are bit ranges inside it.

use std::fmt;

use smallvec::SmallVec;

use crate::types::{CustomFloatType, CustomIntType, DataType, PrimitiveType};

/// Maximum number of index axes.
pub const MAX_NUM_AXES: usize = 8;

/// Index into the SNode arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SNodeId(u32);

impl SNodeId {
    pub const ROOT: SNodeId = SNodeId(0);

    #[inline]
    pub const fn new(index: u32) -> Self {
        SNodeId(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for SNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

impl fmt::Display for SNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SNodeKind {
    Root,
    Dense,
    Pointer,
    Dynamic,
    Bitmasked,
    Hash,
    BitStruct,
    BitArray,
    Place,
}

impl SNodeKind {
    pub const fn name(self) -> &'static str {
        match self {
            SNodeKind::Root => "root",
            SNodeKind::Dense => "dense",
            SNodeKind::Pointer => "pointer",
            SNodeKind::Dynamic => "dynamic",
            SNodeKind::Bitmasked => "bitmasked",
            SNodeKind::Hash => "hash",
            SNodeKind::BitStruct => "bit_struct",
            SNodeKind::BitArray => "bit_array",
            SNodeKind::Place => "place",
        }
    }

    /// Prefix of the runtime methods for this kind (`Dense_is_active`).
    pub const fn runtime_name(self) -> &'static str {
        match self {
            SNodeKind::Root => "Root",
            SNodeKind::Dense => "Dense",
            SNodeKind::Pointer => "Pointer",
            SNodeKind::Dynamic => "Dynamic",
            SNodeKind::Bitmasked => "Bitmasked",
            SNodeKind::Hash => "Hash",
            SNodeKind::BitStruct => "BitStruct",
            SNodeKind::BitArray => "BitArray",
            SNodeKind::Place => "Place",
        }
    }

    /// Kinds whose elements are cells of child nodes.
    pub const fn is_container(self) -> bool {
        matches!(
            self,
            SNodeKind::Root
                | SNodeKind::Dense
                | SNodeKind::Pointer
                | SNodeKind::Dynamic
                | SNodeKind::Bitmasked
                | SNodeKind::Hash
        )
    }

    /// Kinds whose cells may be inactive.
    pub const fn has_activity(self) -> bool {
        matches!(
            self,
            SNodeKind::Pointer | SNodeKind::Bitmasked | SNodeKind::Dynamic | SNodeKind::Hash
        )
    }
}

impl fmt::Display for SNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Extent of one node level along one global axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Axis {
    pub axis: u8,
    pub extent: u32,
    pub bits: u32,
}

impl Axis {
    pub fn new(axis: u8, extent: u32) -> Self {
        assert!((axis as usize) < MAX_NUM_AXES, "axis {axis} out of range");
        assert!(extent >= 1, "axis extent must be positive");
        Axis {
            axis,
            extent,
            bits: extent.next_power_of_two().trailing_zeros(),
        }
    }

    pub fn is_pot(self) -> bool {
        self.extent.is_power_of_two()
    }
}

/// One level of the structure tree.
#[derive(Clone, Debug)]
pub struct SNode {
    pub id: SNodeId,
    pub kind: SNodeKind,
    pub parent: Option<SNodeId>,
    pub children: Vec<SNodeId>,
    pub axes: SmallVec<[Axis; 4]>,
    /// Elements per chunk (`dynamic` only).
    pub chunk_size: u32,
    /// Morton-order hint for `dense` nodes, forwarded to the runtime.
    pub morton: bool,
    /// Value type of a `place`.
    pub dt: DataType,
    /// Physical word of a `bit_struct` or `bit_array`.
    pub physical: Option<PrimitiveType>,
    /// Bit offset inside the parent's physical word (`bit_struct` children).
    pub bit_offset: u32,
    pub owns_shared_exponent: bool,
    /// Exponent field of a float with exponent.
    pub exp_snode: Option<SNodeId>,
    /// Digit fields that read this exponent field.
    pub exponent_users: Vec<SNodeId>,
    next_bit: u32,
}

impl SNode {
    fn new(id: SNodeId, kind: SNodeKind, parent: Option<SNodeId>) -> Self {
        SNode {
            id,
            kind,
            parent,
            children: Vec::new(),
            axes: SmallVec::new(),
            chunk_size: 0,
            morton: false,
            dt: DataType::Void,
            physical: None,
            bit_offset: 0,
            owns_shared_exponent: false,
            exp_snode: None,
            exponent_users: Vec::new(),
            next_bit: 0,
        }
    }

    /// Sum of the index bits over all axes of this level.
    pub fn total_bits(&self) -> u32 {
        self.axes.iter().map(|a| a.bits).sum()
    }

    /// Bits this level owns on global axis `axis`.
    pub fn axis_bits(&self, axis: u8) -> u32 {
        self.axes
            .iter()
            .filter(|a| a.axis == axis)
            .map(|a| a.bits)
            .sum()
    }

    /// Number of index bits this field occupies inside its physical word.
    pub fn field_bits(&self) -> u32 {
        match &self.dt {
            DataType::CustomInt(c) => c.num_bits(),
            DataType::CustomFloat(c) => c.digits_type().num_bits(),
            _ => 0,
        }
    }
}

/// Computed layout of one node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SNodeLayout {
    /// Size of one cell (the element size passed to node methods).
    pub cell_size: u64,
    /// Size of the node's own storage.
    pub node_size: u64,
    pub align: u64,
    pub max_num_elements: u64,
    /// Byte offset of this node inside its parent's cell.
    pub offset_in_parent: u64,
    /// Byte offset of the activity mask (`bitmasked` only).
    pub bitmask_offset: u64,
}

/// Arena of SNodes rooted at [`SNodeId::ROOT`].
#[derive(Clone, Debug)]
pub struct SNodeTree {
    nodes: Vec<SNode>,
}

impl Default for SNodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SNodeTree {
    pub fn new() -> Self {
        SNodeTree {
            nodes: vec![SNode::new(SNodeId::ROOT, SNodeKind::Root, None)],
        }
    }

    pub fn root(&self) -> SNodeId {
        SNodeId::ROOT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: SNodeId) -> &SNode {
        debug_assert!(
            id.index() < self.nodes.len(),
            "SNodeId {} out of bounds (tree has {} nodes)",
            id.raw(),
            self.nodes.len()
        );
        &self.nodes[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SNode> {
        self.nodes.iter()
    }

    // -- Construction --

    fn add(&mut self, parent: SNodeId, kind: SNodeKind) -> SNodeId {
        let parent_kind = self.get(parent).kind;
        match kind {
            SNodeKind::Place => assert!(
                parent_kind.is_container()
                    || matches!(parent_kind, SNodeKind::BitStruct | SNodeKind::BitArray),
                "place under {parent_kind}"
            ),
            _ => assert!(
                parent_kind.is_container(),
                "{kind} cannot be a child of {parent_kind}"
            ),
        }
        let id = SNodeId::new(self.nodes.len() as u32);
        self.nodes.push(SNode::new(id, kind, Some(parent)));
        self.nodes[parent.index()].children.push(id);
        id
    }

    fn with_axes(&mut self, parent: SNodeId, kind: SNodeKind, axes: &[(u8, u32)]) -> SNodeId {
        let id = self.add(parent, kind);
        self.nodes[id.index()].axes = axes.iter().map(|&(a, n)| Axis::new(a, n)).collect();
        id
    }

    fn leading_axes(shape: &[u32]) -> SmallVec<[(u8, u32); 4]> {
        shape
            .iter()
            .enumerate()
            .map(|(i, &n)| (i as u8, n))
            .collect()
    }

    /// Dense node over the leading axes, one extent per axis.
    pub fn dense(&mut self, parent: SNodeId, shape: &[u32]) -> SNodeId {
        self.with_axes(parent, SNodeKind::Dense, &Self::leading_axes(shape))
    }

    /// Dense node over explicit `(axis, extent)` pairs.
    pub fn dense_axes(&mut self, parent: SNodeId, axes: &[(u8, u32)]) -> SNodeId {
        self.with_axes(parent, SNodeKind::Dense, axes)
    }

    pub fn pointer(&mut self, parent: SNodeId, shape: &[u32]) -> SNodeId {
        self.with_axes(parent, SNodeKind::Pointer, &Self::leading_axes(shape))
    }

    pub fn bitmasked(&mut self, parent: SNodeId, shape: &[u32]) -> SNodeId {
        self.with_axes(parent, SNodeKind::Bitmasked, &Self::leading_axes(shape))
    }

    pub fn hash(&mut self, parent: SNodeId, shape: &[u32]) -> SNodeId {
        self.with_axes(parent, SNodeKind::Hash, &Self::leading_axes(shape))
    }

    /// Dynamic list along axis 0, allocated in chunks.
    pub fn dynamic(&mut self, parent: SNodeId, extent: u32, chunk_size: u32) -> SNodeId {
        assert!(chunk_size >= 1, "dynamic chunk size must be positive");
        let id = self.with_axes(parent, SNodeKind::Dynamic, &[(0, extent)]);
        self.nodes[id.index()].chunk_size = chunk_size;
        id
    }

    pub fn set_morton(&mut self, id: SNodeId, morton: bool) {
        assert_eq!(self.get(id).kind, SNodeKind::Dense, "morton order on non-dense node");
        self.nodes[id.index()].morton = morton;
    }

    pub fn bit_struct(&mut self, parent: SNodeId, physical: PrimitiveType) -> SNodeId {
        let id = self.add(parent, SNodeKind::BitStruct);
        self.nodes[id.index()].physical = Some(physical);
        id
    }

    /// Packed array of `extent` custom-int elements inside one physical word.
    pub fn bit_array(&mut self, parent: SNodeId, extent: u32, physical: PrimitiveType) -> SNodeId {
        let id = self.with_axes(parent, SNodeKind::BitArray, &[(0, extent)]);
        self.nodes[id.index()].physical = Some(physical);
        id
    }

    /// Place a value field.
    ///
    /// # Panics
    ///
    /// Panics when the field breaks a layout invariant: primitive values
    /// inside bit-level nodes, custom values outside them, or bit ranges that
    /// overflow the physical word.
    pub fn place(&mut self, parent: SNodeId, dt: impl Into<DataType>) -> SNodeId {
        let dt = dt.into();
        let parent_node = self.get(parent);
        match parent_node.kind {
            SNodeKind::BitStruct => {
                let physical = parent_node.physical.unwrap_or(PrimitiveType::U32);
                let bits = match &dt {
                    DataType::CustomInt(c) => {
                        assert_eq!(c.physical_type(), physical, "field physical type mismatch");
                        c.num_bits()
                    }
                    DataType::CustomFloat(c) => {
                        assert_eq!(
                            c.digits_type().physical_type(),
                            physical,
                            "field physical type mismatch"
                        );
                        c.digits_type().num_bits()
                    }
                    other => panic!("bit_struct field must be a custom type, got {other}"),
                };
                let offset = parent_node.next_bit;
                assert!(
                    offset + bits <= physical.bits(),
                    "bit_struct fields overflow {physical} ({} bits used)",
                    offset + bits
                );
                let id = self.add(parent, SNodeKind::Place);
                self.nodes[parent.index()].next_bit = offset + bits;
                let node = &mut self.nodes[id.index()];
                node.bit_offset = offset;
                node.dt = dt;
                id
            }
            SNodeKind::BitArray => {
                assert!(parent_node.children.is_empty(), "bit_array holds a single field");
                let physical = parent_node.physical.unwrap_or(PrimitiveType::U32);
                let extent = parent_node.axes[0].extent;
                let DataType::CustomInt(c) = &dt else {
                    panic!("bit_array element must be a custom int, got {dt}");
                };
                assert!(
                    c.num_bits() * extent <= physical.bits(),
                    "bit_array of {extent} x {} bits overflows {physical}",
                    c.num_bits()
                );
                let id = self.add(parent, SNodeKind::Place);
                self.nodes[id.index()].dt = dt;
                id
            }
            _ => {
                assert!(
                    dt.primitive().is_some(),
                    "custom type {dt} placed outside a bit-level node"
                );
                let id = self.add(parent, SNodeKind::Place);
                self.nodes[id.index()].dt = dt;
                id
            }
        }
    }

    /// Place a float with its own exponent field. Returns the digits field.
    pub fn place_float_with_exponent(&mut self, parent: SNodeId, ft: CustomFloatType) -> SNodeId {
        let exp_ty = ft
            .exponent_type()
            .unwrap_or_else(|| panic!("{ft} has no exponent type"));
        let exp = self.place(parent, exp_ty);
        let digits = self.place(parent, ft);
        self.nodes[digits.index()].exp_snode = Some(exp);
        self.nodes[exp.index()].exponent_users.push(digits);
        digits
    }

    /// Place a group of floats sharing one exponent field.
    ///
    /// Returns the exponent field and the member digit fields.
    pub fn place_shared_exponent(
        &mut self,
        parent: SNodeId,
        exponent: CustomIntType,
        members: &[CustomFloatType],
    ) -> (SNodeId, Vec<SNodeId>) {
        let exp = self.place(parent, exponent);
        self.nodes[exp.index()].owns_shared_exponent = true;
        let mut users = Vec::with_capacity(members.len());
        for ft in members {
            assert_eq!(
                ft.exponent_type(),
                Some(exponent),
                "shared-exponent member {ft} disagrees on exponent type"
            );
            let digits = self.place(parent, *ft);
            self.nodes[digits.index()].exp_snode = Some(exp);
            users.push(digits);
        }
        self.nodes[exp.index()].exponent_users.clone_from(&users);
        (exp, users)
    }

    // -- Queries --

    /// Nodes from the root down to `id`, inclusive.
    pub fn path_to(&self, id: SNodeId) -> Vec<SNodeId> {
        let mut path = vec![id];
        let mut cur = id;
        while let Some(parent) = self.get(cur).parent {
            path.push(parent);
            cur = parent;
        }
        path.reverse();
        path
    }

    pub fn child_index(&self, parent: SNodeId, child: SNodeId) -> Option<usize> {
        self.get(parent).children.iter().position(|&c| c == child)
    }

    /// Number of addressable elements of a node.
    pub fn max_num_elements(&self, id: SNodeId) -> u64 {
        let node = self.get(id);
        match node.kind {
            SNodeKind::Root | SNodeKind::BitStruct | SNodeKind::Place => 1,
            SNodeKind::Dynamic | SNodeKind::BitArray => u64::from(node.axes[0].extent),
            SNodeKind::Dense | SNodeKind::Pointer | SNodeKind::Bitmasked | SNodeKind::Hash => {
                1u64 << node.total_bits()
            }
        }
    }

    fn align_of(&self, id: SNodeId) -> u64 {
        let node = self.get(id);
        match node.kind {
            SNodeKind::Place => node.dt.primitive().map_or(1, PrimitiveType::bytes),
            SNodeKind::BitStruct | SNodeKind::BitArray => {
                node.physical.map_or(4, PrimitiveType::bytes)
            }
            _ => 8,
        }
    }

    /// Byte offsets of each child inside a cell, and the cell size.
    fn cell_layout(&self, id: SNodeId) -> (Vec<u64>, u64) {
        let node = self.get(id);
        if !node.kind.is_container() {
            return (Vec::new(), 0);
        }
        let mut offsets = Vec::with_capacity(node.children.len());
        let mut cursor = 0u64;
        let mut max_align = 1u64;
        for &child in &node.children {
            let align = self.align_of(child);
            max_align = max_align.max(align);
            cursor = cursor.next_multiple_of(align);
            offsets.push(cursor);
            cursor += self.node_size(child);
        }
        (offsets, cursor.next_multiple_of(max_align))
    }

    fn node_size(&self, id: SNodeId) -> u64 {
        let node = self.get(id);
        let cell = self.cell_layout(id).1;
        let n = self.max_num_elements(id);
        match node.kind {
            SNodeKind::Root => cell,
            SNodeKind::Dense => n * cell,
            SNodeKind::Bitmasked => (n * cell).next_multiple_of(8) + n.div_ceil(64) * 8,
            SNodeKind::Pointer | SNodeKind::Hash => n * 8,
            SNodeKind::Dynamic => 16,
            SNodeKind::BitStruct | SNodeKind::BitArray => {
                node.physical.map_or(4, PrimitiveType::bytes)
            }
            SNodeKind::Place => node.dt.primitive().map_or(0, PrimitiveType::bytes),
        }
    }

    /// Layout of one node.
    pub fn layout(&self, id: SNodeId) -> SNodeLayout {
        let node = self.get(id);
        let cell_size = self.cell_layout(id).1;
        let max_num_elements = self.max_num_elements(id);
        let offset_in_parent = node.parent.map_or(0, |p| {
            let (offsets, _) = self.cell_layout(p);
            // Fields of bit-level nodes share their parent's word.
            self.child_index(p, id)
                .and_then(|i| offsets.get(i).copied())
                .unwrap_or(0)
        });
        let bitmask_offset = if node.kind == SNodeKind::Bitmasked {
            (max_num_elements * cell_size).next_multiple_of(8)
        } else {
            0
        };
        SNodeLayout {
            cell_size,
            node_size: self.node_size(id),
            align: self.align_of(id),
            max_num_elements,
            offset_in_parent,
            bitmask_offset,
        }
    }
}

impl std::ops::Index<SNodeId> for SNodeTree {
    type Output = SNode;

    fn index(&self, id: SNodeId) -> &SNode {
        self.get(id)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
