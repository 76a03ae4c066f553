//! The runtime object behind the `runtime` pointer of every context.
//!
//! A [`Runtime`] owns the device memory, the root allocation of one SNode
//! tree, the per-node active-element lists and the host-side bookkeeping
//! (printed lines, the first failed assertion, worker pools).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::ThreadPool;
use rustc_hash::FxHashMap;
use strata_ir::{PrimitiveType, SNodeId, SNodeKind, SNodeLayout, SNodeTree, MAX_NUM_AXES};

use crate::abi;
use crate::error::RuntimeError;
use crate::memory::Memory;

/// Runtime construction parameters.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Device memory capacity in bytes.
    pub memory_bytes: u64,
    /// Workers used when a loop does not request a thread count.
    pub num_threads: usize,
    /// Size of the global temporaries buffer.
    pub temporaries_bytes: u64,
    pub seed: u64,
    /// Longest index range of one active-list element.
    pub listgen_max_element_size: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            memory_bytes: 64 << 20,
            num_threads: std::thread::available_parallelism().map_or(1, usize::from),
            temporaries_bytes: 1 << 16,
            seed: 0,
            listgen_max_element_size: 1024,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = n.max(1);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_listgen_max_element_size(mut self, n: u32) -> Self {
        self.listgen_max_element_size = n.max(1);
        self
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    tree: SNodeTree,
    layouts: Vec<SNodeLayout>,
    memory: Memory,
    header: u64,
    root: u64,
    temporaries: u64,
    /// Element records of each node's active list.
    lists: Vec<Mutex<Vec<u64>>>,
    /// Zero-filled cell returned by lookups into inactive sparse cells.
    ambient: Vec<u64>,
    /// Deactivated pointer cells awaiting `node_gc`, as `(addr, size)`.
    pending_gc: Vec<Mutex<Vec<(u64, u64)>>>,
    pools: Mutex<FxHashMap<usize, Arc<ThreadPool>>>,
    printed: Mutex<Vec<String>>,
    error: Mutex<Option<RuntimeError>>,
    rng: AtomicU64,
}

impl Runtime {
    /// Allocate the root of `tree` and the runtime header.
    ///
    /// The root's active list starts with its single element.
    pub fn new(tree: &SNodeTree, config: RuntimeConfig) -> Self {
        let memory = Memory::new(config.memory_bytes);
        let layouts: Vec<SNodeLayout> = tree.iter().map(|n| tree.layout(n.id)).collect();
        let root_layout = layouts[SNodeId::ROOT.index()];
        let root = memory.alloc(root_layout.node_size.max(8), 8);
        let temporaries = memory.alloc(config.temporaries_bytes.max(8), 8);
        let header = memory.alloc(abi::runtime::SIZE, 8);
        memory.store_u64(header + abi::runtime::ROOT, root);
        memory.store_u64(header + abi::runtime::TEMPORARIES, temporaries);

        let ambient = tree
            .iter()
            .map(|n| {
                if n.kind.has_activity() {
                    memory.alloc(layouts[n.id.index()].cell_size.max(8), 8)
                } else {
                    crate::memory::NULL
                }
            })
            .collect();

        let runtime = Runtime {
            lists: tree.iter().map(|_| Mutex::new(Vec::new())).collect(),
            pending_gc: tree.iter().map(|_| Mutex::new(Vec::new())).collect(),
            ambient,
            rng: AtomicU64::new(config.seed),
            config,
            tree: tree.clone(),
            layouts,
            memory,
            header,
            root,
            temporaries,
            pools: Mutex::new(FxHashMap::default()),
            printed: Mutex::new(Vec::new()),
            error: Mutex::new(None),
        };
        let root_element = runtime.new_element(root, 0, 1, &[0; abi::coordinates::NUM_AXES as usize]);
        runtime.lists[SNodeId::ROOT.index()].lock().push(root_element);
        tracing::debug!(
            nodes = runtime.layouts.len(),
            root_bytes = root_layout.node_size,
            "runtime initialised"
        );
        runtime
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tree(&self) -> &SNodeTree {
        &self.tree
    }

    pub fn layout(&self, id: SNodeId) -> SNodeLayout {
        self.layouts[id.index()]
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Address of the runtime header (the generated code's runtime pointer).
    pub fn header(&self) -> u64 {
        self.header
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn temporaries(&self) -> u64 {
        self.temporaries
    }

    pub(crate) fn ambient(&self, id: SNodeId) -> u64 {
        self.ambient[id.index()]
    }

    // -- Contexts --

    /// Allocate a launch context holding `args`.
    pub fn create_context(&self, args: &[u64]) -> Result<u64, RuntimeError> {
        if args.len() as u64 > abi::context::MAX_ARGS {
            return Err(RuntimeError::InvalidArgument(format!(
                "{} arguments given, at most {} supported",
                args.len(),
                abi::context::MAX_ARGS
            )));
        }
        let ctx = self.memory.alloc(abi::context::SIZE, 8);
        for (i, &a) in args.iter().enumerate() {
            self.memory.store_u64(ctx + abi::context::ARGS + i as u64 * 8, a);
        }
        self.memory.store_u64(ctx + abi::context::RUNTIME, self.header);
        self.memory
            .store_u64(ctx + abi::context::RESULT_BUFFER, self.header + abi::runtime::RESULT);
        Ok(ctx)
    }

    /// Record the extent of `axis` of external array argument `arg`.
    pub fn set_extra_arg(&self, ctx: u64, arg: usize, axis: usize, extent: i32) -> Result<(), RuntimeError> {
        if arg as u64 >= abi::context::MAX_ARGS || axis as u64 >= abi::context::MAX_ARG_AXES {
            return Err(RuntimeError::InvalidArgument(format!(
                "external shape slot ({arg}, {axis}) out of range"
            )));
        }
        let slot = (arg as u64 * abi::context::MAX_ARG_AXES + axis as u64) * 4;
        self.memory.store_i32(ctx + abi::context::EXTRA_ARGS + slot, extent);
        Ok(())
    }

    pub fn free_context(&self, ctx: u64) {
        self.memory.free(ctx, abi::context::SIZE, 8);
    }

    /// The value last written by `LLVMRuntime_store_result`.
    pub fn fetch_result(&self) -> u64 {
        self.memory.load_u64(self.header + abi::runtime::RESULT)
    }

    // -- Diagnostics --

    pub(crate) fn record_print(&self, line: String) {
        tracing::trace!(%line, "kernel print");
        print!("{line}");
        self.printed.lock().push(line);
    }

    /// Everything kernels printed so far.
    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().clone()
    }

    /// Keep the first failure; later ones are logged and dropped.
    pub(crate) fn record_error(&self, error: RuntimeError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            tracing::debug!(%error, "kernel raised an error");
            *slot = Some(error);
        } else {
            tracing::debug!(%error, "kernel error dropped; one is already pending");
        }
    }

    pub fn take_error(&self) -> Option<RuntimeError> {
        self.error.lock().take()
    }

    // -- Randomness --

    /// Next 64 random bits (splitmix64 over a shared counter).
    pub(crate) fn next_random(&self) -> u64 {
        let mut z = self
            .rng
            .fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed)
            .wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    // -- Worker pools --

    /// A cached pool with `threads` workers, or `None` when the OS refuses
    /// to spawn one; callers then run sequentially.
    pub(crate) fn pool(&self, threads: usize) -> Option<Arc<ThreadPool>> {
        let threads = if threads == 0 { self.config.num_threads } else { threads };
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&threads) {
            return Some(Arc::clone(pool));
        }
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => {
                let pool = Arc::new(pool);
                pools.insert(threads, Arc::clone(&pool));
                Some(pool)
            }
            Err(e) => {
                tracing::warn!("failed to create thread pool ({e}), running sequentially");
                None
            }
        }
    }

    // -- Active lists --

    pub(crate) fn new_element(&self, node: u64, lower: i32, upper: i32, pcoord: &[i32]) -> u64 {
        let e = self.memory.alloc(abi::element::SIZE, 8);
        self.memory.store_u64(e + abi::element::ELEMENT, node);
        self.memory.store_i32(e + abi::element::LOWER, lower);
        self.memory.store_i32(e + abi::element::UPPER, upper);
        for (i, &c) in pcoord.iter().enumerate() {
            self.memory.store_i32(e + abi::element::PCOORD + i as u64 * 4, c);
        }
        e
    }

    pub(crate) fn list(&self, id: SNodeId) -> &Mutex<Vec<u64>> {
        &self.lists[id.index()]
    }

    /// Number of elements in a node's active list.
    pub fn list_len(&self, id: SNodeId) -> usize {
        self.lists[id.index()].lock().len()
    }

    pub(crate) fn clear_list(&self, id: SNodeId) {
        let elements = std::mem::take(&mut *self.lists[id.index()].lock());
        for e in elements {
            self.memory.free(e, abi::element::SIZE, 8);
        }
    }

    pub(crate) fn defer_free(&self, id: SNodeId, cell: u64, size: u64) {
        self.pending_gc[id.index()].lock().push((cell, size));
    }

    /// Release cells deactivated since the last collection of `id`.
    pub(crate) fn node_gc(&self, id: SNodeId) -> usize {
        let cells = std::mem::take(&mut *self.pending_gc[id.index()].lock());
        let n = cells.len();
        for (cell, size) in cells {
            self.memory.free(cell, size, 8);
        }
        if n > 0 {
            tracing::debug!(snode = %id, cells = n, "node_gc");
        }
        n
    }

    // -- Host-side field access --

    /// Byte address of a primitive `place` at the given global coordinates,
    /// or `None` when a sparse ancestor is inactive.
    ///
    /// Coordinates use the concatenated-bits convention of the tree; missing
    /// trailing axes are zero.
    pub fn place_address(&self, place: SNodeId, coords: &[i32]) -> Option<u64> {
        let path = self.tree.path_to(place);
        // Bits owned by the levels below each path entry, per axis.
        let mut below = vec![[0u32; MAX_NUM_AXES]; path.len()];
        let mut acc = [0u32; MAX_NUM_AXES];
        for (depth, &node) in path.iter().enumerate().rev() {
            below[depth] = acc;
            for axis in &self.tree[node].axes {
                acc[axis.axis as usize] += axis.bits;
            }
        }

        let mut ptr = self.root;
        for (depth, pair) in path.windows(2).enumerate() {
            let (parent, child) = (pair[0], pair[1]);
            let node = &self.tree[parent];
            let index = self.local_index(parent, &below[depth], coords);
            let layout = self.layouts[parent.index()];
            let cell = match node.kind {
                SNodeKind::Root => ptr,
                SNodeKind::Dense => ptr + index * layout.cell_size,
                SNodeKind::Bitmasked => {
                    if !crate::nodes::bitmask_get(self, ptr, layout.bitmask_offset, index) {
                        return None;
                    }
                    ptr + index * layout.cell_size
                }
                SNodeKind::Pointer | SNodeKind::Hash => {
                    let slot = self.memory.load_u64(ptr + index * 8);
                    if slot == crate::memory::NULL {
                        return None;
                    }
                    slot
                }
                SNodeKind::Dynamic => crate::nodes::dynamic_cell(
                    self,
                    ptr,
                    u64::from(node.chunk_size),
                    layout.cell_size,
                    index,
                )?,
                SNodeKind::BitStruct | SNodeKind::BitArray | SNodeKind::Place => return None,
            };
            ptr = cell + self.layouts[child.index()].offset_in_parent;
        }
        Some(ptr)
    }

    /// Linear index of `coords` inside one level, given the bits owned by
    /// the levels below it.
    fn local_index(&self, id: SNodeId, below: &[u32; MAX_NUM_AXES], coords: &[i32]) -> u64 {
        let mut index = 0u64;
        for axis in &self.tree[id].axes {
            let c = coords.get(axis.axis as usize).copied().unwrap_or(0) as u32;
            let local = (c >> below[axis.axis as usize]) & ((1u32 << axis.bits) - 1);
            index = (index << axis.bits) | u64::from(local);
        }
        index
    }

    /// Width of a place, or the physical word of a bit-level node.
    fn primitive_of(&self, place: SNodeId) -> PrimitiveType {
        let node = &self.tree[place];
        node.dt
            .primitive()
            .or(node.physical)
            .unwrap_or(PrimitiveType::I32)
    }

    /// Read a primitive place; inactive cells read as zero.
    pub fn read_bits(&self, place: SNodeId, coords: &[i32]) -> u64 {
        let size = self.primitive_of(place).bytes();
        self.place_address(place, coords)
            .map_or(0, |a| self.memory.load(a, size))
    }

    pub fn read_i32(&self, place: SNodeId, coords: &[i32]) -> i32 {
        self.read_bits(place, coords) as u32 as i32
    }

    pub fn read_i64(&self, place: SNodeId, coords: &[i32]) -> i64 {
        self.read_bits(place, coords) as i64
    }

    pub fn read_f32(&self, place: SNodeId, coords: &[i32]) -> f32 {
        f32::from_bits(self.read_bits(place, coords) as u32)
    }

    pub fn read_f64(&self, place: SNodeId, coords: &[i32]) -> f64 {
        f64::from_bits(self.read_bits(place, coords))
    }

    /// Write a primitive place; returns `false` when the cell is inactive.
    pub fn write_bits(&self, place: SNodeId, coords: &[i32], bits: u64) -> bool {
        let size = self.primitive_of(place).bytes();
        match self.place_address(place, coords) {
            Some(a) => {
                self.memory.store(a, size, bits);
                true
            }
            None => false,
        }
    }

    pub fn write_i32(&self, place: SNodeId, coords: &[i32], value: i32) -> bool {
        self.write_bits(place, coords, u64::from(value as u32))
    }

    pub fn write_f32(&self, place: SNodeId, coords: &[i32], value: f32) -> bool {
        self.write_bits(place, coords, u64::from(value.to_bits()))
    }

    pub fn write_f64(&self, place: SNodeId, coords: &[i32], value: f64) -> bool {
        self.write_bits(place, coords, value.to_bits())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
