//! Byte layouts of the records shared between generated code and the runtime.
//!
//! Generated code addresses these records with constant offsets; the runtime
//! reads them through [`crate::Memory`].

/// Kernel launch context: `{args, runtime, result_buffer, extra_args}`.
pub mod context {
    pub const MAX_ARGS: u64 = 8;
    pub const MAX_ARG_AXES: u64 = 8;
    /// `u64` argument slots.
    pub const ARGS: u64 = 0;
    /// Pointer to the runtime header.
    pub const RUNTIME: u64 = 64;
    /// Pointer to the result storage slot.
    pub const RESULT_BUFFER: u64 = 72;
    /// `i32 [MAX_ARGS][MAX_ARG_AXES]` external array shapes.
    pub const EXTRA_ARGS: u64 = 80;
    pub const SIZE: u64 = EXTRA_ARGS + MAX_ARGS * MAX_ARG_AXES * 4;
}

/// Runtime header, the object behind the "runtime pointer".
pub mod runtime {
    pub const ROOT: u64 = 0;
    pub const RESULT: u64 = 8;
    pub const TEMPORARIES: u64 = 16;
    pub const SIZE: u64 = 24;
}

/// Per-node metadata object passed as the first argument of node methods.
pub mod meta {
    pub const SNODE_ID: u64 = 0;
    /// Morton flag (`dense`), zero otherwise.
    pub const MORTON_DIM: u64 = 4;
    pub const ELEMENT_SIZE: u64 = 8;
    pub const MAX_NUM_ELEMENTS: u64 = 16;
    pub const CONTEXT: u64 = 24;
    pub const LOOKUP_ELEMENT: u64 = 32;
    pub const IS_ACTIVE: u64 = 40;
    pub const GET_NUM_ELEMENTS: u64 = 48;
    pub const FROM_PARENT_ELEMENT: u64 = 56;
    pub const REFINE_COORDINATES: u64 = 64;
    /// Chunk size (`dynamic`), zero otherwise.
    pub const CHUNK_SIZE: u64 = 72;
    pub const SIZE: u64 = 80;
}

/// Physical coordinates: one `i32` per axis.
pub mod coordinates {
    pub const NUM_AXES: u64 = 8;
    pub const SIZE: u64 = NUM_AXES * 4;
}

/// Active-list entry: a node, an index range inside it, and the coordinates
/// of the node's parent cell.
pub mod element {
    pub const ELEMENT: u64 = 0;
    pub const LOWER: u64 = 8;
    pub const UPPER: u64 = 12;
    pub const PCOORD: u64 = 16;
    pub const SIZE: u64 = PCOORD + super::coordinates::SIZE;
}

/// Autodiff stack: `{n: u64, entries: [primal, adjoint] * max}`.
pub mod stack {
    pub const N: u64 = 0;
    pub const DATA: u64 = 8;

    /// Bytes needed for a stack of `max_size` entries of `element_size`.
    pub const fn size(max_size: u64, element_size: u64) -> u64 {
        DATA + max_size * element_size * 2
    }
}
