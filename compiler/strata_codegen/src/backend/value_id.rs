//! Opaque ID newtypes for the module arenas.
//!
//! Values, blocks and functions are stored in [`Module`](super::ir::Module)
//! and referenced by `Copy` handles. Each ID is a `u32` index into the
//! corresponding arena; a `NONE` sentinel (`u32::MAX`) marks absent values
//! such as the result of a `store`.

use std::fmt;

/// Handle to a typed SSA value (function parameter or instruction result).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

/// Handle to a basic block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

/// Handle to a function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);

impl ValueId {
    /// Sentinel for "no value".
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// True if this is the `NONE` sentinel.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// The raw index.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl BlockId {
    /// Sentinel for "no block".
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// True if this is the `NONE` sentinel.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// The raw index.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl FunctionId {
    /// Sentinel for "no function".
    pub const NONE: Self = Self(u32::MAX);

    #[inline]
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    /// True if this is the `NONE` sentinel.
    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// The raw index.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("%none")
        } else {
            write!(f, "%{}", self.0)
        }
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}
