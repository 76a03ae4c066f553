//! Bit pointers: the address of a field inside a physical word.
//!
//! A bit pointer is a pair `(byte_ptr, offset)`: `byte_ptr` points at the
//! physical word that holds the field, `offset` is the `i32` position of the
//! field's least significant bit inside that word. Offsetting a bit pointer
//! moves the bit offset and never the byte pointer, so a field and its
//! exponent field always resolve against the same word.

use crate::backend::{IrBuilder, Ty, ValueId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BitPtr {
    pub byte_ptr: ValueId,
    /// `i32` bit offset of the field inside the word at `byte_ptr`.
    pub offset: ValueId,
}

impl BitPtr {
    /// Bit pointer at `offset` bits into the word at `byte_ptr`; a missing
    /// offset means bit 0.
    pub(crate) fn new(b: &mut IrBuilder, byte_ptr: ValueId, offset: Option<ValueId>) -> Self {
        let offset = match offset {
            Some(o) => b.int_cast(o, Ty::I32, true),
            None => b.const_i32(0),
        };
        BitPtr { byte_ptr, offset }
    }

    /// Bit pointer at a constant bit offset.
    pub(crate) fn at(b: &mut IrBuilder, byte_ptr: ValueId, bit_offset: u32) -> Self {
        let offset = b.const_i32(bit_offset as i32);
        BitPtr { byte_ptr, offset }
    }

    /// The same word, `delta` bits further.
    #[must_use]
    pub(crate) fn offset_by(self, b: &mut IrBuilder, delta: i32) -> Self {
        let delta = b.const_i32(delta);
        BitPtr {
            byte_ptr: self.byte_ptr,
            offset: b.add(self.offset, delta),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
