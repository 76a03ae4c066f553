//! Read-modify-write helpers on bit ranges and floats.
//!
//! All of them are compare-exchange loops on the physical word, so
//! concurrent writers to disjoint ranges of one word never lose updates.

use crate::memory::Memory;

#[inline]
fn field_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// `set_partial_bits_b{width}`: overwrite `bits` bits at `offset`.
pub fn set_partial_bits(mem: &Memory, ptr: u64, width: u32, offset: u32, bits: u32, value: u64) {
    let mask = field_mask(bits) << offset;
    mem.update(ptr, u64::from(width / 8), |old| {
        (old & !mask) | ((value << offset) & mask)
    });
}

/// `atomic_add_partial_bits_b{width}`: wrapping add inside the field.
/// Returns the field's previous contents.
pub fn atomic_add_partial_bits(
    mem: &Memory,
    ptr: u64,
    width: u32,
    offset: u32,
    bits: u32,
    value: u64,
) -> u64 {
    let fmask = field_mask(bits);
    let mask = fmask << offset;
    let old = mem.update(ptr, u64::from(width / 8), |old| {
        let field = (old & mask) >> offset;
        let sum = field.wrapping_add(value) & fmask;
        (old & !mask) | (sum << offset)
    });
    (old & mask) >> offset
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FloatExtreme {
    Min,
    Max,
}

/// `atomic_{min,max}_f{32,64}`: returns the previous value's bits.
pub fn atomic_float_extreme(mem: &Memory, ptr: u64, width: u32, which: FloatExtreme, value: u64) -> u64 {
    let pick = |old: f64, new: f64| match which {
        FloatExtreme::Min => new < old,
        FloatExtreme::Max => new > old,
    };
    if width == 32 {
        let v = f64::from(f32::from_bits(value as u32));
        mem.update(ptr, 4, |old| {
            if pick(f64::from(f32::from_bits(old as u32)), v) {
                value & 0xFFFF_FFFF
            } else {
                old
            }
        })
    } else {
        let v = f64::from_bits(value);
        mem.update(ptr, 8, |old| if pick(f64::from_bits(old), v) { value } else { old })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
