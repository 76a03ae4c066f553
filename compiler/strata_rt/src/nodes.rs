//! Node-kind methods and per-node layout callbacks.
//!
//! Every method receives the node's metadata object first; sizes and the
//! node id are read from it, so one implementation serves every node of a
//! kind.
//!
//! | kind        | storage                                         |
//! |-------------|-------------------------------------------------|
//! | `root`      | one cell                                        |
//! | `dense`     | `max_num_elements` cells                        |
//! | `bitmasked` | cells, then one activity bit per cell (`u64` words) |
//! | `pointer`   | one cell pointer per slot, cells allocated on activation |
//! | `hash`      | as `pointer`                                    |
//! | `dynamic`   | `{n: i32, head: ptr}`; chunks are `[next][chunk_size cells]` |

use strata_ir::{SNodeId, SNodeKind};

use crate::abi;
use crate::memory::NULL;
use crate::runtime::Runtime;
use crate::symbols::NodeMethod;

/// Fields of a metadata object the methods need.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Meta {
    pub snode: SNodeId,
    pub element_size: u64,
    pub max_num_elements: u64,
    pub chunk_size: u64,
}

impl Meta {
    pub fn read(rt: &Runtime, meta: u64) -> Meta {
        let mem = rt.memory();
        Meta {
            snode: SNodeId::new(mem.load_i32(meta + abi::meta::SNODE_ID) as u32),
            element_size: mem.load_u64(meta + abi::meta::ELEMENT_SIZE),
            max_num_elements: mem.load_u64(meta + abi::meta::MAX_NUM_ELEMENTS),
            chunk_size: mem.load_u64(meta + abi::meta::CHUNK_SIZE).max(1),
        }
    }

    fn bitmask_offset(&self) -> u64 {
        (self.max_num_elements * self.element_size).next_multiple_of(8)
    }

    fn chunk_bytes(&self) -> u64 {
        8 + self.chunk_size * self.element_size
    }
}

/// Run `method` on the node at `node`. Unused trailing arguments are ignored.
pub(crate) fn call(rt: &Runtime, kind: SNodeKind, method: NodeMethod, args: &[u64]) -> u64 {
    let arg = |i: usize| args.get(i).copied().unwrap_or(0);
    let meta = Meta::read(rt, arg(0));
    let node = arg(1);
    let index = u64::from(arg(2) as u32);
    match method {
        NodeMethod::LookupElement => lookup_element(rt, kind, &meta, node, index),
        NodeMethod::IsActive => u64::from(is_active(rt, kind, &meta, node, index)),
        NodeMethod::Activate => {
            activate(rt, kind, &meta, node, index);
            0
        }
        NodeMethod::Deactivate => {
            deactivate(rt, kind, &meta, node, index);
            0
        }
        NodeMethod::GetNumElements => get_num_elements(rt, kind, &meta, node),
        NodeMethod::Append => u64::from(dynamic_append(rt, &meta, node, arg(2) as u32)),
    }
}

fn lookup_element(rt: &Runtime, kind: SNodeKind, meta: &Meta, node: u64, i: u64) -> u64 {
    match kind {
        SNodeKind::Pointer | SNodeKind::Hash => {
            let slot = rt.memory().load_u64(node + i * 8);
            if slot == NULL {
                rt.ambient(meta.snode)
            } else {
                slot
            }
        }
        SNodeKind::Dynamic => dynamic_cell(rt, node, meta.chunk_size, meta.element_size, i)
            .unwrap_or_else(|| rt.ambient(meta.snode)),
        _ => node + i * meta.element_size,
    }
}

fn is_active(rt: &Runtime, kind: SNodeKind, meta: &Meta, node: u64, i: u64) -> bool {
    match kind {
        SNodeKind::Pointer | SNodeKind::Hash => rt.memory().load_u64(node + i * 8) != NULL,
        SNodeKind::Bitmasked => bitmask_get(rt, node, meta.bitmask_offset(), i),
        SNodeKind::Dynamic => i < u64::from(rt.memory().load_i32(node).max(0) as u32),
        _ => true,
    }
}

fn activate(rt: &Runtime, kind: SNodeKind, meta: &Meta, node: u64, i: u64) {
    let mem = rt.memory();
    match kind {
        SNodeKind::Pointer | SNodeKind::Hash => {
            let slot = node + i * 8;
            if mem.load_u64(slot) != NULL {
                return;
            }
            let size = meta.element_size.max(8);
            let cell = mem.alloc(size, 8);
            if mem.compare_exchange(slot, 8, NULL, cell).is_err() {
                mem.free(cell, size, 8);
            }
        }
        SNodeKind::Bitmasked => {
            let (word, bit) = mask_word(node, meta.bitmask_offset(), i);
            mem.update(word, 8, |w| w | bit);
        }
        SNodeKind::Dynamic => {
            dynamic_chunk(rt, meta, node, i);
            let target = i as u32 + 1;
            mem.update(node, 4, |n| n.max(u64::from(target)));
        }
        _ => {}
    }
}

fn deactivate(rt: &Runtime, kind: SNodeKind, meta: &Meta, node: u64, i: u64) {
    let mem = rt.memory();
    match kind {
        SNodeKind::Pointer | SNodeKind::Hash => {
            let old = mem.update(node + i * 8, 8, |_| NULL);
            if old != NULL {
                rt.defer_free(meta.snode, old, meta.element_size.max(8));
            }
        }
        SNodeKind::Bitmasked => {
            let (word, bit) = mask_word(node, meta.bitmask_offset(), i);
            mem.update(word, 8, |w| w & !bit);
        }
        SNodeKind::Dynamic => {
            if mem.load_i32(node) > 0 {
                mem.store_i32(node, 0);
                let mut chunk = mem.load_u64(node + 8);
                while chunk != NULL {
                    mem.fill_zero(chunk + 8, meta.chunk_bytes() - 8);
                    chunk = mem.load_u64(chunk);
                }
            }
        }
        _ => {}
    }
}

fn get_num_elements(rt: &Runtime, kind: SNodeKind, meta: &Meta, node: u64) -> u64 {
    match kind {
        SNodeKind::Dynamic => u64::from(rt.memory().load_i32(node).max(0) as u32),
        SNodeKind::Root => 1,
        _ => meta.max_num_elements,
    }
}

// -- Bitmasked --

fn mask_word(node: u64, bitmask_offset: u64, i: u64) -> (u64, u64) {
    (node + bitmask_offset + (i / 64) * 8, 1u64 << (i % 64))
}

pub(crate) fn bitmask_get(rt: &Runtime, node: u64, bitmask_offset: u64, i: u64) -> bool {
    let (word, bit) = mask_word(node, bitmask_offset, i);
    rt.memory().load_u64(word) & bit != 0
}

// -- Dynamic --

/// Cell `i` of a dynamic node, if its chunk exists.
pub(crate) fn dynamic_cell(rt: &Runtime, node: u64, chunk_size: u64, cell_size: u64, i: u64) -> Option<u64> {
    let mem = rt.memory();
    let mut chunk = mem.load_u64(node + 8);
    for _ in 0..i / chunk_size {
        if chunk == NULL {
            return None;
        }
        chunk = mem.load_u64(chunk);
    }
    (chunk != NULL).then(|| chunk + 8 + (i % chunk_size) * cell_size)
}

/// The chunk holding element `i`, allocating missing chunks on the way.
fn dynamic_chunk(rt: &Runtime, meta: &Meta, node: u64, i: u64) -> u64 {
    let mem = rt.memory();
    let mut link = node + 8;
    let mut chunk = NULL;
    for _ in 0..=i / meta.chunk_size {
        chunk = mem.load_u64(link);
        if chunk == NULL {
            let fresh = mem.alloc(meta.chunk_bytes(), 8);
            chunk = match mem.compare_exchange(link, 8, NULL, fresh) {
                Ok(_) => fresh,
                Err(winner) => {
                    mem.free(fresh, meta.chunk_bytes(), 8);
                    winner
                }
            };
        }
        link = chunk;
    }
    chunk
}

/// Append `value` (stored as `i32` in the new cell); returns its index.
fn dynamic_append(rt: &Runtime, meta: &Meta, node: u64, value: u32) -> u32 {
    let mem = rt.memory();
    let i = mem.update(node, 4, |n| n + 1);
    let chunk = dynamic_chunk(rt, meta, node, i);
    let cell = chunk + 8 + (i % meta.chunk_size) * meta.element_size;
    mem.store(cell, 4, u64::from(value));
    i as u32
}

// -- Per-node callbacks --

/// `S{id}_from_parent_element`: the node inside a parent cell.
pub(crate) fn from_parent_element(rt: &Runtime, id: SNodeId, cell: u64) -> u64 {
    cell + rt.layout(id).offset_in_parent
}

/// `S{id}_refine_coordinates`: append this level's local index of element
/// `index` to each axis of the parent coordinates.
pub(crate) fn refine_coordinates(rt: &Runtime, id: SNodeId, input: u64, output: u64, index: u32) {
    let mem = rt.memory();
    let mut coords = [0i32; abi::coordinates::NUM_AXES as usize];
    for (k, c) in coords.iter_mut().enumerate() {
        *c = mem.load_i32(input + k as u64 * 4);
    }
    let mut rest = index;
    for axis in rt.tree()[id].axes.iter().rev() {
        let local = rest & ((1u32 << axis.bits) - 1);
        rest = rest.checked_shr(axis.bits).unwrap_or(0);
        let c = &mut coords[axis.axis as usize];
        *c = (((*c as u32) << axis.bits) | local) as i32;
    }
    for (k, c) in coords.iter().enumerate() {
        mem.store_i32(output + k as u64 * 4, *c);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
