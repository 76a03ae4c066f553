//! Active-element list generation.
//!
//! A node's list holds one [`abi::element`] record per (node instance,
//! index range) pair. The list of a child is generated from its parent's by
//! visiting every active parent cell, which is why struct-for tasks are
//! preceded by one listgen task per level below the root.
//!
//! Node methods and callbacks are taken from the metadata objects and
//! called through the host, exactly as generated code would.

use strata_ir::SNodeId;

use crate::abi;
use crate::host::NativeCx;
use crate::nodes::Meta;

/// `element_listgen_root` and `element_listgen_nonroot`.
///
/// Both walk the parent list; the root list always holds the root's single
/// element.
pub(crate) fn element_listgen(cx: NativeCx<'_>, parent_meta: u64, child_meta: u64) {
    let rt = cx.runtime();
    let mem = rt.memory();
    let parent = Meta::read(rt, parent_meta);
    let child = Meta::read(rt, child_meta);
    let fn_at = |meta: u64, field: u64| mem.load_u64(meta + field);
    let is_active = fn_at(parent_meta, abi::meta::IS_ACTIVE);
    let lookup = fn_at(parent_meta, abi::meta::LOOKUP_ELEMENT);
    let refine = fn_at(parent_meta, abi::meta::REFINE_COORDINATES);
    let from_parent = fn_at(child_meta, abi::meta::FROM_PARENT_ELEMENT);
    let num_elements = fn_at(child_meta, abi::meta::GET_NUM_ELEMENTS);
    let max_chunk = rt.config().listgen_max_element_size.max(1) as i32;

    let parents = rt.list(parent.snode).lock().clone();
    let refined = mem.alloc(abi::coordinates::SIZE, 8);
    let mut generated = Vec::new();
    for element in parents {
        let node = mem.load_u64(element + abi::element::ELEMENT);
        let lower = mem.load_i32(element + abi::element::LOWER);
        let upper = mem.load_i32(element + abi::element::UPPER);
        for j in lower..upper {
            let j = u64::from(j as u32);
            if cx.call(is_active, &[parent_meta, node, j]) & 1 == 0 {
                continue;
            }
            let cell = cx.call(lookup, &[parent_meta, node, j]);
            let ch = cx.call(from_parent, &[cell]);
            let n = cx.call(num_elements, &[child_meta, ch]) as u32 as i32;
            cx.call(refine, &[element + abi::element::PCOORD, refined, j]);
            let mut pcoord = [0i32; abi::coordinates::NUM_AXES as usize];
            for (k, c) in pcoord.iter_mut().enumerate() {
                *c = mem.load_i32(refined + k as u64 * 4);
            }
            let mut lo = 0;
            while lo < n {
                let hi = lo.saturating_add(max_chunk).min(n);
                generated.push(rt.new_element(ch, lo, hi, &pcoord));
                lo = hi;
            }
        }
    }
    mem.free(refined, abi::coordinates::SIZE, 8);
    tracing::trace!(
        parent = %parent.snode,
        child = %child.snode,
        elements = generated.len(),
        "listgen"
    );
    rt.list(child.snode).lock().extend(generated);
}

pub(crate) fn clear_list(cx: NativeCx<'_>, snode: SNodeId) {
    cx.runtime().clear_list(snode);
}

pub(crate) fn node_gc(cx: NativeCx<'_>, snode: SNodeId) {
    cx.runtime().node_gc(snode);
}
