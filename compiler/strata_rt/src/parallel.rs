//! Parallel loop drivers.
//!
//! CPU drivers fan work items out over a cached rayon pool; each item gets
//! its own thread-local buffer. GPU drivers run once per lane and stride
//! over the grid using the lane's indices.

use rayon::prelude::*;
use strata_ir::SNodeId;

use crate::abi;
use crate::host::NativeCx;

/// Arguments of `parallel_struct_for` / `gpu_struct_for_parts`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct StructFor {
    pub context: u64,
    pub snode: SNodeId,
    pub element_size: i32,
    pub element_split: i32,
    pub body: u64,
}

impl StructFor {
    fn part_size(&self) -> i32 {
        let split = self.element_split.max(1);
        (self.element_size.max(1) + split - 1) / split
    }

    /// Run part `item` of the list: element `item / split`, part
    /// `item % split`.
    fn run_part(&self, cx: NativeCx<'_>, list: &[u64], item: usize, tls: u64) {
        let split = self.element_split.max(1) as usize;
        let Some(&element) = list.get(item / split) else {
            return;
        };
        let mem = cx.runtime().memory();
        let part = (item % split) as i32;
        let first = mem.load_i32(element + abi::element::LOWER);
        let last = mem.load_i32(element + abi::element::UPPER);
        let lower = first + part * self.part_size();
        let upper = (lower + self.part_size()).min(last);
        if lower < upper {
            cx.call(
                self.body,
                &[
                    self.context,
                    tls,
                    element,
                    u64::from(lower as u32),
                    u64::from(upper as u32),
                ],
            );
        }
    }
}

/// `parallel_struct_for` on CPU targets.
pub(crate) fn cpu_struct_for(cx: NativeCx<'_>, sf: StructFor, tls_size: u64, num_threads: usize) {
    let rt = cx.runtime();
    let list = rt.list(sf.snode).lock().clone();
    let items = list.len() * sf.element_split.max(1) as usize;
    tracing::trace!(snode = %sf.snode, elements = list.len(), items, "parallel_struct_for");
    let work = |item: usize| {
        let mem = rt.memory();
        let size = tls_size.max(8);
        let tls = mem.alloc(size, 8);
        sf.run_part(cx, &list, item, tls);
        mem.free(tls, size, 8);
    };
    match rt.pool(num_threads) {
        Some(pool) => pool.install(|| (0..items).into_par_iter().for_each(work)),
        None => (0..items).for_each(work),
    }
}

/// `gpu_struct_for_parts`: the per-lane loop of the GPU entry point. Blocks
/// take parts round-robin; lanes of one block share a part.
pub(crate) fn gpu_struct_for_parts(cx: NativeCx<'_>, sf: StructFor, tls: u64) {
    let list = cx.runtime().list(sf.snode).lock().clone();
    let items = list.len() * sf.element_split.max(1) as usize;
    let mut item = cx.lane.block_idx as usize;
    while item < items {
        sf.run_part(cx, &list, item, tls);
        item += cx.lane.grid_dim.max(1) as usize;
    }
}

/// Prologue, body and epilogue of a range-for task.
#[derive(Copy, Clone, Debug)]
pub(crate) struct RangeFor {
    pub context: u64,
    pub begin: i32,
    pub end: i32,
    pub prologue: u64,
    pub body: u64,
    pub epilogue: u64,
    pub tls_size: u64,
}

impl RangeFor {
    fn with_tls(&self, cx: NativeCx<'_>, f: impl FnOnce(u64)) {
        let mem = cx.runtime().memory();
        let size = self.tls_size.max(8);
        let tls = mem.alloc(size, 8);
        if self.prologue != 0 {
            cx.call(self.prologue, &[self.context, tls]);
        }
        f(tls);
        if self.epilogue != 0 {
            cx.call(self.epilogue, &[self.context, tls]);
        }
        mem.free(tls, size, 8);
    }

    fn body(&self, cx: NativeCx<'_>, tls: u64, i: i32) {
        cx.call(self.body, &[self.context, tls, u64::from(i as u32)]);
    }
}

/// `cpu_parallel_range_for`: blocks of `block_dim` iterations, each with
/// its own TLS buffer and prologue/epilogue run.
pub(crate) fn cpu_range_for(cx: NativeCx<'_>, rf: RangeFor, num_threads: usize, block_dim: i32) {
    if rf.begin >= rf.end {
        return;
    }
    let block_dim = block_dim.max(1);
    let total = i64::from(rf.end) - i64::from(rf.begin);
    let blocks = ((total + i64::from(block_dim) - 1) / i64::from(block_dim)) as usize;
    let work = |b: usize| {
        let lo = rf.begin + b as i32 * block_dim;
        let hi = lo.saturating_add(block_dim).min(rf.end);
        rf.with_tls(cx, |tls| {
            for i in lo..hi {
                rf.body(cx, tls, i);
            }
        });
    };
    match cx.runtime().pool(num_threads) {
        Some(pool) => pool.install(|| (0..blocks).into_par_iter().for_each(work)),
        None => (0..blocks).for_each(work),
    }
}

/// `gpu_parallel_range_for`: grid-stride loop over `[begin, end)`.
pub(crate) fn gpu_range_for(cx: NativeCx<'_>, rf: RangeFor) {
    let lane = cx.lane;
    let stride = i64::from(lane.block_dim.max(1)) * i64::from(lane.grid_dim.max(1));
    let first = i64::from(rf.begin)
        + i64::from(lane.block_idx) * i64::from(lane.block_dim.max(1))
        + i64::from(lane.thread_idx);
    rf.with_tls(cx, |tls| {
        let mut i = first;
        while i < i64::from(rf.end) {
            rf.body(cx, tls, i as i32);
            i += stride;
        }
    });
}

pub(crate) fn block_barrier(cx: NativeCx<'_>) {
    cx.lane.sync();
}
