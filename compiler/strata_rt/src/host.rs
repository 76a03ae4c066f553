//! The seam between the runtime and whatever executes generated code.
//!
//! Runtime helpers receive function pointers (loop bodies, node callbacks)
//! as plain addresses and call back through [`Host::call`]. Every call
//! carries the [`Lane`] it runs on so SPMD helpers can read their grid
//! position and synchronise with the rest of their block.

use std::sync::Barrier;

use crate::runtime::Runtime;
use crate::symbols::RuntimeFn;

/// Position of one executing lane in the launch grid.
#[derive(Copy, Clone, Debug)]
pub struct Lane<'a> {
    pub thread_idx: u32,
    pub block_idx: u32,
    pub block_dim: u32,
    pub grid_dim: u32,
    /// Block-local scratch buffer shared by the lanes of one block.
    pub bls: u64,
    pub barrier: Option<&'a Barrier>,
}

impl Lane<'static> {
    /// A single lane in a 1x1 grid.
    pub const SERIAL: Lane<'static> = Lane {
        thread_idx: 0,
        block_idx: 0,
        block_dim: 1,
        grid_dim: 1,
        bls: 0,
        barrier: None,
    };
}

impl Lane<'_> {
    /// Wait for every lane of the block.
    pub fn sync(&self) {
        if let Some(barrier) = self.barrier {
            barrier.wait();
        }
    }
}

/// Executes functions by address.
pub trait Host: Sync {
    fn runtime(&self) -> &Runtime;

    /// Call the function at `addr` with raw 64-bit arguments.
    fn call(&self, addr: u64, args: &[u64], lane: &Lane<'_>) -> u64;

    /// Address under which generated code can call the native `f`.
    fn native_address(&self, f: RuntimeFn) -> u64;
}

/// What a native runtime helper sees of its caller.
#[derive(Copy, Clone)]
pub struct NativeCx<'a> {
    pub host: &'a dyn Host,
    pub lane: &'a Lane<'a>,
}

impl<'a> NativeCx<'a> {
    pub fn runtime(&self) -> &'a Runtime {
        self.host.runtime()
    }

    pub fn call(&self, addr: u64, args: &[u64]) -> u64 {
        self.host.call(addr, args, self.lane)
    }
}
