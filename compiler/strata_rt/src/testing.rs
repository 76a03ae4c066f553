//! A host for runtime tests: natives by address, plus Rust closures standing
//! in for compiled functions.

use parking_lot::Mutex;
use strata_ir::{SNodeId, SNodeKind, SNodeTree};

use crate::host::{Host, Lane, NativeCx};
use crate::runtime::{Runtime, RuntimeConfig};
use crate::symbols::{NodeMethod, RuntimeFn};
use crate::{abi, natives};

const NATIVE: u64 = 1 << 40;
const CLOSURE: u64 = 2 << 40;

type Func = Box<dyn Fn(&TestHost, &[u64], &Lane<'_>) -> u64 + Send + Sync>;

pub struct TestHost {
    pub rt: Runtime,
    natives: Mutex<Vec<RuntimeFn>>,
    funcs: Vec<Func>,
}

impl TestHost {
    pub fn new(tree: &SNodeTree) -> Self {
        TestHost {
            rt: Runtime::new(tree, RuntimeConfig::default().with_memory_bytes(4 << 20)),
            natives: Mutex::new(Vec::new()),
            funcs: Vec::new(),
        }
    }

    /// Register a closure; returns its address.
    pub fn func(&mut self, f: impl Fn(&TestHost, &[u64], &Lane<'_>) -> u64 + Send + Sync + 'static) -> u64 {
        self.funcs.push(Box::new(f));
        CLOSURE | (self.funcs.len() as u64 - 1)
    }

    pub fn native(&self, f: RuntimeFn, args: &[u64]) -> u64 {
        natives::call(f, args, NativeCx { host: self, lane: &Lane::SERIAL })
    }

    /// Build the metadata object of `id` the way generated code does.
    pub fn meta(&self, tree: &SNodeTree, id: SNodeId) -> u64 {
        let mem = self.rt.memory();
        let node = &tree[id];
        let layout = self.rt.layout(id);
        let m = mem.alloc(abi::meta::SIZE, 8);
        mem.store_i32(m + abi::meta::SNODE_ID, id.raw() as i32);
        mem.store_i32(m + abi::meta::MORTON_DIM, i32::from(node.morton));
        mem.store_u64(m + abi::meta::ELEMENT_SIZE, layout.cell_size);
        mem.store_u64(m + abi::meta::MAX_NUM_ELEMENTS, layout.max_num_elements);
        mem.store_u64(m + abi::meta::CHUNK_SIZE, u64::from(node.chunk_size));
        let method = |method: NodeMethod| {
            if method.is_defined_for(node.kind) {
                self.native_address(RuntimeFn::Node(node.kind, method))
            } else {
                0
            }
        };
        mem.store_u64(m + abi::meta::LOOKUP_ELEMENT, method(NodeMethod::LookupElement));
        mem.store_u64(m + abi::meta::IS_ACTIVE, method(NodeMethod::IsActive));
        mem.store_u64(m + abi::meta::GET_NUM_ELEMENTS, method(NodeMethod::GetNumElements));
        if node.kind != SNodeKind::Place {
            mem.store_u64(
                m + abi::meta::FROM_PARENT_ELEMENT,
                self.native_address(RuntimeFn::FromParentElement(id)),
            );
            mem.store_u64(
                m + abi::meta::REFINE_COORDINATES,
                self.native_address(RuntimeFn::RefineCoordinates(id)),
            );
        }
        m
    }
}

impl Host for TestHost {
    fn runtime(&self) -> &Runtime {
        &self.rt
    }

    fn call(&self, addr: u64, args: &[u64], lane: &Lane<'_>) -> u64 {
        let index = (addr & ((1 << 40) - 1)) as usize;
        if addr & CLOSURE != 0 {
            (self.funcs[index])(self, args, lane)
        } else {
            let f = self.natives.lock()[index];
            natives::call(f, args, NativeCx { host: self, lane })
        }
    }

    fn native_address(&self, f: RuntimeFn) -> u64 {
        let mut natives = self.natives.lock();
        let index = natives.iter().position(|&g| g == f).unwrap_or_else(|| {
            natives.push(f);
            natives.len() - 1
        });
        NATIVE | index as u64
    }
}
