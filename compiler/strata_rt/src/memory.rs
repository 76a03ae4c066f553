//! Simulated device memory.
//!
//! A flat byte-addressed space backed by 64-bit atomic words. Every access
//! must be naturally aligned (1, 2, 4 or 8 bytes), so it touches exactly one
//! word; sub-word stores and read-modify-write operations are compare-exchange
//! loops on the containing word and never disturb neighbouring bytes.
//!
//! Address 0 is null. Allocation is a bump pointer with size-class free
//! lists; freed blocks are reused for requests of the same size and
//! alignment.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

pub const NULL: u64 = 0;

/// Bytes kept unallocated at the bottom of the address space.
const RESERVED: u64 = 64;

#[inline]
fn mask(size: u64) -> u64 {
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (size * 8)) - 1
    }
}

pub struct Memory {
    words: Box<[AtomicU64]>,
    brk: AtomicU64,
    free_lists: Mutex<FxHashMap<(u64, u64), Vec<u64>>>,
}

impl Memory {
    /// Create a memory of `capacity` bytes (rounded up to whole words).
    pub fn new(capacity: u64) -> Self {
        let words = capacity.div_ceil(8).max(RESERVED / 8 + 1);
        Memory {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
            brk: AtomicU64::new(RESERVED),
            free_lists: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.words.len() as u64 * 8
    }

    /// Bytes handed out by the bump allocator so far.
    pub fn used(&self) -> u64 {
        self.brk.load(Ordering::Relaxed)
    }

    #[inline]
    fn word(&self, addr: u64, size: u64) -> (&AtomicU64, u64) {
        assert!(
            matches!(size, 1 | 2 | 4 | 8) && addr % size == 0,
            "misaligned device access of {size} bytes at {addr:#x}"
        );
        assert!(addr >= RESERVED, "null device access at {addr:#x}");
        let index = (addr / 8) as usize;
        assert!(
            index < self.words.len(),
            "device address {addr:#x} out of bounds (capacity {:#x})",
            self.capacity()
        );
        (&self.words[index], (addr % 8) * 8)
    }

    /// Load `size` bytes, zero-extended.
    pub fn load(&self, addr: u64, size: u64) -> u64 {
        let (word, shift) = self.word(addr, size);
        (word.load(Ordering::Acquire) >> shift) & mask(size)
    }

    pub fn store(&self, addr: u64, size: u64, value: u64) {
        if size == 8 {
            let (word, _) = self.word(addr, 8);
            word.store(value, Ordering::Release);
        } else {
            self.update(addr, size, |_| value);
        }
    }

    /// Atomically replace the value at `addr` with `f(old)`; returns `old`.
    pub fn update(&self, addr: u64, size: u64, mut f: impl FnMut(u64) -> u64) -> u64 {
        let (word, shift) = self.word(addr, size);
        let m = mask(size);
        let mut current = word.load(Ordering::Acquire);
        loop {
            let old = (current >> shift) & m;
            let new = (current & !(m << shift)) | ((f(old) & m) << shift);
            match word.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return old,
                Err(actual) => current = actual,
            }
        }
    }

    /// Store `new` if the current value equals `expected`.
    pub fn compare_exchange(&self, addr: u64, size: u64, expected: u64, new: u64) -> Result<u64, u64> {
        let (word, shift) = self.word(addr, size);
        let m = mask(size);
        let mut current = word.load(Ordering::Acquire);
        loop {
            let old = (current >> shift) & m;
            if old != expected & m {
                return Err(old);
            }
            let next = (current & !(m << shift)) | ((new & m) << shift);
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(old),
                Err(actual) => current = actual,
            }
        }
    }

    // -- Typed helpers --

    pub fn load_u64(&self, addr: u64) -> u64 {
        self.load(addr, 8)
    }

    pub fn store_u64(&self, addr: u64, value: u64) {
        self.store(addr, 8, value);
    }

    pub fn load_i32(&self, addr: u64) -> i32 {
        self.load(addr, 4) as u32 as i32
    }

    pub fn store_i32(&self, addr: u64, value: i32) {
        self.store(addr, 4, u64::from(value as u32));
    }

    // -- Bulk --

    pub fn fill_zero(&self, addr: u64, len: u64) {
        let mut a = addr;
        let end = addr + len;
        while a < end {
            let step = if a % 8 == 0 && end - a >= 8 {
                8
            } else if a % 4 == 0 && end - a >= 4 {
                4
            } else {
                1
            };
            self.store(a, step, 0);
            a += step;
        }
    }

    pub fn copy(&self, dst: u64, src: u64, len: u64) {
        for i in 0..len {
            self.store(dst + i, 1, self.load(src + i, 1));
        }
    }

    pub fn write_bytes(&self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.store(addr + i as u64, 1, u64::from(*b));
        }
    }

    /// Read a NUL-terminated string.
    pub fn read_c_str(&self, addr: u64) -> String {
        let mut bytes = Vec::new();
        let mut a = addr;
        loop {
            let b = self.load(a, 1) as u8;
            if b == 0 {
                break;
            }
            bytes.push(b);
            a += 1;
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Copy `s` into fresh memory with a terminating NUL.
    pub fn alloc_c_str(&self, s: &str) -> u64 {
        let addr = self.alloc(s.len() as u64 + 1, 1);
        self.write_bytes(addr, s.as_bytes());
        addr
    }

    // -- Allocation --

    fn size_class(size: u64, align: u64) -> (u64, u64) {
        (size.max(1).next_multiple_of(16), align.max(8))
    }

    /// Allocate zeroed memory.
    ///
    /// # Panics
    ///
    /// Panics when the device memory is exhausted.
    pub fn alloc(&self, size: u64, align: u64) -> u64 {
        let class = Self::size_class(size, align);
        if let Some(addr) = self.free_lists.lock().get_mut(&class).and_then(Vec::pop) {
            self.fill_zero(addr, class.0);
            return addr;
        }
        let mut current = self.brk.load(Ordering::Relaxed);
        loop {
            let start = current.next_multiple_of(class.1);
            let end = start + class.0;
            assert!(
                end <= self.capacity(),
                "device memory exhausted: {size} bytes requested, {} of {} in use",
                current,
                self.capacity()
            );
            match self
                .brk
                .compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return start,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return a block obtained from [`Memory::alloc`] with the same size and
    /// alignment.
    pub fn free(&self, addr: u64, size: u64, align: u64) {
        if addr == NULL {
            return;
        }
        let class = Self::size_class(size, align);
        self.free_lists.lock().entry(class).or_default().push(addr);
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "tests use unwrap for concise assertions"
)]
mod tests;
