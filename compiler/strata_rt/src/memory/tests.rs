use super::*;
use proptest::prelude::*;
use std::sync::Arc;

#[test]
fn sub_word_stores_preserve_neighbours() {
    let mem = Memory::new(1024);
    let a = mem.alloc(8, 8);
    mem.store(a, 8, 0x1122_3344_5566_7788);
    mem.store(a + 2, 2, 0xBEEF);
    assert_eq!(mem.load(a, 8), 0x1122_3344_BEEF_7788);
    assert_eq!(mem.load(a + 1, 1), 0x77);
    assert_eq!(mem.load(a + 4, 4), 0x1122_3344);
}

#[test]
fn alloc_is_zeroed_and_reuses_freed_blocks() {
    let mem = Memory::new(4096);
    let a = mem.alloc(24, 8);
    mem.store_u64(a, 7);
    mem.free(a, 24, 8);
    let b = mem.alloc(20, 8);
    assert_eq!(a, b);
    assert_eq!(mem.load_u64(b), 0);
    assert!(a >= 64);
}

#[test]
fn compare_exchange_reports_current_value() {
    let mem = Memory::new(1024);
    let a = mem.alloc(8, 8);
    mem.store(a + 4, 4, 5);
    assert_eq!(mem.compare_exchange(a + 4, 4, 4, 9), Err(5));
    assert_eq!(mem.compare_exchange(a + 4, 4, 5, 9), Ok(5));
    assert_eq!(mem.load(a + 4, 4), 9);
}

#[test]
fn c_strings_round_trip() {
    let mem = Memory::new(1024);
    let s = mem.alloc_c_str("x = %d\n");
    assert_eq!(mem.read_c_str(s), "x = %d\n");
}

#[test]
#[should_panic(expected = "misaligned")]
fn misaligned_access_panics() {
    let mem = Memory::new(1024);
    let a = mem.alloc(8, 8);
    let _ = mem.load(a + 2, 4);
}

#[test]
fn concurrent_updates_on_one_word_do_not_lose_bytes() {
    let mem = Arc::new(Memory::new(1024));
    let a = mem.alloc(8, 8);
    std::thread::scope(|s| {
        for lane in 0..8u64 {
            let mem = Arc::clone(&mem);
            s.spawn(move || {
                for _ in 0..100 {
                    mem.update(a + lane, 1, |v| v + 1);
                }
            });
        }
    });
    for lane in 0..8 {
        assert_eq!(mem.load(a + lane, 1), 100);
    }
}

proptest! {
    #[test]
    fn store_then_load_is_masked(value: u64, size_log in 0u32..4, slot in 0u64..8) {
        let mem = Memory::new(1024);
        let size = 1u64 << size_log;
        let base = mem.alloc(64, 8);
        let addr = base + slot * size % 8;
        let addr = addr - addr % size;
        mem.store(addr, size, value);
        prop_assert_eq!(mem.load(addr, size), value & mask(size));
    }
}
