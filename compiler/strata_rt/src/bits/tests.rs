use super::*;
use std::sync::Arc;

#[test]
fn set_partial_bits_leaves_other_fields() {
    let mem = Memory::new(1024);
    let p = mem.alloc(4, 4);
    mem.store(p, 4, 0xFFFF_FFFF);
    set_partial_bits(&mem, p, 32, 4, 8, 0x12);
    assert_eq!(mem.load(p, 4), 0xFFFF_F12F);
    // Values wider than the field are truncated.
    set_partial_bits(&mem, p, 32, 0, 4, 0x1F5);
    assert_eq!(mem.load(p, 4), 0xFFFF_F125);
}

#[test]
fn full_width_field() {
    let mem = Memory::new(1024);
    let p = mem.alloc(8, 8);
    set_partial_bits(&mem, p, 64, 0, 64, u64::MAX - 1);
    assert_eq!(mem.load(p, 8), u64::MAX - 1);
}

#[test]
fn atomic_add_wraps_inside_field() {
    let mem = Memory::new(1024);
    let p = mem.alloc(2, 2);
    set_partial_bits(&mem, p, 16, 3, 4, 14);
    let old = atomic_add_partial_bits(&mem, p, 16, 3, 4, 3);
    assert_eq!(old, 14);
    assert_eq!((mem.load(p, 2) >> 3) & 0xF, 1);
    assert_eq!(mem.load(p, 2) & !(0xF << 3), 0);
}

#[test]
fn concurrent_adds_to_neighbouring_fields() {
    let mem = Arc::new(Memory::new(1024));
    let p = mem.alloc(4, 4);
    std::thread::scope(|s| {
        for field in 0..4u32 {
            let mem = Arc::clone(&mem);
            s.spawn(move || {
                for _ in 0..50 {
                    atomic_add_partial_bits(&mem, p, 32, field * 8, 8, 1);
                }
            });
        }
    });
    assert_eq!(mem.load(p, 4), 0x3232_3232);
}

#[test]
fn float_min_max() {
    let mem = Memory::new(1024);
    let p = mem.alloc(4, 4);
    mem.store(p, 4, u64::from(1.5f32.to_bits()));
    let old = atomic_float_extreme(&mem, p, 32, FloatExtreme::Min, u64::from((-2.0f32).to_bits()));
    assert_eq!(f32::from_bits(old as u32), 1.5);
    assert_eq!(f32::from_bits(mem.load(p, 4) as u32), -2.0);
    atomic_float_extreme(&mem, p, 32, FloatExtreme::Min, u64::from(3.0f32.to_bits()));
    assert_eq!(f32::from_bits(mem.load(p, 4) as u32), -2.0);

    let q = mem.alloc(8, 8);
    atomic_float_extreme(&mem, q, 64, FloatExtreme::Max, 7.25f64.to_bits());
    assert_eq!(f64::from_bits(mem.load(q, 8)), 7.25);
}
