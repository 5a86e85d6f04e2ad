#![no_main]
use libfuzzer_sys::fuzz_target;
use segalloc_core::{AllocatorConfig, SafetyLevel, SegAllocator};

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one operation: [op, size_lo, size_hi, slot].
    if data.len() < 4 {
        return;
    }

    let config = AllocatorConfig::default()
        .with_safety(SafetyLevel::Hardened)
        .with_heap_limit(4 << 20);
    let Ok(mut state) = SegAllocator::with_config(config) else {
        return;
    };
    let mut allocations = Vec::new();

    for chunk in data.chunks_exact(4) {
        let op = chunk[0] % 4;
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let slot = chunk[3] as usize;

        match op {
            0 => {
                if let Ok(Some(ptr)) = state.allocate(size) {
                    allocations.push(ptr);
                }
            }
            1 => {
                if !allocations.is_empty() {
                    let ptr = allocations.swap_remove(slot % allocations.len());
                    state.release(ptr).expect("release of a live pointer");
                }
            }
            2 => {
                if !allocations.is_empty() {
                    let idx = slot % allocations.len();
                    match state.resize(Some(allocations[idx]), size) {
                        Ok(Some(ptr)) => allocations[idx] = ptr,
                        Ok(None) => {
                            allocations.swap_remove(idx);
                        }
                        Err(_) => {}
                    }
                }
            }
            _ => {
                if let Ok(Some(ptr)) = state.allocate_zeroed(slot + 1, size) {
                    assert!(state.payload(ptr).expect("live payload").iter().all(|&b| b == 0));
                    allocations.push(ptr);
                }
            }
        }

        if let Err(violation) = state.check() {
            panic!("{violation}\n{}", state.dump());
        }
    }

    for ptr in allocations {
        state.release(ptr).expect("release of a live pointer");
    }
    assert!(state.check_invariants());
});
