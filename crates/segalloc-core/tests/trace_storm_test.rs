use segalloc_core::{AllocatorConfig, BlockPtr, SafetyLevel, SegAllocator};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
enum Workload {
    SmallChurn,
    MixedSizes,
    ResizeHeavy,
    Sawtooth,
}

impl Workload {
    fn all() -> [Workload; 4] {
        [
            Workload::SmallChurn,
            Workload::MixedSizes,
            Workload::ResizeHeavy,
            Workload::Sawtooth,
        ]
    }

    fn size(self, rng: &mut XorShift64, step: usize) -> usize {
        match self {
            Workload::SmallChurn => rng.gen_range(1, 64),
            Workload::MixedSizes => match rng.gen_range(0, 9) {
                0 => rng.gen_range(4096, 70_000),
                1..=3 => rng.gen_range(256, 4096),
                _ => rng.gen_range(1, 256),
            },
            Workload::ResizeHeavy => rng.gen_range(1, 2048),
            Workload::Sawtooth => 16 << (step % 10),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Live {
    ptr: BlockPtr,
    len: usize,
    fill: u8,
}

fn fill(state: &mut SegAllocator, live: &Live) {
    state.payload_mut(live.ptr).unwrap()[..live.len].fill(live.fill);
}

fn verify(state: &SegAllocator, live: &Live) {
    let payload = state.payload(live.ptr).unwrap();
    assert!(
        payload[..live.len].iter().all(|&b| b == live.fill),
        "content of {:?} was clobbered",
        live
    );
}

fn run_trace(workload: Workload, seed: u64, steps: usize, safety: SafetyLevel) {
    let mut rng = XorShift64::new(seed);
    let mut state =
        SegAllocator::with_config(AllocatorConfig::default().with_safety(safety)).unwrap();
    let mut live: Vec<Live> = Vec::new();

    for step in 0..steps {
        let roll = rng.gen_range(0, 99);
        let resize_share = if matches!(workload, Workload::ResizeHeavy) { 50 } else { 15 };
        if live.is_empty() || roll < 45 {
            let len = workload.size(&mut rng, step);
            let ptr = state.allocate(len).unwrap().unwrap();
            assert_eq!(ptr.offset() % 8, 0);
            assert!(state.usable_size(ptr).unwrap() >= len);
            let entry = Live {
                ptr,
                len,
                fill: (step % 251) as u8,
            };
            fill(&mut state, &entry);
            live.push(entry);
        } else if roll < 45 + resize_share {
            let idx = rng.gen_range(0, live.len() - 1);
            let old = live[idx];
            verify(&state, &old);
            let len = workload.size(&mut rng, step);
            let ptr = state.resize(Some(old.ptr), len).unwrap().unwrap();
            assert!(state.usable_size(ptr).unwrap() >= len);
            let kept = old.len.min(len);
            assert!(
                state.payload(ptr).unwrap()[..kept]
                    .iter()
                    .all(|&b| b == old.fill),
                "step {step}: resize lost content"
            );
            let entry = Live {
                ptr,
                len,
                fill: old.fill,
            };
            fill(&mut state, &entry);
            live[idx] = entry;
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let gone = live.swap_remove(idx);
            verify(&state, &gone);
            state.release(gone.ptr).unwrap();
        }

        if let Err(violation) = state.check() {
            panic!("{workload:?} seed {seed} step {step}: {violation}\n{}", state.dump());
        }
        assert_eq!(state.live_blocks(), live.len());
    }

    for entry in live.drain(..) {
        verify(&state, &entry);
        state.release(entry.ptr).unwrap();
    }
    state.check().unwrap();
    let stats = state.stats();
    assert_eq!(stats.allocated_blocks, 0);
    assert!(stats.free_blocks <= 1);
    assert_eq!(state.live_bytes(), 0);
}

#[test]
fn deterministic_traces_keep_invariants() {
    for (i, workload) in Workload::all().into_iter().enumerate() {
        for seed in [0x9E37_79B9_7F4A_7C15_u64, 0xDEAD_BEEF_CAFE_F00D] {
            run_trace(workload, seed ^ i as u64, 600, SafetyLevel::Strict);
        }
    }
}

#[test]
fn hardened_traces_keep_invariants() {
    for workload in Workload::all() {
        run_trace(workload, 0x0123_4567_89AB_CDEF, 400, SafetyLevel::Hardened);
    }
}

#[test]
fn live_blocks_never_overlap() {
    let mut rng = XorShift64::new(0x5151_5151_5151_5151);
    let mut state = SegAllocator::init().unwrap();
    let mut live: Vec<BlockPtr> = Vec::new();

    for _ in 0..500 {
        if live.len() < 3 || rng.gen_range(0, 2) > 0 {
            live.push(state.allocate(rng.gen_range(1, 900)).unwrap().unwrap());
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            state.release(live.swap_remove(idx)).unwrap();
        }

        let mut spans: Vec<(usize, usize)> = live
            .iter()
            .map(|&ptr| (ptr.offset(), ptr.offset() + state.usable_size(ptr).unwrap()))
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(pair[0].1 < pair[1].0, "overlapping payloads {pair:?}");
        }
    }
}
