#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

//! Replays seeded random allocation traces against the public API.
//!
//! A shadow copy of every live payload is kept on the side; after each
//! operation the heap must pass its consistency check and every live block
//! must still hold exactly the bytes written into it.

use std::collections::HashMap;

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use tagalloc::{Addr, AllocError, Arena, Config, Heap};

const TRACE_LEN: usize = 2000;
const MAX_REQUEST: usize = 3000;

struct Tracer {
    heap: Heap<Arena>,
    live: HashMap<Addr, Vec<u8>>,
    rng: StdRng,
}

impl Tracer {
    fn new(seed: u64, heap: Heap<Arena>) -> Self {
        Self {
            heap,
            live: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn random_data(&mut self, len: usize) -> Vec<u8> {
        let mut data = vec![0; len];
        self.rng.fill(&mut data[..]);
        data
    }

    fn pick_live(&mut self) -> Option<Addr> {
        if self.live.is_empty() {
            return None;
        }
        let mut addrs = self.live.keys().copied().collect::<Vec<_>>();
        addrs.sort_unstable();
        Some(addrs[self.rng.gen_range(0..addrs.len())])
    }

    fn allocate(&mut self) {
        let size = self.rng.gen_range(1..=MAX_REQUEST);
        let data = self.random_data(size);
        let addr = self.heap.allocate(size).unwrap().unwrap();
        assert_eq!(addr.offset() % tagalloc::ALIGNMENT, 0);
        assert!(self.heap.usable_size(addr) >= size);
        assert!(!self.live.contains_key(&addr), "{addr} handed out twice");

        self.heap.payload_mut(addr)[..size].copy_from_slice(&data);
        self.live.insert(addr, data);
    }

    fn allocate_exact(&mut self, size: usize) {
        let data = self.random_data(size);
        let addr = self.heap.allocate(size).unwrap().unwrap();
        self.heap.payload_mut(addr)[..size].copy_from_slice(&data);
        self.live.insert(addr, data);
    }

    fn deallocate(&mut self) {
        let Some(addr) = self.pick_live() else {
            return;
        };
        self.live.remove(&addr);
        self.heap.deallocate(addr);
    }

    fn reallocate(&mut self) {
        let Some(addr) = self.pick_live() else {
            return;
        };
        let size = self.rng.gen_range(1..=MAX_REQUEST);
        let mut data = self.live.remove(&addr).unwrap();

        let new = self.heap.reallocate(addr, size).unwrap().unwrap();
        data.truncate(size);
        assert_eq!(&self.heap.payload(new)[..data.len()], &data[..]);

        // Fill the grown tail so the whole request is tracked.
        let tail = self.random_data(size - data.len());
        self.heap.payload_mut(new)[data.len()..size].copy_from_slice(&tail);
        data.extend_from_slice(&tail);
        self.live.insert(new, data);
    }

    fn step(&mut self) {
        match self.rng.gen_range(0..10) {
            0..=4 => self.allocate(),
            5..=7 => self.deallocate(),
            _ => self.reallocate(),
        }
        self.assert_consistent();
    }

    fn assert_consistent(&self) {
        self.heap.check().unwrap();
        for (addr, data) in &self.live {
            assert_eq!(&self.heap.payload(*addr)[..data.len()], &data[..]);
        }
        let stats = self.heap.stats();
        assert_eq!(stats.allocated_blocks, self.live.len());
    }

    fn release_all(&mut self) {
        let mut addrs = self.live.drain().map(|(addr, _)| addr).collect::<Vec<_>>();
        addrs.sort_unstable();
        for addr in addrs {
            self.heap.deallocate(addr);
        }
        self.heap.check().unwrap();

        let stats = self.heap.stats();
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free_block, stats.free_bytes);
    }
}

fn run_trace(seed: u64, config: Config) {
    let heap = Heap::with_config(Arena::default(), config).unwrap();
    let mut tracer = Tracer::new(seed, heap);
    for _ in 0..TRACE_LEN {
        tracer.step();
    }
    tracer.release_all();
}

#[test]
fn test_random_traces_default_config() {
    for seed in 0..4 {
        run_trace(seed, Config::default());
    }
}

#[test]
fn test_random_traces_small_chunks() {
    for seed in 100..104 {
        run_trace(seed, Config::new().with_chunk_size(64));
    }
}

#[test]
fn test_bounded_arena_runs_out_and_recovers() {
    let heap = Heap::new(Arena::new(64 * 1024)).unwrap();
    let mut tracer = Tracer::new(7, heap);

    let mut exhausted = false;
    for _ in 0..1000 {
        let size = tracer.rng.gen_range(512..=2048);
        match tracer.heap.allocate(size) {
            Ok(Some(addr)) => {
                let data = tracer.random_data(size);
                tracer.heap.payload_mut(addr)[..size].copy_from_slice(&data);
                tracer.live.insert(addr, data);
            }
            Err(AllocError::OutOfMemory { .. }) => {
                exhausted = true;
                break;
            }
            other => panic!("unexpected allocation result: {other:?}"),
        }
    }
    assert!(exhausted);
    tracer.assert_consistent();

    // Releasing half of the blocks makes room again.
    for _ in 0..tracer.live.len() / 2 {
        tracer.deallocate();
    }
    tracer.assert_consistent();
    tracer.allocate_exact(512);
    tracer.assert_consistent();
    tracer.release_all();
}
