//! Multi-threaded properties of `ConcurrentQueue`.
//!
//! Sizes scale with `LFQ_OPS_PER_PRODUCER` so CI can run a longer soak.
//! Under miri every default shrinks, so the whole file, 8×8 stress run
//! included, runs with use-after-free and double-free detection on node
//! memory:
//!
//! ```bash
//! cargo +nightly miri test -p lfq-queue --test concurrency
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use lfq_queue::ConcurrentQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MIRI_OPS_PER_PRODUCER: u64 = 40;

fn ops_per_producer(default: u64) -> u64 {
    let default = if cfg!(miri) { MIRI_OPS_PER_PRODUCER } else { default };
    std::env::var("LFQ_OPS_PER_PRODUCER")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn tag(producer: u64, seq: u64) -> u64 {
    (producer << 32) | seq
}

fn untag(value: u64) -> (u64, u64) {
    (value >> 32, value & u64::from(u32::MAX))
}

/// Random mix of pushes and pops on every thread; afterwards the length
/// counter and the drained contents must account for every push.
#[test]
fn test_count_conservation() {
    const THREADS: u64 = 6;
    let ops = ops_per_producer(5_000);

    let queue = ConcurrentQueue::new();
    let results: Vec<(u64, Vec<u64>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let queue = &queue;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t);
                    let mut pushed = 0u64;
                    let mut popped = Vec::new();
                    for _ in 0..ops {
                        if rng.gen_bool(0.6) {
                            queue.push(tag(t, pushed));
                            pushed += 1;
                        } else if let Some(v) = queue.pop() {
                            popped.push(v);
                        }
                    }
                    (pushed, popped)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let total_pushed: u64 = results.iter().map(|(p, _)| p).sum();
    let total_popped: usize = results.iter().map(|(_, v)| v.len()).sum();
    let remaining = total_pushed as usize - total_popped;
    assert_eq!(queue.len(), remaining);

    let mut drained = Vec::new();
    while let Some(v) = queue.pop() {
        drained.push(v);
    }
    assert_eq!(drained.len(), remaining);
    assert!(queue.is_empty());

    let mut expected: Vec<u64> = results
        .iter()
        .enumerate()
        .flat_map(|(t, (pushed, _))| (0..*pushed).map(move |seq| tag(t as u64, seq)))
        .collect();
    expected.sort_unstable();
    let mut all: Vec<u64> = results.into_iter().flat_map(|(_, v)| v).collect();
    all.extend(drained);
    all.sort_unstable();
    assert_eq!(all, expected, "popped plus drained must equal pushed");
}

/// N producers × M tagged values drained by K consumers: every value
/// exactly once, and each consumer sees each producer's values in order.
#[test]
fn test_no_lost_no_duplicates_per_producer_fifo() {
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    let per_producer = ops_per_producer(10_000);
    let total = (PRODUCERS * per_producer) as usize;

    let queue = ConcurrentQueue::new();
    let delivered = AtomicUsize::new(0);
    let start_line = Barrier::new(PRODUCERS as usize + CONSUMERS);

    let received: Vec<Vec<u64>> = thread::scope(|s| {
        for p in 0..PRODUCERS {
            let (queue, start_line) = (&queue, &start_line);
            s.spawn(move || {
                start_line.wait();
                for seq in 0..per_producer {
                    queue.push(tag(p, seq));
                }
            });
        }

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let (queue, delivered, start_line) = (&queue, &delivered, &start_line);
                s.spawn(move || {
                    let mut got = Vec::new();
                    start_line.wait();
                    while delivered.load(Ordering::Relaxed) < total {
                        match queue.pop() {
                            Some(v) => {
                                delivered.fetch_add(1, Ordering::Relaxed);
                                got.push(v);
                            }
                            None => thread::yield_now(),
                        }
                    }
                    got
                })
            })
            .collect();
        consumers.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut seen = vec![false; total];
    for got in &received {
        let mut last: HashMap<u64, u64> = HashMap::new();
        for &v in got {
            let (p, seq) = untag(v);
            if let Some(prev) = last.insert(p, seq) {
                assert!(seq > prev, "producer {} out of order: {} after {}", p, seq, prev);
            }
            let index = (p * per_producer + seq) as usize;
            assert!(!seen[index], "duplicate value {:#x}", v);
            seen[index] = true;
        }
    }
    assert!(seen.iter().all(|s| *s), "lost elements");
    assert_eq!(queue.len(), 0);
    assert_eq!(queue.pop(), None);
}

/// Single consumer draining after concurrent producers sees per-producer
/// monotone sequences.
#[test]
fn test_single_consumer_sees_linking_order() {
    const PRODUCERS: u64 = 8;
    let per_producer = ops_per_producer(2_000);

    let queue = Arc::new(ConcurrentQueue::new());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..per_producer {
                    queue.push(tag(p, seq));
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }

    let mut next_expected = vec![0u64; PRODUCERS as usize];
    while let Some(v) = queue.pop() {
        let (p, seq) = untag(v);
        assert_eq!(seq, next_expected[p as usize], "producer {} skipped or reordered", p);
        next_expected[p as usize] += 1;
    }
    assert!(next_expected.iter().all(|n| *n == per_producer));
}

/// 8 producers × 8 consumers with owned payloads; every payload is
/// dropped exactly once, whether popped or left for teardown.
#[test]
fn test_stress_8x8_owned_payloads() {
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let per_producer = ops_per_producer(5_000) as usize;
    let drops = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(ConcurrentQueue::new());
    let start_line = Arc::new(Barrier::new(16));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let (queue, drops, start_line) = (Arc::clone(&queue), Arc::clone(&drops), Arc::clone(&start_line));
        handles.push(thread::spawn(move || {
            start_line.wait();
            for _ in 0..per_producer {
                queue.push(Tracked(Arc::clone(&drops)));
            }
        }));
    }
    for _ in 0..8 {
        let (queue, start_line) = (Arc::clone(&queue), Arc::clone(&start_line));
        handles.push(thread::spawn(move || {
            start_line.wait();
            for _ in 0..per_producer {
                drop(queue.pop());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let popped = drops.load(Ordering::Relaxed);
    assert_eq!(queue.len(), 8 * per_producer - popped);

    let queue = Arc::try_unwrap(queue).ok().unwrap();
    drop(queue);
    assert_eq!(drops.load(Ordering::Relaxed), 8 * per_producer);
}
