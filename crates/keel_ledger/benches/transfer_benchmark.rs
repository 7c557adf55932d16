//! Benchmark comparing transfer strategies.
//!
//! Run with: cargo bench --package keel_ledger --bench transfer_benchmark

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keel_ledger::{AccountId, Ledger, TransferCoordinator};
use keel_sync::ResourceAllocator;

fn coordinators() -> Vec<(&'static str, TransferCoordinator)> {
    vec![
        ("ordered_locks", TransferCoordinator::ordered()),
        (
            "allocator",
            TransferCoordinator::with_allocator(Arc::new(ResourceAllocator::new())),
        ),
        ("global_lock", TransferCoordinator::global_lock()),
    ]
}

fn benchmark_uncontended_transfer(c: &mut Criterion) {
    let ledger = Ledger::with_balances(&[u64::MAX / 2, u64::MAX / 2]).unwrap();
    let a = ledger.get(AccountId(0)).unwrap();
    let b = ledger.get(AccountId(1)).unwrap();

    for (name, coordinator) in coordinators() {
        c.bench_function(&format!("transfer_uncontended_{name}"), |bench| {
            let mut flip = false;
            bench.iter(|| {
                flip = !flip;
                let (from, to) = if flip { (&a, &b) } else { (&b, &a) };
                black_box(coordinator.transfer(from, to, black_box(1)).unwrap())
            });
        });
    }
}

fn benchmark_disjoint_pairs(c: &mut Criterion) {
    // Four threads on four disjoint pairs: only the global lock serializes them.
    const THREADS: u32 = 4;
    const TRANSFERS: usize = 250;

    for (name, coordinator) in coordinators() {
        let coordinator = Arc::new(coordinator);
        let ledger = Arc::new(Ledger::with_balances(&[1_000_000; 2 * THREADS as usize]).unwrap());

        c.bench_function(&format!("transfer_disjoint_pairs_{name}"), |bench| {
            bench.iter(|| {
                let handles: Vec<_> = (0..THREADS)
                    .map(|t| {
                        let coordinator = Arc::clone(&coordinator);
                        let ledger = Arc::clone(&ledger);
                        thread::spawn(move || {
                            let a = ledger.get(AccountId(2 * t)).unwrap();
                            let b = ledger.get(AccountId(2 * t + 1)).unwrap();
                            for i in 0..TRANSFERS {
                                let (from, to) = if i % 2 == 0 { (&a, &b) } else { (&b, &a) };
                                black_box(coordinator.transfer(from, to, 1).unwrap());
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }
}

criterion_group!(benches, benchmark_uncontended_transfer, benchmark_disjoint_pairs);
criterion_main!(benches);
