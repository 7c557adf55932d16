//! # Transfer Property Tests
//!
//! Opposing transfer storms between the same two accounts, run once per
//! strategy. Every run must:
//!
//! 1. finish (no deadlock), checked with a watchdog channel
//! 2. conserve the total balance
//! 3. leave balances that match the applied transfer counts exactly
//!
//! Run with: cargo test --package keel_ledger --test transfer_properties

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keel_ledger::{
    run_teller, AccountId, Ledger, LedgerConfig, TellerStats, TransferCoordinator, TransferRequest,
    TransferStrategy,
};
use keel_sync::{BoundedQueue, Envelope, ResourceAllocator, ShutdownPlan};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WATCHDOG: Duration = Duration::from_secs(60);

fn coordinators() -> Vec<TransferCoordinator> {
    vec![
        TransferCoordinator::ordered(),
        TransferCoordinator::with_allocator(Arc::new(ResourceAllocator::new())),
        TransferCoordinator::global_lock(),
    ]
}

#[test]
fn test_opposing_storms_conserve_money() {
    const ROUNDS: usize = 1_000;

    for coordinator in coordinators() {
        let strategy = coordinator.strategy();
        let coordinator = Arc::new(coordinator);
        let ledger = Arc::new(Ledger::with_balances(&[100, 50]).unwrap());
        let a_to_b = Arc::new(AtomicU64::new(0));
        let b_to_a = Arc::new(AtomicU64::new(0));
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        // (from, to, amount, applied counter)
        let lanes = [
            (AccountId(0), AccountId(1), 30, Arc::clone(&a_to_b)),
            (AccountId(1), AccountId(0), 10, Arc::clone(&b_to_a)),
        ];
        for (from, to, amount, applied) in lanes {
            let coordinator = Arc::clone(&coordinator);
            let ledger = Arc::clone(&ledger);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let source = ledger.get(from).unwrap();
                let target = ledger.get(to).unwrap();
                for _ in 0..ROUNDS {
                    if coordinator.transfer(&source, &target, amount).unwrap().is_applied() {
                        applied.fetch_add(1, Ordering::Relaxed);
                    }
                }
                done_tx.send(()).unwrap();
            });
        }

        for _ in 0..2 {
            done_rx
                .recv_timeout(WATCHDOG)
                .unwrap_or_else(|_| panic!("{strategy:?} transfers deadlocked"));
        }

        let x = i64::try_from(a_to_b.load(Ordering::Relaxed)).unwrap();
        let y = i64::try_from(b_to_a.load(Ordering::Relaxed)).unwrap();
        let a = i64::try_from(ledger.balance(AccountId(0)).unwrap()).unwrap();
        let b = i64::try_from(ledger.balance(AccountId(1)).unwrap()).unwrap();

        assert_eq!(ledger.total_balance(), 150, "{strategy:?}");
        assert_eq!(a, 100 - 30 * x + 10 * y, "{strategy:?}");
        assert_eq!(b, 50 + 30 * x - 10 * y, "{strategy:?}");
        if let Some(allocator) = coordinator.allocator() {
            assert_eq!(allocator.claimed_count(), 0);
        }
    }
}

#[test]
fn test_random_transfers_across_many_accounts() {
    const ACCOUNTS: u32 = 8;
    const THREADS: u64 = 6;
    const ROUNDS: usize = 2_000;

    for coordinator in coordinators() {
        let strategy = coordinator.strategy();
        let coordinator = Arc::new(coordinator);
        let ledger = Arc::new(Ledger::with_balances(&[1_000; ACCOUNTS as usize]).unwrap());
        let net: Arc<Vec<AtomicI64>> = Arc::new((0..ACCOUNTS).map(|_| AtomicI64::new(0)).collect());
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        for seed in 0..THREADS {
            let coordinator = Arc::clone(&coordinator);
            let ledger = Arc::clone(&ledger);
            let net = Arc::clone(&net);
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..ROUNDS {
                    let from = rng.gen_range(0..ACCOUNTS);
                    let to = (from + rng.gen_range(1..ACCOUNTS)) % ACCOUNTS;
                    let amount = rng.gen_range(1..=150u64);

                    let source = ledger.get(AccountId(from)).unwrap();
                    let target = ledger.get(AccountId(to)).unwrap();
                    if coordinator.transfer(&source, &target, amount).unwrap().is_applied() {
                        let signed = i64::try_from(amount).unwrap();
                        net[from as usize].fetch_sub(signed, Ordering::Relaxed);
                        net[to as usize].fetch_add(signed, Ordering::Relaxed);
                    }
                }
                done_tx.send(()).unwrap();
            });
        }

        for _ in 0..THREADS {
            done_rx
                .recv_timeout(WATCHDOG)
                .unwrap_or_else(|_| panic!("{strategy:?} transfers deadlocked"));
        }

        assert_eq!(ledger.total_balance(), u128::from(ACCOUNTS) * 1_000, "{strategy:?}");
        for (id, delta) in net.iter().enumerate() {
            let expected = 1_000 + delta.load(Ordering::Relaxed);
            let actual = ledger.balance(AccountId(u32::try_from(id).unwrap())).unwrap();
            assert_eq!(i64::try_from(actual).unwrap(), expected, "{strategy:?} account {id}");
            // Strict precondition: no balance ever reaches zero via a transfer.
            assert!(actual > 0);
        }
    }
}

#[test]
fn test_teller_pipeline_drains_every_request() {
    const PRODUCERS: usize = 3;
    const REQUESTS: usize = 500;

    let config = LedgerConfig::from_toml_str(
        r#"
        strategy = "allocator"
        request_queue_capacity = 8
        tellers = 4
        "#,
    )
    .unwrap();
    assert_eq!(config.strategy, TransferStrategy::Allocator);

    let ledger = Arc::new(Ledger::with_balances(&[500, 500, 500]).unwrap());
    let coordinator = Arc::new(TransferCoordinator::from_config(&config));
    let queue: Arc<BoundedQueue<Envelope<TransferRequest>>> =
        Arc::new(BoundedQueue::new(config.request_queue_capacity));
    let plan = ShutdownPlan::new(PRODUCERS, config.tellers);

    let tellers: Vec<_> = (0..config.tellers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || run_teller(&queue, &ledger, &coordinator))
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..REQUESTS {
                    let from = u32::try_from((producer + i) % 3).unwrap();
                    let to = (from + 1) % 3;
                    queue.put(Envelope::Payload(TransferRequest::new(
                        AccountId(from),
                        AccountId(to),
                        7,
                    )));
                }
                // Every producer owes a sentinel here (tellers >= producers).
                plan.emit(producer, &queue);
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut total = TellerStats::default();
        for handle in tellers {
            total.merge(handle.join().unwrap());
        }
        done_tx.send(total).unwrap();
    });
    let total = done_rx.recv_timeout(WATCHDOG).expect("tellers never stopped");

    assert_eq!(total.total(), u64::try_from(PRODUCERS * REQUESTS).unwrap());
    assert_eq!(total.rejected, 0);
    assert!(total.applied > 0);
    assert!(queue.is_empty());
    assert_eq!(ledger.total_balance(), 1_500);
}
