//! Ledger engine benchmarks over the in-memory store.
//!
//! Run with: cargo bench -p wallet-infra

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use wallet_core::{AccountId, Amount};
use wallet_infra::{InMemoryStorage, LedgerEngine};

fn id(raw: i64) -> AccountId {
    AccountId::new(raw).expect("positive account id")
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime")
}

fn funded_engine(rt: &Runtime, accounts: i64) -> LedgerEngine<InMemoryStorage> {
    let engine = LedgerEngine::new(Arc::new(InMemoryStorage::new()));
    rt.block_on(async {
        for raw in 1..=accounts {
            engine
                .deposit(id(raw), Amount::from_minor(1_000_000_000))
                .await
                .expect("seed deposit");
        }
    });
    engine
}

fn bench_single_account_mutations(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_account_mutations");
    let rt = runtime();

    group.bench_function("deposit", |b| {
        let engine = funded_engine(&rt, 1);
        b.iter(|| {
            rt.block_on(engine.deposit(id(1), black_box(Amount::from_minor(100))))
                .expect("deposit")
        });
    });

    group.bench_function("withdraw", |b| {
        let engine = funded_engine(&rt, 1);
        b.iter(|| {
            rt.block_on(engine.withdraw(id(1), black_box(Amount::from_minor(1))))
                .expect("withdraw")
        });
    });

    group.finish();
}

fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer");
    group.throughput(Throughput::Elements(1));
    let rt = runtime();

    group.bench_function("ping_pong", |b| {
        let engine = funded_engine(&rt, 2);
        let mut flip = false;
        b.iter(|| {
            flip = !flip;
            let (from, to) = if flip { (id(1), id(2)) } else { (id(2), id(1)) };
            rt.block_on(engine.transfer(from, to, black_box(Amount::from_minor(1))))
                .expect("transfer")
        });
    });

    group.finish();
}

fn bench_history_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_page");
    let rt = runtime();

    for rows in [10i64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("newest_50", rows), &rows, |b, &rows| {
            let engine = LedgerEngine::new(Arc::new(InMemoryStorage::new()));
            rt.block_on(async {
                for _ in 0..rows {
                    engine
                        .deposit(id(1), Amount::from_minor(1))
                        .await
                        .expect("seed deposit");
                }
            });
            b.iter(|| {
                rt.block_on(engine.history(id(1)).collect(black_box(50)))
                    .expect("history")
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_account_mutations,
    bench_transfer,
    bench_history_page
);
criterion_main!(benches);
