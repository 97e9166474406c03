// Ledger & vault benchmarks for SecureVault.
//
// Covers raw ledger credit/debit under the writer guard, concurrent balance
// reads, the full deposit/withdraw path through the in-process gateway, and
// sled-backed commits.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use secure_vault::storage::LedgerStore;
use secure_vault::{Ledger, MemoryTransfer, Principal, VaultConfig, VaultService};

fn principal(i: usize) -> Principal {
    format!("bench-{:06}", i).parse().unwrap()
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_credit_debit(c: &mut Criterion) {
    let rt = runtime();
    let ledger = Ledger::in_memory();
    let alice = principal(0);

    c.bench_function("ledger/credit_then_debit", |b| {
        b.to_async(&rt).iter(|| async {
            let mut guard = ledger.lock(&alice).await;
            guard.credit(1_000).await.unwrap();
            guard.debit(1_000).await.unwrap();
        });
    });
}

fn bench_balance_of(c: &mut Criterion) {
    let rt = runtime();
    let ledger = Ledger::in_memory();
    let mut group = c.benchmark_group("ledger/balance_of");

    for size in [10, 1_000, 100_000] {
        rt.block_on(async {
            for i in 0..size {
                ledger.credit(&principal(i), 1).await.unwrap();
            }
        });
        let target = principal(size / 2);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &target, |b, target| {
            b.iter(|| ledger.balance_of(target));
        });
    }

    group.finish();
}

fn bench_vault_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let vault = VaultService::new(
        Arc::new(Ledger::in_memory()),
        Arc::new(MemoryTransfer::new()),
        VaultConfig::default(),
    )
    .unwrap();
    let alice = principal(0);

    c.bench_function("vault/deposit_then_withdraw", |b| {
        b.to_async(&rt).iter(|| async {
            let incoming = vault.transfer().announce(&alice, 500);
            vault.deposit(&alice, 500, incoming).await.unwrap();
            vault.withdraw(&alice, 500).await.unwrap();
        });
    });
}

fn bench_persistent_credit(c: &mut Criterion) {
    let rt = runtime();
    let ledger = Ledger::open(LedgerStore::open_temporary().unwrap()).unwrap();
    let alice = principal(0);

    c.bench_function("ledger/sled_credit", |b| {
        b.to_async(&rt).iter(|| async {
            ledger.credit(&alice, 1).await.unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_credit_debit,
    bench_balance_of,
    bench_vault_round_trip,
    bench_persistent_credit,
);
criterion_main!(benches);
