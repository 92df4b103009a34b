// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BENCHMARKS — aurum-core
//
// Hot paths: canonical hashing and Merkle root computation.
// Run: cargo bench -p aurum-core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::merkle::merkle_root;
use aurum_core::{Transaction, TxKind};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample_txs(count: usize) -> Vec<Transaction> {
    (0..count)
        .map(|i| {
            Transaction::new(
                TxKind::Transfer,
                "aur1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "aur1bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                10 + i as u64,
                1,
                1_700_000_000_000 + i as u64,
                None,
                i as u64,
            )
        })
        .collect()
}

fn bench_tx_id(c: &mut Criterion) {
    let tx = &sample_txs(1)[0];
    c.bench_function("tx_compute_id", |b| b.iter(|| black_box(tx.compute_id())));
}

fn bench_merkle_root(c: &mut Criterion) {
    let txs = sample_txs(200);
    c.bench_function("merkle_root_200", |b| b.iter(|| black_box(merkle_root(&txs))));
}

criterion_group!(benches, bench_tx_id, bench_merkle_root);
criterion_main!(benches);
