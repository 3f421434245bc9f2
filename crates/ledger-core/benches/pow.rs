use criterion::{criterion_group, criterion_main, Criterion};
use ledger_core::{mine::mine_block_parallel, now_millis, pow::mine_block, Block, Transaction};
use std::sync::atomic::AtomicBool;

fn sample_block() -> Block {
    let txs: Vec<Transaction> = (0..10)
        .map(|i| Transaction::new(format!("alice-{i}"), "bob", i + 1))
        .collect();
    Block::new(1, now_millis(), txs, "0")
}

fn bench_pow(c: &mut Criterion) {
    let never = AtomicBool::new(false);
    let block = sample_block();

    c.bench_function("mine_block_difficulty_3", |b| {
        b.iter(|| {
            let _mined = mine_block(block.clone(), 3, &never);
        });
    });

    c.bench_function("mine_block_parallel_difficulty_3", |b| {
        b.iter(|| {
            let _mined = mine_block_parallel(block.clone(), 3, &never);
        });
    });
}

criterion_group!(benches, bench_pow);
criterion_main!(benches);
