//! Hash-map microbenchmarks: insert/lookup throughput and behavior while
//! an incremental resize is draining.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use minikv::ds::hmap::HMap;
use minikv::hashfn::key_hash;

fn keyset(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("key:{i:08}").into_bytes()).collect()
}

fn bench_insert(c: &mut Criterion) {
    let keys = keyset(100_000);
    c.bench_function("hmap_insert_100k", |b| {
        b.iter_batched(
            HMap::new,
            |mut m| {
                for (i, k) in keys.iter().enumerate() {
                    let h = key_hash(k);
                    m.insert(h, i as u32, |id| keys[id as usize] == *k);
                }
                m
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_lookup(c: &mut Criterion) {
    let keys = keyset(100_000);
    let mut m = HMap::new();
    for (i, k) in keys.iter().enumerate() {
        let h = key_hash(k);
        m.insert(h, i as u32, |id| keys[id as usize] == *k);
    }
    // Settle the incremental resize so lookups measure steady state.
    while m.is_rehashing() {
        m.lookup(0, |_| false);
    }
    c.bench_function("hmap_lookup_hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let k = &keys[i % keys.len()];
            i = i.wrapping_add(7919);
            black_box(m.lookup(key_hash(k), |id| keys[id as usize] == *k))
        })
    });
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
