//! Sorted-set microbenchmarks: member insertion and rank-window queries.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use minikv::ds::zset::ZSet;

fn bench_add(c: &mut Criterion) {
    let members: Vec<(Vec<u8>, f64)> = (0..50_000)
        .map(|i| (format!("m{i:07}").into_bytes(), (i % 1000) as f64))
        .collect();
    c.bench_function("zset_add_50k", |b| {
        b.iter_batched(
            ZSet::new,
            |mut z| {
                for (name, score) in &members {
                    z.add(name, *score);
                }
                z
            },
            BatchSize::LargeInput,
        )
    });
}

fn bench_query_window(c: &mut Criterion) {
    let mut z = ZSet::new();
    for i in 0..50_000 {
        z.add(format!("m{i:07}").as_bytes(), (i % 1000) as f64);
    }
    c.bench_function("zset_query_walk_100", |b| {
        let mut score = 0.0f64;
        b.iter(|| {
            score = (score + 37.0) % 1000.0;
            let mut node = z.query(score, b"");
            let mut walked = 0;
            while node != minikv::ds::avl::NIL && walked < 100 {
                black_box(z.score_of(node));
                node = z.offset(node, 1);
                walked += 1;
            }
            walked
        })
    });
}

criterion_group!(benches, bench_add, bench_query_window);
criterion_main!(benches);
