//! Admission benchmark
//!
//! Target: <1μs per local decision

use campus_common::ManualClock;
use campus_ratelimit::{IdentityKey, MemoryWindowStore, RateLimiter, RateLimiterConfig, WindowPolicy};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn local_hit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_store");
    let policy = WindowPolicy::new(u64::MAX, 10_000);

    group.bench_function("hot_key", |b| {
        let store = MemoryWindowStore::new();
        let now = Utc::now();
        b.iter(|| black_box(store.hit_now(black_box("ip:203.0.113.9"), &policy, now)))
    });

    for keys in [100usize, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("spread", keys), keys, |b, &keys| {
            let store = MemoryWindowStore::new();
            let now = Utc::now();
            let names: Vec<String> = (0..keys).map(|i| format!("ip:10.0.{}.{}", i / 256, i % 256)).collect();
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys;
                black_box(store.hit_now(&names[i], &policy, now))
            })
        });
    }

    group.finish();
}

fn limiter_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let limiter = RateLimiter::new(
        Arc::new(MemoryWindowStore::new()),
        Arc::new(ManualClock::starting_now()),
        RateLimiterConfig {
            default_policy: WindowPolicy::new(u64::MAX, 10_000),
            ..RateLimiterConfig::default()
        },
    );
    let identity = IdentityKey::custom("bench");

    c.bench_function("limiter_allow", |b| {
        b.iter(|| runtime.block_on(limiter.allow(black_box(&identity))))
    });
}

criterion_group!(benches, local_hit_benchmark, limiter_benchmark);
criterion_main!(benches);
