//! Scheduler benchmarks
//!
//! All groups drive a manual tick source so the numbers measure queue and
//! flush overhead, not timer-thread latency.
//!
//! ```bash
//! cargo bench            # run everything
//! cargo bench queue      # queue/flush throughput only
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use tickline::testing::manual_context;
use tickline::SchedulerConfig;

const BATCH: usize = 100;

fn bench_queue_and_flush(c: &mut Criterion) {
    let (ctx, source) = manual_context(SchedulerConfig::default());
    c.bench_function("queue_and_flush_100", |b| {
        b.iter(|| {
            for i in 0..BATCH {
                ctx.macro_task(None, move || {
                    black_box(i);
                });
            }
            source.drain()
        })
    });
}

fn bench_queue_without_names(c: &mut Criterion) {
    let (ctx, source) = manual_context(SchedulerConfig::production());
    c.bench_function("queue_and_flush_100_production", |b| {
        b.iter(|| {
            for i in 0..BATCH {
                ctx.macro_task(None, move || {
                    black_box(i);
                });
            }
            source.drain()
        })
    });
}

fn bench_cancellation(c: &mut Criterion) {
    let (ctx, source) = manual_context(SchedulerConfig::default());
    c.bench_function("queue_cancel_flush_100", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..BATCH)
                .map(|i| {
                    ctx.macro_task(None, move || {
                        black_box(i);
                    })
                })
                .collect();
            for handle in &handles {
                handle.cancel();
            }
            source.drain()
        })
    });
}

fn bench_reentrant_chain(c: &mut Criterion) {
    let (ctx, source) = manual_context(SchedulerConfig::default());
    let micro = std::sync::Arc::clone(ctx.vpu(tickline::VpuKind::Micro));

    fn chain(vpu: std::sync::Arc<tickline::VirtualProcessorUnit>, depth: usize) {
        if depth == 0 {
            return;
        }
        let next = std::sync::Arc::clone(&vpu);
        vpu.queue(None, move || chain(next, depth - 1));
    }

    c.bench_function("reentrant_chain_depth_50", |b| {
        b.iter(|| {
            chain(std::sync::Arc::clone(&micro), 50);
            source.drain()
        })
    });
}

criterion_group!(
    name = queue;
    config = Criterion::default().sample_size(50);
    targets = bench_queue_and_flush, bench_queue_without_names, bench_cancellation
);

criterion_group!(
    name = flush;
    config = Criterion::default().sample_size(30);
    targets = bench_reentrant_chain
);

criterion_main!(queue, flush);
