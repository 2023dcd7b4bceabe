//! Benchmarks for speedbump components.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use speedbump::latency::{FixedLatency, LatencyGenerator, Wave, WaveformLatency};
use speedbump::metrics::MetricsCollector;
use speedbump::proxy::{Direction, DelayQueue};
use std::time::{Duration, Instant};

fn benchmark_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency");
    group.throughput(Throughput::Elements(1));

    let fixed = FixedLatency::new(Duration::from_millis(100));
    group.bench_function("fixed", |b| {
        b.iter(|| {
            black_box(fixed.generate());
        })
    });

    let constant = WaveformLatency::new(Instant::now(), Duration::from_millis(100), Duration::ZERO);
    group.bench_function("waveform_constant", |b| {
        b.iter(|| {
            black_box(constant.generate());
        })
    });

    let all_waves = WaveformLatency::new(
        Instant::now(),
        Duration::from_millis(100),
        Duration::from_millis(20),
    )
    .with_term(Wave::Sine, Duration::from_millis(50), Duration::from_secs(10))
    .with_term(Wave::Square, Duration::from_millis(30), Duration::from_secs(7))
    .with_term(Wave::Triangle, Duration::from_millis(20), Duration::from_secs(5))
    .with_term(Wave::Sawtooth, Duration::from_millis(10), Duration::from_secs(3));
    group.bench_function("waveform_all_terms_with_jitter", |b| {
        b.iter(|| {
            black_box(all_waves.generate());
        })
    });

    group.finish();
}

fn benchmark_delay_queue(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let payload = Bytes::from_static(&[0u8; 1024]);

    let mut group = c.benchmark_group("delay_queue");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("enqueue_dequeue_zero_delay", |b| {
        let queue = DelayQueue::new(1024);
        b.to_async(&runtime).iter(|| async {
            queue.enqueue(payload.clone(), Duration::ZERO).await.unwrap();
            black_box(queue.dequeue().await.unwrap());
        })
    });

    group.bench_function("enqueue_dequeue_batch_64", |b| {
        let queue = DelayQueue::new(64);
        b.to_async(&runtime).iter(|| async {
            for _ in 0..64 {
                queue.enqueue(payload.clone(), Duration::ZERO).await.unwrap();
            }
            for _ in 0..64 {
                black_box(queue.dequeue().await.unwrap());
            }
        })
    });

    group.finish();
}

fn benchmark_metrics(c: &mut Criterion) {
    let collector = MetricsCollector::new();

    let mut group = c.benchmark_group("metrics");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record_bytes", |b| {
        b.iter(|| {
            collector.record_bytes(black_box(Direction::Upstream), black_box(16384));
        })
    });

    group.bench_function("observe_delay", |b| {
        b.iter(|| {
            collector.observe_delay(black_box(Duration::from_millis(100)));
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_latency, benchmark_delay_queue, benchmark_metrics);

criterion_main!(benches);
