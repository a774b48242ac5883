use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use blockrun::{EncoderConfig, GorillaEncoderFactory, SegmentMetrics};

const T0: i32 = 1_600_000_000;

fn factory() -> GorillaEncoderFactory {
    GorillaEncoderFactory::new(EncoderConfig::default(), SegmentMetrics::noop())
}

/// A jittery gauge series: mostly flat with occasional moves, the shape
/// Gorilla compresses best.
fn series(count: usize) -> Vec<(i32, f64)> {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut value = 60.0f64;
    (0..count)
        .map(|i| {
            if rng.gen_ratio(1, 10) {
                value += rng.gen_range(-0.5..0.5);
            }
            (T0 + i as i32, value)
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let factory = factory();
    let mut group = c.benchmark_group("encode");
    for count in [100usize, 1000, 7200] {
        let data = series(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("{count}_points"), |b| {
            b.iter(|| {
                let mut enc = factory.create();
                enc.create_segment(T0).unwrap();
                for &(ts, v) in &data {
                    enc.add_data_point(black_box(ts), black_box(v)).unwrap();
                }
                enc.update_header();
                enc.free_segment();
            })
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let factory = factory();
    let mut enc = factory.create();
    enc.create_segment(T0).unwrap();
    for (ts, v) in series(7200) {
        enc.add_data_point(ts, v).unwrap();
    }

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(7200));
    group.bench_function("7200_points", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            enc.read(|_, v| sum += v).unwrap();
            black_box(sum)
        })
    });
    group.finish();
}

fn bench_read_and_dedupe(c: &mut Criterion) {
    let factory = factory();
    let mut enc = factory.create();
    enc.create_segment(T0).unwrap();
    for (ts, v) in series(7200) {
        enc.add_data_point(ts, v).unwrap();
    }

    let mut buf = vec![0.0f64; 7200];
    let mut group = c.benchmark_group("read_and_dedupe");
    group.throughput(Throughput::Elements(7200));
    group.bench_function("7200_points", |b| {
        b.iter(|| black_box(enc.read_and_dedupe(&mut buf).unwrap()))
    });
    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let factory = factory();
    let mut enc = factory.create();
    enc.create_segment(T0).unwrap();
    for (ts, v) in series(7200) {
        enc.add_data_point(ts, v).unwrap();
    }
    enc.update_header();

    let len = enc.serialization_length();
    let mut buf = vec![0u8; len];
    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Bytes(len as u64));
    group.bench_function("7200_points", |b| {
        b.iter(|| {
            enc.serialize(black_box(&mut buf), 0, len);
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_read,
    bench_read_and_dedupe,
    bench_serialize
);
criterion_main!(benches);
