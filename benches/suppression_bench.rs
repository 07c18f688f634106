// Suppression benchmark - measure the fusion hot path at tray-scale loads
//
// Run with: cargo bench --bench suppression_bench

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion,
};
use harvest_common::{Detection, Scale};
use harvest_fusion::{compensate, edge_complexity, suppress, FusionConfig};
use image::{ImageBuffer, Rgb, RgbImage};

/// Deterministic pseudo-random detections spread over a 1280x1280 frame
fn synthetic_detections(count: usize) -> Vec<Detection> {
    let scales = [
        Scale::new(320, 320),
        Scale::new(640, 640),
        Scale::new(960, 960),
    ];
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    (0..count)
        .map(|i| Detection {
            x: (next() % 1200) as i32,
            y: (next() % 1200) as i32,
            w: 20 + (next() % 60) as i32,
            h: 20 + (next() % 60) as i32,
            confidence: 0.3 + (next() % 70) as f32 / 100.0,
            class_id: 32,
            source_scale: scales[i % scales.len()],
        })
        .collect()
}

/// Benchmark greedy suppression at typical and worst-case tray densities
fn bench_suppression(c: &mut Criterion) {
    let mut group = c.benchmark_group("suppression");
    let config = FusionConfig::default();

    for count in [50, 200, 1000] {
        let detections = synthetic_detections(count);
        group.bench_with_input(
            BenchmarkId::new("greedy", count),
            &detections,
            |b, detections| {
                b.iter_batched(
                    || detections.clone(),
                    |input| black_box(suppress(input, &config)),
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmark the confidence compensation sweep
fn bench_compensation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compensation");
    let config = FusionConfig::default();
    let detections = synthetic_detections(1000);

    group.bench_function("sweep_1000", |b| {
        b.iter_batched(
            || detections.clone(),
            |input| black_box(compensate(input, &config)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmark edge complexity scoring on a busy synthetic tray
fn bench_edge_complexity(c: &mut Criterion) {
    let mut group = c.benchmark_group("edge_complexity");
    group.sample_size(20);
    let config = FusionConfig::default();

    let tray: RgbImage = ImageBuffer::from_fn(1280, 1280, |x, y| {
        Rgb([
            ((x + y) % 256) as u8,
            ((x * 2) % 256) as u8,
            ((y * 2) % 256) as u8,
        ])
    });

    group.bench_function("canny_1280x1280", |b| {
        b.iter(|| black_box(edge_complexity(black_box(&tray), &config)));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_suppression,
    bench_compensation,
    bench_edge_complexity
);
criterion_main!(benches);
