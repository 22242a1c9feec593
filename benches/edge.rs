use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use spreadx_rs::engine::edge::compute_edge;
use spreadx_rs::engine::types::{DepthSnapshot, EdgeParameters, PriceLevel, RouteProfile};
use spreadx_rs::market_data::normaliser::{KeyedLevel, Normaliser};
use spreadx_rs::market_data::retry::SystemClock;
use spreadx_rs::market_data::synchronizer::{BookDiff, BookSnapshot, BookSynchronizer};

fn bench_compute_edge(c: &mut Criterion) {
    let depth = DepthSnapshot::from_levels(
        &[PriceLevel::new(0.5410, 1200.0), PriceLevel::new(0.5409, 800.0), PriceLevel::new(0.5405, 5000.0)],
        &[PriceLevel::new(0.5425, 900.0), PriceLevel::new(0.5426, 300.0), PriceLevel::new(0.5430, 4000.0)],
    );
    let maker = EdgeParameters::default();
    let taker = EdgeParameters { route_profile: RouteProfile::TakerTaker, ..EdgeParameters::default() };

    c.bench_function("compute_edge_maker_maker", |b| {
        b.iter(|| compute_edge(black_box(0.5410), black_box(0.5425), &maker, None))
    });
    c.bench_function("compute_edge_taker_taker_depth", |b| {
        b.iter(|| compute_edge(black_box(0.5410), black_box(0.5425), &taker, Some(&depth)))
    });
}

fn bench_apply_diff(c: &mut Criterion) {
    let normaliser = Normaliser::default();
    let level = |price: f64, size: f64| KeyedLevel { key: normaliser.key_from_f64(price).unwrap(), price, size };
    let snapshot = BookSnapshot {
        sequence: 1,
        bids: (0..100).map(|i| level(0.5410 - i as f64 * 0.0001, 100.0)).collect(),
        asks: (0..100).map(|i| level(0.5425 + i as f64 * 0.0001, 100.0)).collect(),
    };
    let mut sync = BookSynchronizer::with_clock(25, 1024, Arc::new(SystemClock));
    sync.apply_snapshot(snapshot).unwrap();

    let mut sequence = 1;
    c.bench_function("synchronizer_apply_diff", |b| {
        b.iter(|| {
            sequence += 1;
            let size = (sequence % 7) as f64;
            let diff = BookDiff {
                sequence,
                bids: vec![level(0.5405, size)],
                asks: vec![level(0.5430, size + 1.0)],
            };
            black_box(sync.apply_diff(diff).unwrap());
        })
    });
}

criterion_group!(benches, bench_compute_edge, bench_apply_diff);
criterion_main!(benches);
