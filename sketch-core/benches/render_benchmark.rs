use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use sketch_core::render::{compress, decompress, render_document};
use sketch_core::{Point, RoomInfo, RoomStore, Stroke, StrokeRecord};

fn info() -> RoomInfo {
    RoomInfo {
        id: 1,
        name: "bench".into(),
        canvas_width: 1024,
        canvas_height: 768,
        created_at: 0,
    }
}

fn record(id: u64, points: usize) -> StrokeRecord {
    StrokeRecord {
        id,
        room_id: 1,
        width: 4,
        red: 40,
        green: 80,
        blue: 120,
        alpha: 0.7,
        created_at: 0,
        points: (0..points as u64)
            .map(|p| Point {
                id: id * 1000 + p,
                stroke_id: id,
                x: p as f64 * 1.25,
                y: (p as f64).sin() * 100.0,
            })
            .collect(),
    }
}

fn seeded_store(strokes: u64) -> RoomStore {
    let store = RoomStore::new();
    store.add_room(info(), 1).unwrap();
    for id in 1..=strokes {
        store.append_stroke(1, Stroke::new(record(id, 32)).unwrap()).unwrap();
    }
    store
}

fn bench_render_1000_strokes(c: &mut Criterion) {
    let records: Vec<StrokeRecord> = (1..=1000).map(|id| record(id, 32)).collect();

    c.bench_function("render_document_1000x32", |b| {
        b.iter(|| black_box(render_document(&info(), records.iter()).unwrap()))
    });
}

fn bench_append_to_built_cache(c: &mut Criterion) {
    let store = seeded_store(500);
    store.render(1).unwrap();
    let mut next = 501;

    c.bench_function("append_stroke_built_cache_500", |b| {
        b.iter(|| {
            let stroke = Stroke::new(record(next, 32)).unwrap();
            next += 1;
            black_box(store.append_stroke(1, stroke).unwrap());
        })
    });
}

fn bench_image_read(c: &mut Criterion) {
    let store = seeded_store(500);
    store.render(1).unwrap();

    c.bench_function("image_read_cached", |b| {
        b.iter(|| black_box(store.render(black_box(1)).unwrap()))
    });
}

fn bench_strokes_since(c: &mut Criterion) {
    let store = seeded_store(2000);

    c.bench_function("strokes_since_tail_10", |b| {
        b.iter(|| black_box(store.strokes_since(1, black_box(1990)).unwrap()))
    });
}

fn bench_stroke_encode(c: &mut Criterion) {
    let record = record(1, 64);

    c.bench_function("stroke_encode_64_points", |b| {
        b.iter(|| black_box(Arc::new(Stroke::new(black_box(record.clone())).unwrap())))
    });
}

fn bench_lz4_roundtrip(c: &mut Criterion) {
    let records: Vec<StrokeRecord> = (1..=200).map(|id| record(id, 32)).collect();
    let document = render_document(&info(), records.iter()).unwrap();

    c.bench_function("lz4_compress_document", |b| {
        b.iter(|| black_box(compress(black_box(&document))))
    });

    let compressed = compress(&document);
    c.bench_function("lz4_decompress_document", |b| {
        b.iter(|| black_box(decompress(black_box(&compressed)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_render_1000_strokes,
    bench_append_to_built_cache,
    bench_image_read,
    bench_strokes_since,
    bench_stroke_encode,
    bench_lz4_roundtrip,
);
criterion_main!(benches);
