//! Benchmarks for the Taglens tagging pipeline.
//!
//! Run with: cargo bench -p taglens-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use taglens_core::config::LimitsConfig;
use taglens_core::pipeline::{Batcher, Fingerprinter, ImageDecoder, ModelProfile, Preprocessor};
use taglens_core::tagging::{AggregationPolicy, Aggregator, LabelVocabulary, Thresholder};
use taglens_core::types::{Fingerprint, FrameUnit, MediaDescriptor, MediaKind, Tag};

fn frame(width: u32, height: u32) -> FrameUnit {
    FrameUnit {
        media: Arc::new(MediaDescriptor {
            path: PathBuf::from("bench.png"),
            kind: MediaKind::Image,
            fingerprint: Fingerprint::new("bench"),
            size: 0,
        }),
        frame_index: 0,
        timestamp_secs: None,
        image: DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        })),
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    frame(width, height)
        .image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn benchmark_content_hash(c: &mut Criterion) {
    let data = vec![0xA5u8; 4 * 1024 * 1024];

    c.bench_function("content_hash_blake3_4mb", |b| {
        b.iter(|| Fingerprinter::content_hash_from_bytes(black_box(&data)))
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let bytes = png_bytes(1024, 768);
    let decoder = ImageDecoder::new(LimitsConfig::default());
    let rt = tokio::runtime::Runtime::new().unwrap();
    let path = PathBuf::from("bench.png");

    c.bench_function("decode_png_1024", |b| {
        b.iter(|| {
            let _ = rt.block_on(decoder.decode_from_bytes(black_box(bytes.clone()), &path));
        })
    });
}

fn benchmark_preprocess(c: &mut Criterion) {
    let unit = frame(1920, 1080);
    let wd = Preprocessor::new(ModelProfile::wd_tagger());
    let generic = Preprocessor::new(ModelProfile::generic());

    c.bench_function("preprocess_wd_448_pad", |b| {
        b.iter(|| wd.prepare(black_box(&unit)).unwrap())
    });
    c.bench_function("preprocess_generic_224_exact", |b| {
        b.iter(|| generic.prepare(black_box(&unit)).unwrap())
    });
}

fn benchmark_batching(c: &mut Criterion) {
    let profile = ModelProfile::wd_tagger();
    let tensor = Preprocessor::new(profile.clone())
        .prepare(&frame(640, 480))
        .unwrap();

    c.bench_function("batch_and_stack_8", |b| {
        b.iter(|| {
            let mut batcher = Batcher::new(8, profile.shape());
            let mut batch = None;
            for _ in 0..8 {
                batch = batcher.push(tensor.clone()).unwrap();
            }
            batch.map(|b| b.stacked().unwrap())
        })
    });
}

fn benchmark_threshold(c: &mut Criterion) {
    let vocabulary = Arc::new(LabelVocabulary::from_labels(
        (0..10_000).map(|i| format!("label_{i}")),
    ));
    let thresholder = Thresholder::new(vocabulary, 0.35);
    let scores: Vec<f32> = (0..10_000).map(|i| (i % 100) as f32 / 100.0).collect();

    c.bench_function("threshold_10k_labels", |b| {
        b.iter(|| thresholder.apply(black_box(&scores)).unwrap())
    });

    let frames: Vec<Vec<Tag>> = (0..5).map(|_| thresholder.apply(&scores).unwrap()).collect();
    c.bench_function("aggregate_5_frames", |b| {
        b.iter(|| Aggregator::aggregate(AggregationPolicy::MaxPool, black_box(&frames)))
    });
}

criterion_group!(
    benches,
    benchmark_content_hash,
    benchmark_decode,
    benchmark_preprocess,
    benchmark_batching,
    benchmark_threshold,
);
criterion_main!(benches);
