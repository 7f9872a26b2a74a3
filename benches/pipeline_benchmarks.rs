//! Benchmarks for the model-independent pipeline stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use imagenerd_bgremove::{
    compositing::{composite, Background},
    models::KnownModel,
    services::{decode_image, encode_base64, OutputFormatHandler},
    utils::ImagePreprocessor,
    OutputFormat, RemovalConfig,
};
use std::io::Cursor;

const SIZES: &[u32] = &[512, 1024, 2048];

fn photo(size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
    })
}

fn cutout(size: u32) -> RgbaImage {
    let center = size as f32 / 2.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let inside = (x as f32 - center).hypot(y as f32 - center) < center * 0.6;
        Rgba([120, 60, 30, if inside { 255 } else { 0 }])
    })
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_payload");
    for &size in SIZES {
        let mut buffer = Cursor::new(Vec::new());
        photo(size).write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
        let payload = encode_base64(buffer.get_ref());

        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| decode_image(black_box(payload), Some(2048)).unwrap());
        });
    }
    group.finish();
}

fn bench_preprocess(c: &mut Criterion) {
    let config = KnownModel::default_model().preprocessing_config();
    let mut group = c.benchmark_group("preprocess");
    for &size in SIZES {
        let image = DynamicImage::ImageRgb8(photo(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
            b.iter(|| ImagePreprocessor::preprocess_for_inference(black_box(image), &config).unwrap());
        });
    }
    group.finish();
}

fn bench_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("composite");
    for &size in SIZES {
        let foreground = cutout(size);
        let solid = Background::Solid(Rgb([255, 255, 255]));
        let backdrop = Background::Image(DynamicImage::ImageRgb8(photo(size / 2)));

        group.bench_with_input(BenchmarkId::new("solid", size), &foreground, |b, fg| {
            b.iter(|| composite(black_box(fg), &solid));
        });
        group.bench_with_input(BenchmarkId::new("image", size), &foreground, |b, fg| {
            b.iter(|| composite(black_box(fg), &backdrop));
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let config = RemovalConfig::default();
    let image = DynamicImage::ImageRgba8(cutout(1024));
    let mut group = c.benchmark_group("encode_1024");
    for format in [OutputFormat::Png, OutputFormat::Jpeg] {
        group.bench_function(format.as_str(), |b| {
            b.iter(|| OutputFormatHandler::encode(black_box(&image), format, &config).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_decode,
    bench_preprocess,
    bench_composite,
    bench_encode
);
criterion_main!(benches);
