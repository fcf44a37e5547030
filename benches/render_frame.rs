//! Frame render benchmarks for the software path.
//! Run: cargo bench
//!
//! Compare against `--no-default-features` to see the rayon speedup.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossflute::compositor::CompositorInputs;
use crossflute::frame_driver::FrameDriver;
use crossflute::renderer::SoftwareRenderer;
use crossflute::schema::{EffectParameters, Vec2};
use crossflute::source::ImageSource;

fn noise_source(width: u32, height: u32) -> ImageSource {
    let mut state = 0x2545_f491_u32;
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        pixels.extend_from_slice(&[r, g, b, 255]);
    }
    ImageSource::from_rgba8(width, height, pixels).expect("noise source")
}

fn bench_software_render(c: &mut Criterion) {
    let source = noise_source(1024, 768);
    let renderer = SoftwareRenderer;

    let mut group = c.benchmark_group("render_frame");
    group.sample_size(20);

    let still = CompositorInputs::new(EffectParameters::default(), Vec2::ZERO, 0.75, 0.0);
    group.bench_function("software_1080x608_default", |b| {
        b.iter(|| {
            black_box(
                renderer
                    .render_frame_rgba(&source, black_box(&still), 1080, 608)
                    .expect("render"),
            )
        });
    });

    let bypass = CompositorInputs::new(
        EffectParameters {
            enabled: false,
            ..EffectParameters::default()
        },
        Vec2::ZERO,
        0.75,
        0.0,
    );
    group.bench_function("software_1080x608_bypass", |b| {
        b.iter(|| {
            black_box(
                renderer
                    .render_frame_rgba(&source, black_box(&bypass), 1080, 608)
                    .expect("render"),
            )
        });
    });

    group.finish();
}

fn bench_driver_tick(c: &mut Criterion) {
    let params = EffectParameters {
        animate: true,
        ..EffectParameters::default()
    };
    let mut driver = FrameDriver::new(1080, 1080, params).expect("driver");
    driver
        .bind_source(noise_source(64, 48))
        .expect("bind source");
    let mut elapsed = 0.0_f32;
    c.bench_function("frame_driver_tick", |b| {
        b.iter(|| {
            elapsed += 1.0 / 60.0;
            black_box(driver.tick(black_box(elapsed)).expect("tick"))
        });
    });
}

criterion_group!(benches, bench_software_render, bench_driver_tick);
criterion_main!(benches);
