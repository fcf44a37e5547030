use crossflute::compositor::CompositorInputs;
use crossflute::frame_driver::FrameDriver;
use crossflute::offset::PanState;
use crossflute::renderer::{Renderer, SoftwareRenderer};
use crossflute::schema::{EffectParameters, Vec2};
use crossflute::source::ImageSource;

fn checker_source() -> ImageSource {
    let (width, height) = (48_u32, 32_u32);
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let on = ((x / 6) + (y / 6)) % 2 == 0;
            let shade = if on { 230 } else { 25 };
            pixels.extend_from_slice(&[shade, (x * 5) as u8, (y * 7) as u8, 255]);
        }
    }
    ImageSource::from_rgba8(width, height, pixels).expect("checker source")
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn render_hash(params: EffectParameters, pan: Vec2, elapsed: f32) -> u64 {
    let mut driver = FrameDriver::new(96, 54, params).expect("driver");
    driver.set_pan(PanState::new(pan));
    driver.bind_source(checker_source()).expect("bind");
    let plan = driver.tick(elapsed).expect("tick").expect("plan");

    let mut renderer = Renderer::new_software("test");
    let source = driver.source().expect("source");
    let rgba = renderer
        .render_frame_rgba(source, &plan.inputs, plan.frame_width, plan.frame_height)
        .expect("render");
    assert_eq!(rgba.len(), 96 * 54 * 4);
    fnv1a(&rgba)
}

#[test]
fn identical_inputs_render_identical_frames() {
    let params = EffectParameters::default();
    let first = render_hash(params, Vec2::new(0.1, -0.2), 0.0);
    let second = render_hash(params, Vec2::new(0.1, -0.2), 0.0);
    assert_eq!(first, second);
}

#[test]
fn animated_frames_repeat_for_the_same_clock_value() {
    let params = EffectParameters {
        animate: true,
        speed: 2.5,
        direction: 135.0,
        ..EffectParameters::default()
    };
    assert_eq!(
        render_hash(params, Vec2::ZERO, 3.25),
        render_hash(params, Vec2::ZERO, 3.25)
    );
    assert_ne!(
        render_hash(params, Vec2::ZERO, 3.25),
        render_hash(params, Vec2::ZERO, 7.5)
    );
}

#[test]
fn parameter_changes_change_the_frame() {
    let base = EffectParameters::default();
    let stronger = EffectParameters {
        magnification: 4.0,
        highlight: 0.6,
        ..base
    };
    assert_ne!(
        render_hash(base, Vec2::ZERO, 0.0),
        render_hash(stronger, Vec2::ZERO, 0.0)
    );
}

#[test]
fn frame_matches_per_pixel_evaluation() {
    let source = checker_source();
    let inputs = CompositorInputs::new(EffectParameters::default(), Vec2::new(0.3, 0.1), 0.8, 1.0);
    let whole = SoftwareRenderer
        .render_frame_rgba(&source, &inputs, 40, 30)
        .expect("render");

    let mut rows = Vec::with_capacity(whole.len());
    for py in 0..30 {
        for px in 0..40 {
            let uv = crossflute::renderer::pixel_center_uv(px, py, 40, 30);
            let color = crossflute::compositor::evaluate_pixel(&source, uv, &inputs);
            rows.extend_from_slice(&color.to_rgba8());
        }
    }
    assert_eq!(whole, rows);
}
