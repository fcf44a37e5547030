use crossflute::aspect_preset::AspectPreset;
use crossflute::frame_fit::{compute_image_scale, FrameFitError, FrameGeometry};

const SIZES: [(u32, u32); 8] = [
    (1, 1),
    (1080, 608),
    (608, 1080),
    (4000, 3000),
    (3000, 4000),
    (1920, 1080),
    (7, 1000),
    (1000, 7),
];

#[test]
fn scale_is_in_unit_interval_for_every_pairing() {
    for (sw, sh) in SIZES {
        for (fw, fh) in SIZES {
            let geometry = FrameGeometry::new(fw, fh, sw, sh).expect("geometry");
            let scale = geometry.image_scale();
            assert!(
                scale > 0.0 && scale <= 1.0,
                "{sw}x{sh} on {fw}x{fh}: scale {scale}"
            );
        }
    }
}

#[test]
fn scale_is_invariant_when_both_orientations_flip() {
    for (sw, sh) in SIZES {
        for (fw, fh) in SIZES {
            let upright = FrameGeometry::new(fw, fh, sw, sh).expect("geometry");
            let flipped = FrameGeometry::new(fh, fw, sh, sw).expect("geometry");
            let a = upright.image_scale();
            let b = flipped.image_scale();
            assert!((a - b).abs() < 1e-6, "{sw}x{sh} on {fw}x{fh}: {a} vs {b}");
        }
    }
}

#[test]
fn scale_is_the_smaller_aspect_ratio_quotient() {
    let landscape_source = 4.0 / 3.0;
    let vertical_frame = 9.0 / 16.0;
    let scale = compute_image_scale(landscape_source, vertical_frame);
    assert!((scale - vertical_frame / landscape_source).abs() < 1e-6);
    assert_eq!(compute_image_scale(vertical_frame, vertical_frame), 1.0);
}

#[test]
fn presets_cover_a_square_source() {
    for preset in AspectPreset::ALL {
        let (width, height) = preset.dimensions_px();
        let geometry = FrameGeometry::new(width, height, 512, 512).expect("geometry");
        let expected = (width.min(height) as f32) / (width.max(height) as f32);
        assert!((geometry.image_scale() - expected).abs() < 1e-3, "{preset:?}");
    }
}

#[test]
fn zero_sized_inputs_are_typed_errors() {
    assert_eq!(
        FrameGeometry::new(0, 10, 10, 10),
        Err(FrameFitError::ZeroFrame {
            width: 0,
            height: 10
        })
    );
    let mut geometry = FrameGeometry::new(10, 10, 10, 10).expect("geometry");
    let before = geometry.image_scale();
    assert_eq!(
        geometry.set_source(10, 0),
        Err(FrameFitError::ZeroSource {
            width: 10,
            height: 0
        })
    );
    assert_eq!(geometry.image_scale(), before);
}
