use crossflute::offset::{apply_drag, resolve_offset, PanState, SharedPan};
use crossflute::schema::{EffectParameters, Vec2};

fn animated(speed: f32, direction: f32) -> EffectParameters {
    EffectParameters {
        animate: true,
        speed,
        direction,
        ..EffectParameters::default()
    }
}

#[test]
fn ten_seconds_at_unit_speed_scrolls_one_unit_along_x() {
    let pan = PanState::new(Vec2::new(0.25, -0.5));
    let offset = resolve_offset(&pan, &animated(1.0, 0.0), 10.0);
    assert!((offset.x - (1.0 + pan.manual_offset.x)).abs() < 1e-6);
    assert_eq!(offset.y, pan.manual_offset.y);
}

#[test]
fn drag_on_a_1600x900_frame_is_aspect_corrected_and_inverted() {
    let mut pan = PanState::default();
    apply_drag(&mut pan, 10.0, -5.0, 1600.0 / 900.0);
    assert!((pan.manual_offset.x - (-5.625)).abs() < 1e-4);
    assert_eq!(pan.manual_offset.y, 5.0);
}

#[test]
fn zero_drag_never_changes_the_pan() {
    let mut pan = PanState::new(Vec2::new(0.3, 0.7));
    for aspect in [0.5, 1.0, 16.0 / 9.0] {
        apply_drag(&mut pan, 0.0, 0.0, aspect);
        assert_eq!(pan.manual_offset, Vec2::new(0.3, 0.7));
    }

    let shared = SharedPan::new(pan);
    shared.apply_drag(0.0, 0.0, 1.25);
    assert_eq!(shared.load(), pan);
}

#[test]
fn static_offset_is_the_pan_at_any_time() {
    let pan = PanState::new(Vec2::new(-1.5, 2.25));
    let params = EffectParameters::default();
    for t in [0.0, 0.016, 60.0, 86_400.0] {
        assert_eq!(resolve_offset(&pan, &params, t), pan.manual_offset);
    }
}

#[test]
fn animated_scroll_keeps_accumulated_pan() {
    let mut pan = PanState::default();
    apply_drag(&mut pan, 0.5, 0.25, 2.0);
    let params = animated(2.0, 180.0);
    let later = resolve_offset(&pan, &params, 5.0);
    // resolve_offset reads the pan; it never folds time into it.
    assert_eq!(pan.manual_offset, Vec2::new(-0.25, -0.25));
    assert!((later.x - (-1.0 - 0.25)).abs() < 1e-5);
    assert!((later.y - (-0.25)).abs() < 1e-5);
}

#[test]
fn concurrent_drags_all_land() {
    let shared = std::sync::Arc::new(SharedPan::default());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = std::sync::Arc::clone(&shared);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    shared.apply_drag(-0.5, -0.25, 1.0);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("drag thread");
    }
    let pan = shared.load();
    assert_eq!(pan.manual_offset, Vec2::new(500.0, 250.0));
}
