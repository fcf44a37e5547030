//! Pan accumulation and time-driven scrolling, combined into the single UV
//! offset the compositor consumes.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::schema::{EffectParameters, Vec2};

/// Scales `elapsed * speed` into UV units per second.
pub const SCROLL_RATE: f32 = 0.1;

/// Accumulated drag displacement in normalized UV units.
///
/// Only [`apply_drag`] writes it; offset resolution never resets it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PanState {
    pub manual_offset: Vec2,
}

impl PanState {
    pub fn new(manual_offset: Vec2) -> Self {
        Self { manual_offset }
    }
}

/// The offset for this frame: the manual pan alone when static, plus a
/// scroll along `direction` that grows without bound while animating.
/// Wrap-around is left to the compositor's tiling.
pub fn resolve_offset(pan: &PanState, params: &EffectParameters, elapsed_time: f32) -> Vec2 {
    if !params.animate {
        return pan.manual_offset;
    }

    let t = elapsed_time * params.speed * SCROLL_RATE;
    let angle = params.direction * PI / 180.0;
    Vec2::new(
        angle.cos() * t + pan.manual_offset.x,
        angle.sin() * t + pan.manual_offset.y,
    )
}

/// Map a pointer drag in surface units into the pan accumulator. The sign is
/// inverted so the picture follows the pointer.
pub fn apply_drag(pan: &mut PanState, dx: f32, dy: f32, frame_aspect: f32) {
    pan.manual_offset += drag_delta(dx, dy, frame_aspect);
}

fn drag_delta(dx: f32, dy: f32, frame_aspect: f32) -> Vec2 {
    debug_assert!(frame_aspect > 0.0);
    Vec2::new(-dx / frame_aspect, -dy)
}

/// Pan state shared between an input thread and the render loop.
///
/// Both components live in one `AtomicU64` so a drag is never observed half
/// applied.
#[derive(Debug, Default)]
pub struct SharedPan {
    bits: AtomicU64,
}

impl SharedPan {
    pub fn new(pan: PanState) -> Self {
        Self {
            bits: AtomicU64::new(pack(pan.manual_offset)),
        }
    }

    pub fn load(&self) -> PanState {
        PanState::new(unpack(self.bits.load(Ordering::Acquire)))
    }

    pub fn store(&self, pan: PanState) {
        self.bits.store(pack(pan.manual_offset), Ordering::Release);
    }

    /// Atomic counterpart of [`apply_drag`].
    pub fn apply_drag(&self, dx: f32, dy: f32, frame_aspect: f32) {
        let delta = drag_delta(dx, dy, frame_aspect);
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(pack(unpack(bits) + delta))
            });
    }
}

fn pack(v: Vec2) -> u64 {
    (u64::from(v.x.to_bits()) << 32) | u64::from(v.y.to_bits())
}

fn unpack(bits: u64) -> Vec2 {
    Vec2::new(f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animated(speed: f32, direction: f32) -> EffectParameters {
        EffectParameters {
            animate: true,
            speed,
            direction,
            ..EffectParameters::default()
        }
    }

    #[test]
    fn static_mode_ignores_time() {
        let pan = PanState::new(Vec2::new(0.3, -0.7));
        let params = EffectParameters::default();
        for t in [0.0, 1.0, 1234.5] {
            assert_eq!(resolve_offset(&pan, &params, t), pan.manual_offset);
        }
    }

    #[test]
    fn zero_speed_contributes_nothing() {
        let pan = PanState::new(Vec2::new(0.125, 0.5));
        let offset = resolve_offset(&pan, &animated(0.0, 73.0), 99.0);
        assert_eq!(offset, pan.manual_offset);
    }

    #[test]
    fn ninety_degrees_scrolls_along_y() {
        let offset = resolve_offset(&PanState::default(), &animated(2.0, 90.0), 5.0);
        assert!(offset.x.abs() < 1e-6);
        assert!((offset.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn direction_is_periodic_in_degrees() {
        let a = resolve_offset(&PanState::default(), &animated(1.0, 45.0), 3.0);
        let b = resolve_offset(&PanState::default(), &animated(1.0, 405.0), 3.0);
        assert!((a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5);
    }

    #[test]
    fn shared_pan_round_trips_exact_bits() {
        let shared = SharedPan::new(PanState::new(Vec2::new(-0.0, 1.0e-30)));
        let loaded = shared.load();
        assert_eq!(loaded.manual_offset.x.to_bits(), (-0.0f32).to_bits());
        assert_eq!(loaded.manual_offset.y, 1.0e-30);
    }

    #[test]
    fn shared_pan_matches_plain_drag() {
        let mut plain = PanState::default();
        let shared = SharedPan::default();
        for (dx, dy) in [(0.1, 0.2), (-0.05, 0.0), (0.3, -0.4)] {
            apply_drag(&mut plain, dx, dy, 1.5);
            shared.apply_drag(dx, dy, 1.5);
        }
        assert_eq!(shared.load(), plain);
    }
}
