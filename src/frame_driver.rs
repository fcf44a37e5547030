//! Per-refresh resolution of parameters, pan, time and geometry into one
//! [`CompositorInputs`] snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::compositor::{CompositorInputs, PixelSource};
use crate::frame_fit::{FrameFitError, FrameGeometry};
use crate::offset::{resolve_offset, PanState, SharedPan};
use crate::schema::{EffectParameters, Look};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No source bound; ticks produce nothing.
    Idle,
    Rendering,
}

/// Everything a renderer needs to draw one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub inputs: CompositorInputs,
    pub frame_width: u32,
    pub frame_height: u32,
}

pub struct FrameDriver<S> {
    params: EffectParameters,
    pan: Arc<SharedPan>,
    frame_width: u32,
    frame_height: u32,
    geometry: Option<FrameGeometry>,
    source: Option<S>,
}

impl<S: PixelSource> FrameDriver<S> {
    pub fn new(frame_width: u32, frame_height: u32, params: EffectParameters) -> Result<Self> {
        if frame_width == 0 || frame_height == 0 {
            return Err(FrameFitError::ZeroFrame {
                width: frame_width,
                height: frame_height,
            }
            .into());
        }
        params.validate()?;
        Ok(Self {
            params,
            pan: Arc::new(SharedPan::default()),
            frame_width,
            frame_height,
            geometry: None,
            source: None,
        })
    }

    pub fn state(&self) -> DriverState {
        if self.source.is_some() {
            DriverState::Rendering
        } else {
            DriverState::Idle
        }
    }

    /// Bind a new source. The cached scale is rebuilt; the pan is kept.
    pub fn bind_source(&mut self, source: S) -> Result<()> {
        let geometry = FrameGeometry::new(
            self.frame_width,
            self.frame_height,
            source.width(),
            source.height(),
        )?;
        self.geometry = Some(geometry);
        self.source = Some(source);
        Ok(())
    }

    pub fn clear_source(&mut self) -> Option<S> {
        self.geometry = None;
        self.source.take()
    }

    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }

    pub fn resize_frame(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(geometry) = self.geometry.as_mut() {
            geometry.set_frame(width, height)?;
        } else if width == 0 || height == 0 {
            return Err(FrameFitError::ZeroFrame { width, height }.into());
        }
        self.frame_width = width;
        self.frame_height = height;
        Ok(())
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn frame_aspect(&self) -> f32 {
        self.frame_width as f32 / self.frame_height as f32
    }

    pub fn image_scale(&self) -> Option<f32> {
        self.geometry.as_ref().map(FrameGeometry::image_scale)
    }

    pub fn params(&self) -> &EffectParameters {
        &self.params
    }

    /// Replace the parameter snapshot; invalid sets are rejected and the
    /// previous snapshot stays in effect.
    pub fn set_params(&mut self, params: EffectParameters) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// Adopt a freshly loaded look's parameters and pan. The frame size is
    /// left alone; it follows the surface.
    pub fn apply_look(&mut self, look: &Look) -> Result<()> {
        self.set_params(look.params)?;
        self.pan.store(PanState::new(look.pan));
        Ok(())
    }

    /// Handle for feeding drags from another thread.
    pub fn pan_handle(&self) -> Arc<SharedPan> {
        Arc::clone(&self.pan)
    }

    pub fn pan(&self) -> PanState {
        self.pan.load()
    }

    pub fn set_pan(&self, pan: PanState) {
        self.pan.store(pan);
    }

    pub fn drag(&self, dx: f32, dy: f32) {
        self.pan.apply_drag(dx, dy, self.frame_aspect());
    }

    /// "Reset all": reset parameter values and zero the pan.
    pub fn reset(&mut self) {
        self.params = EffectParameters::reset_values();
        self.pan.store(PanState::default());
    }

    /// Resolve the inputs for the frame shown at `elapsed_time` seconds.
    /// Returns `None` while idle.
    pub fn tick(&mut self, elapsed_time: f32) -> Result<Option<FramePlan>> {
        let (Some(source), Some(geometry)) = (self.source.as_mut(), self.geometry.as_mut()) else {
            return Ok(None);
        };

        source.advance_to(elapsed_time)?;
        geometry.set_source(source.width(), source.height())?;

        let offset = resolve_offset(&self.pan.load(), &self.params, elapsed_time);
        Ok(Some(FramePlan {
            inputs: CompositorInputs::new(self.params, offset, geometry.image_scale(), elapsed_time),
            frame_width: self.frame_width,
            frame_height: self.frame_height,
        }))
    }
}

/// Monotonic clock with pause support, started at construction.
#[derive(Debug, Clone, Copy)]
pub struct RealtimeClock {
    anchor: Instant,
    banked: Duration,
    running: bool,
}

impl Default for RealtimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            banked: Duration::ZERO,
            running: true,
        }
    }

    pub fn elapsed(&self) -> Duration {
        if self.running {
            self.banked + self.anchor.elapsed()
        } else {
            self.banked
        }
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn toggle_pause(&mut self) {
        if self.running {
            self.banked += self.anchor.elapsed();
            self.running = false;
        } else {
            self.anchor = Instant::now();
            self.running = true;
        }
    }

    pub fn restart(&mut self) {
        self.banked = Duration::ZERO;
        self.anchor = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Rgba, Vec2};

    struct Blank(u32, u32);

    impl PixelSource for Blank {
        fn width(&self) -> u32 {
            self.0
        }

        fn height(&self) -> u32 {
            self.1
        }

        fn sample(&self, _uv: Vec2) -> Rgba {
            Rgba::new(0.0, 0.0, 0.0, 1.0)
        }
    }

    #[test]
    fn paused_clock_does_not_advance() {
        let mut clock = RealtimeClock::new();
        clock.anchor = Instant::now() - Duration::from_secs(3);
        clock.toggle_pause();
        let frozen = clock.elapsed();
        assert!(frozen >= Duration::from_secs(3));
        assert_eq!(clock.elapsed(), frozen);
        assert!(!clock.is_running());
    }

    #[test]
    fn restart_rewinds_to_zero() {
        let mut clock = RealtimeClock::new();
        clock.banked = Duration::from_secs(100);
        clock.restart();
        assert!(clock.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn idle_until_source_bound() {
        let mut driver =
            FrameDriver::<Blank>::new(100, 50, EffectParameters::default()).expect("driver");
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(driver.tick(1.0).expect("tick").is_none());

        driver.bind_source(Blank(100, 100)).expect("bind");
        assert_eq!(driver.state(), DriverState::Rendering);
        let plan = driver.tick(1.0).expect("tick").expect("plan");
        assert_eq!((plan.frame_width, plan.frame_height), (100, 50));
        assert!((plan.inputs.image_scale - 0.5).abs() < 1e-6);

        assert!(driver.clear_source().is_some());
        assert_eq!(driver.state(), DriverState::Idle);
    }

    #[test]
    fn rejects_invalid_params_and_keeps_previous() {
        let mut driver =
            FrameDriver::<Blank>::new(10, 10, EffectParameters::default()).expect("driver");
        let mut bad = EffectParameters::default();
        bad.zoom = 0.0;
        assert!(driver.set_params(bad).is_err());
        assert_eq!(driver.params().zoom, 1.0);
    }

    #[test]
    fn rejects_zero_sized_sources() {
        let mut driver =
            FrameDriver::<Blank>::new(10, 10, EffectParameters::default()).expect("driver");
        assert!(driver.bind_source(Blank(0, 10)).is_err());
        assert_eq!(driver.state(), DriverState::Idle);
    }
}
