//! Cover-fit scaling of an arbitrary-aspect source onto the output frame.
//!
//! The scale is applied as a divisor on centered UV
//! (`(uv - 0.5) / image_scale + 0.5`), so a value below 1 widens the sampled
//! window and the source is cropped rather than letterboxed.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Uniform scale that makes a source of `source_aspect` cover a frame of
/// `frame_aspect`. Always in `(0, 1]` for positive aspects.
pub fn compute_image_scale(source_aspect: f32, frame_aspect: f32) -> f32 {
    debug_assert!(source_aspect > 0.0 && frame_aspect > 0.0);
    let (scale_x, scale_y) = if source_aspect > frame_aspect {
        (frame_aspect / source_aspect, 1.0)
    } else {
        (1.0, source_aspect / frame_aspect)
    };
    f32::min(scale_x, scale_y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFitError {
    ZeroFrame { width: u32, height: u32 },
    ZeroSource { width: u32, height: u32 },
}

impl Display for FrameFitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroFrame { width, height } => {
                write!(f, "frame dimensions must be positive, got {width}x{height}")
            }
            Self::ZeroSource { width, height } => {
                write!(f, "source dimensions must be positive, got {width}x{height}")
            }
        }
    }
}

impl Error for FrameFitError {}

/// Output and source dimensions plus the cached cover-fit scale derived from
/// them. The scale is recomputed only when one of the dimensions changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    frame_width: u32,
    frame_height: u32,
    source_width: u32,
    source_height: u32,
    image_scale: f32,
    generation: u64,
}

impl FrameGeometry {
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        source_width: u32,
        source_height: u32,
    ) -> Result<Self, FrameFitError> {
        check_frame(frame_width, frame_height)?;
        check_source(source_width, source_height)?;
        let mut geometry = Self {
            frame_width,
            frame_height,
            source_width,
            source_height,
            image_scale: 1.0,
            generation: 0,
        };
        geometry.recompute();
        Ok(geometry)
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn frame_aspect(&self) -> f32 {
        self.frame_width as f32 / self.frame_height as f32
    }

    pub fn source_aspect(&self) -> f32 {
        self.source_width as f32 / self.source_height as f32
    }

    pub fn image_scale(&self) -> f32 {
        self.image_scale
    }

    /// Bumped every time the cached scale is recomputed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` when the dimensions changed and the scale was recomputed.
    pub fn set_frame(&mut self, width: u32, height: u32) -> Result<bool, FrameFitError> {
        check_frame(width, height)?;
        if (width, height) == (self.frame_width, self.frame_height) {
            return Ok(false);
        }
        self.frame_width = width;
        self.frame_height = height;
        self.recompute();
        Ok(true)
    }

    /// Returns `true` when the dimensions changed and the scale was recomputed.
    pub fn set_source(&mut self, width: u32, height: u32) -> Result<bool, FrameFitError> {
        check_source(width, height)?;
        if (width, height) == (self.source_width, self.source_height) {
            return Ok(false);
        }
        self.source_width = width;
        self.source_height = height;
        self.recompute();
        Ok(true)
    }

    fn recompute(&mut self) {
        self.image_scale = compute_image_scale(self.source_aspect(), self.frame_aspect());
        self.generation += 1;
    }
}

fn check_frame(width: u32, height: u32) -> Result<(), FrameFitError> {
    if width == 0 || height == 0 {
        return Err(FrameFitError::ZeroFrame { width, height });
    }
    Ok(())
}

fn check_source(width: u32, height: u32) -> Result<(), FrameFitError> {
    if width == 0 || height == 0 {
        return Err(FrameFitError::ZeroSource { width, height });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_aspects_need_no_scaling() {
        assert_eq!(compute_image_scale(16.0 / 9.0, 16.0 / 9.0), 1.0);
    }

    #[test]
    fn wider_source_is_scaled_by_frame_over_source() {
        let scale = compute_image_scale(2.0, 1.0);
        assert!((scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn taller_source_is_scaled_by_source_over_frame() {
        let scale = compute_image_scale(0.5, 1.0);
        assert!((scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn geometry_recomputes_only_on_change() {
        let mut geometry = FrameGeometry::new(1080, 608, 4000, 3000).expect("valid geometry");
        let first = geometry.generation();

        assert!(!geometry.set_frame(1080, 608).expect("same frame"));
        assert!(!geometry.set_source(4000, 3000).expect("same source"));
        assert_eq!(geometry.generation(), first);

        assert!(geometry.set_source(1000, 1000).expect("new source"));
        assert_eq!(geometry.generation(), first + 1);
        assert!((geometry.image_scale() - 608.0 / 1080.0).abs() < 1e-6);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert_eq!(
            FrameGeometry::new(100, 100, 0, 50),
            Err(FrameFitError::ZeroSource {
                width: 0,
                height: 50
            })
        );
        let mut geometry = FrameGeometry::new(100, 100, 10, 10).expect("valid");
        assert!(geometry.set_frame(0, 100).is_err());
        assert_eq!(geometry.frame_size(), (100, 100));
    }
}
