//! The per-pixel glass function.
//!
//! [`evaluate_pixel`] maps one screen-space UV to a lit output color. It reads
//! only its arguments, so a frame is an embarrassingly parallel map over
//! pixels (see `renderer`). The tile grid is always derived from the raw
//! screen UV: zoom and pan move the picture underneath a viewport-fixed grid.

use std::f32::consts::SQRT_2;

use crate::noise::{mix, smoothstep, value_noise};
use crate::schema::{EffectParameters, Rgba, Vec2};

/// Cool-white tint of the additive highlight.
pub const HIGHLIGHT_TINT: [f32; 3] = [1.0, 1.0, 1.05];

/// A decoded picture the compositor can sample.
///
/// Implementations must use repeat addressing at the edges so tiled scrolling
/// stays seamless. Decoding and playback stay behind this interface: the
/// compositor only ever sees the current frame.
pub trait PixelSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn sample(&self, uv: Vec2) -> Rgba;

    /// Tightly packed RGBA8 of the current frame, top row first, for
    /// uploading to a GPU texture.
    fn rgba8(&self) -> Option<&[u8]> {
        None
    }

    /// Changes whenever the current frame's pixels change.
    fn frame_serial(&self) -> u64 {
        0
    }

    /// Move to the frame that should be visible at `elapsed_time` seconds.
    fn advance_to(&mut self, _elapsed_time: f32) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Everything the compositor needs for one frame, resolved once per tick and
/// passed by value into every pixel evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorInputs {
    pub params: EffectParameters,
    pub offset: Vec2,
    pub image_scale: f32,
    /// Carried for parity with the GPU uniform block; no current term uses it.
    pub elapsed_time: f32,
    pub tiling: bool,
}

impl CompositorInputs {
    /// Inputs with tiling driven by `params.animate`, the way the frame
    /// driver couples them.
    pub fn new(params: EffectParameters, offset: Vec2, image_scale: f32, elapsed_time: f32) -> Self {
        Self {
            params,
            offset,
            image_scale,
            elapsed_time,
            tiling: params.animate,
        }
    }
}

/// Zoom, pan, cover-fit, then optional wrap: the coordinate the undistorted
/// picture is sampled at.
#[inline]
pub fn picture_uv(uv: Vec2, inputs: &CompositorInputs) -> Vec2 {
    let zoomed = (uv - Vec2::HALF) / inputs.params.zoom + Vec2::HALF;
    let panned = zoomed + inputs.offset;
    let fitted = (panned - Vec2::HALF) / inputs.image_scale + Vec2::HALF;
    if inputs.tiling {
        fitted.fract()
    } else {
        fitted
    }
}

/// Simulated magnification at a given distance from the nearest tile edge.
/// Equals `magnification` on the edge and `magnification * e^-4` at the center.
#[inline]
pub fn lens_strength(min_dist_from_edge: f32, magnification: f32) -> f32 {
    (-min_dist_from_edge * 8.0).exp() * magnification
}

/// Position of `uv` inside the screen-fixed grid: `(cell index, local uv)`.
#[inline]
pub fn grid_cell(uv: Vec2, square_size: f32) -> (Vec2, Vec2) {
    let scaled = uv / square_size;
    (scaled.floor(), scaled.fract())
}

/// Evaluate the glass effect for one output pixel.
///
/// Output color channels are never clamped; highlights may push them past
/// 1.0. Alpha is always `params.opacity` (1.0).
pub fn evaluate_pixel<S: PixelSource + ?Sized>(
    source: &S,
    uv: Vec2,
    inputs: &CompositorInputs,
) -> Rgba {
    let params = &inputs.params;
    debug_assert!(params.zoom > 0.0, "zoom must be > 0");
    debug_assert!(params.square_size > 0.0, "square_size must be > 0");
    debug_assert!(inputs.image_scale > 0.0, "image_scale must be > 0");

    let base_uv = picture_uv(uv, inputs);
    if !params.enabled {
        return source.sample(base_uv).with_alpha(1.0);
    }

    let (grid_pos, local_uv) = grid_cell(uv, params.square_size);

    let bump_scale = mix(100.0, 10.0, params.bumpiness);
    let bump_uv = local_uv * bump_scale;
    let bump_noise = value_noise(bump_uv + grid_pos * 10.0);
    let bump_offset = Vec2::new(
        value_noise(bump_uv + Vec2::new(1.0, 0.0)) - 0.5,
        value_noise(bump_uv + Vec2::new(0.0, 1.0)) - 0.5,
    ) * (params.bumpiness * params.bump_strength * 0.5);

    let min_dist_from_edge = local_uv.min(Vec2::splat(1.0) - local_uv).min_element();
    let edge_fade = smoothstep(0.0, 0.1, min_dist_from_edge);
    let bump_offset = bump_offset * edge_fade;

    let to_center = (local_uv + bump_offset) - Vec2::HALF;
    let magnified_offset =
        -to_center * (lens_strength(min_dist_from_edge, params.magnification) * params.square_size);
    let refraction_offset =
        to_center * (params.distortion * params.refraction * params.square_size * 2.0);

    let mut distorted_uv = base_uv + magnified_offset + refraction_offset;
    if inputs.tiling {
        distorted_uv = distorted_uv.fract();
    }

    let mut color = source.sample(distorted_uv);

    if params.highlight > 0.0 {
        let total = highlight_intensity(local_uv, min_dist_from_edge, bump_noise, params.highlight);
        color.r += HIGHLIGHT_TINT[0] * total;
        color.g += HIGHLIGHT_TINT[1] * total;
        color.b += HIGHLIGHT_TINT[2] * total;
    }

    color.with_alpha(params.opacity)
}

/// Sum of the edge glint, the broad corner gradient and the bump speculars.
/// Brightest toward the `local_uv = (0, 0)` corner of each tile.
fn highlight_intensity(local_uv: Vec2, min_edge_dist: f32, bump_noise: f32, highlight: f32) -> f32 {
    let edge_mask = (-min_edge_dist * 20.0).exp();
    let light_angle = (1.0 - local_uv.x) * (1.0 - local_uv.y);
    let edge_highlight = edge_mask * light_angle * highlight * 0.4;

    let diagonal_dist = local_uv.length() / SQRT_2;
    let gradient = (1.0 - diagonal_dist).powi(2) * highlight * 0.15;

    let specular = bump_noise * edge_mask * highlight * 0.2;

    edge_highlight + gradient + specular
}
