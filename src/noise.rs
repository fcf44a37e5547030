//! Deterministic procedural noise and the GLSL-style scalar helpers the glass
//! shader is written in terms of.
//!
//! Everything here is `f32` so the CPU path evaluates the same arithmetic as the
//! WGSL shader in `shaders/wgsl/fluted_glass.wgsl`. The hash is not
//! cryptographic; it only has to be stable for identical inputs.

use crate::schema::Vec2;

const HASH_DOT: Vec2 = Vec2::new(12.9898, 78.233);
const HASH_SCALE: f32 = 43_758.545_312_3;

/// GLSL `fract`: `x - floor(x)`, always in `[0, 1)` for finite input.
///
/// Differs from [`f32::fract`] for negative values, which keeps the sign.
#[inline(always)]
pub fn fract(x: f32) -> f32 {
    x - x.floor()
}

/// GLSL `mix`.
#[inline(always)]
pub fn mix(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// GLSL `smoothstep` (Hermite, clamped).
#[inline(always)]
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Hash a 2D point to `[0, 1)`:
/// `fract(sin(dot(p, (12.9898, 78.233))) * 43758.5453123)`.
#[inline]
pub fn random(p: Vec2) -> f32 {
    fract((p.x * HASH_DOT.x + p.y * HASH_DOT.y).sin() * HASH_SCALE)
}

/// Smoothed value noise: bilinear blend of [`random`] at the four lattice
/// corners around `p`, weighted by the smoothstep of the fractional part.
pub fn value_noise(p: Vec2) -> f32 {
    interpolate_cell(p.floor(), p.fract())
}

/// Value noise inside one lattice cell. `f` is the position inside the cell;
/// `f = 1` on an axis lands exactly on the neighbouring cell's `f = 0` value.
pub fn interpolate_cell(cell: Vec2, f: Vec2) -> f32 {
    let a = random(cell);
    let b = random(cell + Vec2::new(1.0, 0.0));
    let c = random(cell + Vec2::new(0.0, 1.0));
    let d = random(cell + Vec2::new(1.0, 1.0));

    let u = Vec2::new(
        f.x * f.x * (3.0 - 2.0 * f.x),
        f.y * f.y * (3.0 - 2.0 * f.y),
    );

    mix(mix(a, b, u.x), mix(c, d, u.x), u.y)
}
