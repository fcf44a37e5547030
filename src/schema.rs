use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::aspect_preset::AspectPreset;
use crate::error_codes::CodedError;

/// Two-component `f32` vector in normalized UV units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self::new(0.0, 0.0);
    pub const HALF: Self = Self::new(0.5, 0.5);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn splat(v: f32) -> Self {
        Self { x: v, y: v }
    }

    pub fn floor(self) -> Self {
        Self::new(self.x.floor(), self.y.floor())
    }

    /// Componentwise GLSL `fract` (`x - floor(x)`).
    pub fn fract(self) -> Self {
        Self::new(crate::noise::fract(self.x), crate::noise::fract(self.y))
    }

    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    pub fn min_element(self) -> f32 {
        self.x.min(self.y)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Self;
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Linear RGBA color. Channels are not clamped; see [`Rgba::to_rgba8`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    /// Quantize for an 8-bit output surface. This is the only place values
    /// above 1.0 (additive highlights) are clamped.
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    pub fn from_rgba8(px: [u8; 4]) -> Self {
        let f = |v: u8| f32::from(v) / 255.0;
        Self::new(f(px[0]), f(px[1]), f(px[2]), f(px[3]))
    }

    pub fn max_abs_diff(self, other: Self) -> f32 {
        (self.r - other.r)
            .abs()
            .max((self.g - other.g).abs())
            .max((self.b - other.b).abs())
            .max((self.a - other.a).abs())
    }
}

/// Immutable per-frame snapshot of every user-facing effect control.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectParameters {
    /// Grid cell size in normalized frame units, `(0, 1]`.
    pub square_size: f32,
    pub distortion: f32,
    pub refraction: f32,
    pub magnification: f32,
    /// `[0, 1]`; higher values give lower-frequency, larger bumps.
    pub bumpiness: f32,
    pub bump_strength: f32,
    /// `[0, 1]`; `0` skips highlight compositing entirely.
    pub highlight: f32,
    pub zoom: f32,
    pub enabled: bool,
    /// Drives both the scrolling offset and wrap-around tiling.
    pub animate: bool,
    pub speed: f32,
    /// Scroll direction in degrees, any real value.
    pub direction: f32,
    /// Reserved; always 1.0.
    pub opacity: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            square_size: 0.05,
            distortion: 0.15,
            refraction: 0.5,
            magnification: 0.3,
            bumpiness: 0.5,
            bump_strength: 1.0,
            highlight: 0.05,
            zoom: 1.0,
            enabled: true,
            animate: false,
            speed: 1.0,
            direction: 0.0,
            opacity: 1.0,
        }
    }
}

/// Every parameter name accepted by `--set`, in declaration order.
pub const PARAMETER_NAMES: [&str; 13] = [
    "square_size",
    "distortion",
    "refraction",
    "magnification",
    "bumpiness",
    "bump_strength",
    "highlight",
    "zoom",
    "enabled",
    "animate",
    "speed",
    "direction",
    "opacity",
];

impl EffectParameters {
    /// Values restored by the "reset all" control. These intentionally differ
    /// from the startup defaults in `bump_strength` and `highlight`.
    pub fn reset_values() -> Self {
        Self {
            bump_strength: 0.1,
            highlight: 0.3,
            ..Self::default()
        }
    }

    /// Parameters with every distortion and highlight term switched off.
    /// The effect stays enabled, so the grid still runs but contributes nothing.
    pub fn neutral() -> Self {
        Self {
            distortion: 0.0,
            refraction: 0.0,
            magnification: 0.0,
            bumpiness: 0.0,
            bump_strength: 0.0,
            highlight: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let scalars = [
            ("square_size", self.square_size),
            ("distortion", self.distortion),
            ("refraction", self.refraction),
            ("magnification", self.magnification),
            ("bumpiness", self.bumpiness),
            ("bump_strength", self.bump_strength),
            ("highlight", self.highlight),
            ("zoom", self.zoom),
            ("speed", self.speed),
            ("direction", self.direction),
            ("opacity", self.opacity),
        ];
        for (name, value) in scalars {
            if !value.is_finite() {
                bail!("{name} must be finite, got {value}");
            }
        }

        if self.square_size <= 0.0 || self.square_size > 1.0 {
            bail!("square_size must be in (0, 1], got {}", self.square_size);
        }
        if self.zoom <= 0.0 {
            bail!("zoom must be > 0, got {}", self.zoom);
        }
        for (name, value) in [("bumpiness", self.bumpiness), ("highlight", self.highlight)] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be in [0, 1], got {value}");
            }
        }
        for (name, value) in [
            ("distortion", self.distortion),
            ("refraction", self.refraction),
            ("magnification", self.magnification),
            ("bump_strength", self.bump_strength),
            ("speed", self.speed),
        ] {
            if value < 0.0 {
                bail!("{name} must be >= 0, got {value}");
            }
        }
        if self.opacity != 1.0 {
            bail!("opacity is reserved and must be 1.0, got {}", self.opacity);
        }

        Ok(())
    }

    /// Apply a single `name=value` override. Booleans accept `true/false/1/0`.
    pub fn apply_override(&mut self, name: &str, raw: &str) -> Result<()> {
        let raw = raw.trim();
        let slot = match name {
            "square_size" => &mut self.square_size,
            "distortion" => &mut self.distortion,
            "refraction" => &mut self.refraction,
            "magnification" => &mut self.magnification,
            "bumpiness" => &mut self.bumpiness,
            "bump_strength" => &mut self.bump_strength,
            "highlight" => &mut self.highlight,
            "zoom" => &mut self.zoom,
            "speed" => &mut self.speed,
            "direction" => &mut self.direction,
            "opacity" => &mut self.opacity,
            "enabled" => {
                self.enabled = parse_bool(name, raw)?;
                return Ok(());
            }
            "animate" => {
                self.animate = parse_bool(name, raw)?;
                return Ok(());
            }
            _ => {
                return Err(anyhow!(CodedError::usage(
                    "UNKNOWN_PARAMETER",
                    format!("unknown parameter '{name}'"),
                )
                .with_details(json!({
                    "provided": name,
                    "allowed": PARAMETER_NAMES,
                }))));
            }
        };

        *slot = raw.parse::<f32>().map_err(|_| {
            anyhow!(CodedError::usage(
                "INVALID_PARAMETER_VALUE",
                format!("parameter '{name}' expects a number, got '{raw}'"),
            ))
        })?;
        Ok(())
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(anyhow!(CodedError::usage(
            "INVALID_PARAMETER_VALUE",
            format!("parameter '{name}' expects true/false/1/0, got '{raw}'"),
        ))),
    }
}

/// A `--set name=value` command line override.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamOverride {
    pub name: String,
    pub value: String,
}

impl ParamOverride {
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((name, value)) = raw.split_once('=') else {
            return Err(anyhow!(CodedError::usage(
                "INVALID_SET_SYNTAX",
                format!("expected name=value, got '{raw}'"),
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!(CodedError::usage(
                "INVALID_SET_SYNTAX",
                format!("override '{raw}' is missing a parameter name"),
            )));
        }
        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Output frame selection: a named preset or explicit pixel dimensions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FrameSpec {
    Preset { preset: String },
    Explicit { width: u32, height: u32 },
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self::Preset {
            preset: AspectPreset::Landscape.keyword().to_owned(),
        }
    }
}

/// Largest frame side either backend will allocate.
pub const MAX_FRAME_SIDE: u32 = 16_384;

impl FrameSpec {
    pub fn dimensions_px(&self) -> Result<(u32, u32)> {
        match self {
            Self::Preset { preset } => Ok(AspectPreset::from_keyword(preset)?.dimensions_px()),
            Self::Explicit { width, height } => {
                if *width == 0 || *height == 0 {
                    bail!("frame must be positive, got {width}x{height}");
                }
                if *width > MAX_FRAME_SIDE || *height > MAX_FRAME_SIDE {
                    return Err(anyhow!(CodedError::usage(
                        "INVALID_FRAME_SIZE",
                        format!("frame {width}x{height} exceeds the {MAX_FRAME_SIDE}px side limit"),
                    )
                    .with_details(json!({
                        "width": width,
                        "height": height,
                        "max_side": MAX_FRAME_SIDE,
                    }))));
                }
                Ok((*width, *height))
            }
        }
    }
}

/// The YAML "look" file: frame, effect parameters, and initial pan.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Look {
    pub frame: FrameSpec,
    pub params: EffectParameters,
    pub pan: Vec2,
}

impl Look {
    pub fn validate(&self) -> Result<()> {
        self.frame.dimensions_px()?;
        self.params.validate()?;
        if !self.pan.is_finite() {
            bail!("pan must be finite, got ({}, {})", self.pan.x, self.pan.y);
        }
        Ok(())
    }
}
