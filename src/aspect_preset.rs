use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;

use crate::error_codes::CodedError;

/// Longest edge of every preset frame, in pixels.
pub const BASE_SIZE_PX: u32 = 1080;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectPreset {
    Square,
    Portrait,
    Vertical,
    Landscape,
    Classic,
}

impl AspectPreset {
    pub const ALL: [Self; 5] = [
        Self::Square,
        Self::Portrait,
        Self::Vertical,
        Self::Landscape,
        Self::Classic,
    ];

    /// Accepts either the ratio keyword (`16:9`) or the label (`landscape`).
    pub fn from_keyword(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|preset| {
                preset.keyword() == normalized || preset.label().to_ascii_lowercase() == normalized
            })
            .ok_or_else(|| {
                anyhow!(CodedError::usage(
                    "INVALID_ASPECT_PRESET",
                    format!("invalid aspect preset '{value}'"),
                )
                .with_details(json!({
                    "provided": value,
                    "allowed": Self::ALL.map(Self::keyword),
                })))
            })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "4:5",
            Self::Vertical => "9:16",
            Self::Landscape => "16:9",
            Self::Classic => "4:3",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Square => "Square",
            Self::Portrait => "Portrait",
            Self::Vertical => "Vertical",
            Self::Landscape => "Landscape",
            Self::Classic => "Classic",
        }
    }

    pub fn ratio(self) -> (u32, u32) {
        match self {
            Self::Square => (1, 1),
            Self::Portrait => (4, 5),
            Self::Vertical => (9, 16),
            Self::Landscape => (16, 9),
            Self::Classic => (4, 3),
        }
    }

    /// The longer side is [`BASE_SIZE_PX`]; the shorter side is rounded
    /// half-up from the exact ratio.
    pub fn dimensions_px(self) -> (u32, u32) {
        let (rw, rh) = self.ratio();
        let scaled = |num: u32, den: u32| (f64::from(BASE_SIZE_PX * num) / f64::from(den)).round() as u32;
        if rw == rh {
            (BASE_SIZE_PX, BASE_SIZE_PX)
        } else if rw > rh {
            (BASE_SIZE_PX, scaled(rh, rw))
        } else {
            (scaled(rw, rh), BASE_SIZE_PX)
        }
    }
}
