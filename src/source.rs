//! Decoded pictures behind the compositor's [`PixelSource`] interface.
//!
//! UV convention (shared with the WGSL shader): `(0, 0)` is the bottom-left of
//! the picture and `v = 1` is its top row. Sampling is bilinear with repeat
//! addressing on both axes.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::{ImageReader, RgbaImage};
use serde_json::json;

use crate::compositor::PixelSource;
use crate::decoding::{probe_video, FfmpegInput, VideoInfo};
use crate::error_codes::CodedError;
use crate::schema::{Rgba, Vec2};

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "mov", "webm", "mkv", "avi", "m4v", "gif"];

/// A still picture held as tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct ImageSource {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageSource {
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(CodedError::source(
                "EMPTY_SOURCE",
                format!("source dimensions must be positive, got {width}x{height}"),
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| anyhow!("source dimensions {width}x{height} overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGBA buffer length mismatch: expected {expected} bytes, got {} bytes",
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_image(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgba8(width, height, image.into_raw())
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = ImageReader::open(path)
            .with_context(|| format!("failed opening {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("failed reading {}", path.display()))?
            .decode()
            .map_err(|error| {
                anyhow!(CodedError::source(
                    "UNDECODABLE_IMAGE",
                    format!("failed decoding {}: {error}", path.display()),
                ))
            })?
            .to_rgba8();
        Self::from_image(image)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.pixels
    }

    #[inline(always)]
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let xi = x.rem_euclid(i64::from(self.width)) as usize;
        let yi = y.rem_euclid(i64::from(self.height)) as usize;
        let idx = (yi * self.width as usize + xi) << 2;
        let px = &self.pixels[idx..idx + 4];
        [
            f32::from(px[0]) / 255.0,
            f32::from(px[1]) / 255.0,
            f32::from(px[2]) / 255.0,
            f32::from(px[3]) / 255.0,
        ]
    }
}

impl PixelSource for ImageSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn sample(&self, uv: Vec2) -> Rgba {
        // Texel centers sit at half-integers; row 0 is the top of the picture.
        let x = uv.x * self.width as f32 - 0.5;
        let y = (1.0 - uv.y) * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let p00 = self.texel(x0, y0);
        let p10 = self.texel(x0 + 1, y0);
        let p01 = self.texel(x0, y0 + 1);
        let p11 = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = p00[c] + (p10[c] - p00[c]) * fx;
            let bottom = p01[c] + (p11[c] - p01[c]) * fx;
            out[c] = top + (bottom - top) * fy;
        }
        Rgba::new(out[0], out[1], out[2], out[3])
    }

    fn rgba8(&self) -> Option<&[u8]> {
        Some(&self.pixels)
    }
}

/// Video decoded by an ffmpeg child process at native resolution. The
/// current frame follows the elapsed time and loops at end of stream.
pub struct VideoSource {
    path: PathBuf,
    info: VideoInfo,
    decoder: Option<FfmpegInput>,
    frame: ImageSource,
    frame_index: u64,
    total_frames: Option<u64>,
    serial: u64,
}

impl VideoSource {
    pub fn open(path: &Path) -> Result<Self> {
        let info = probe_video(path)?;
        let decoder = FfmpegInput::spawn(path, info.width, info.height)?;
        let first = decoder.read_frame().ok_or_else(|| {
            anyhow!(CodedError::source(
                "EMPTY_VIDEO",
                format!("{} contains no decodable frames", path.display()),
            )
            .with_details(json!({ "width": info.width, "height": info.height })))
        })?;
        let frame = ImageSource::from_rgba8(info.width, info.height, first)?;
        Ok(Self {
            path: path.to_path_buf(),
            info,
            decoder: Some(decoder),
            frame,
            frame_index: 0,
            total_frames: None,
            serial: 0,
        })
    }

    fn restart(&mut self) -> Result<()> {
        if let Some(decoder) = self.decoder.take() {
            decoder.finish()?;
        }
        let decoder = FfmpegInput::spawn(&self.path, self.info.width, self.info.height)?;
        let first = decoder
            .read_frame()
            .ok_or_else(|| anyhow!("{} stopped producing frames", self.path.display()))?;
        self.frame = ImageSource::from_rgba8(self.info.width, self.info.height, first)?;
        self.frame_index = 0;
        self.decoder = Some(decoder);
        self.serial += 1;
        Ok(())
    }
}

impl PixelSource for VideoSource {
    fn width(&self) -> u32 {
        self.info.width
    }

    fn height(&self) -> u32 {
        self.info.height
    }

    fn sample(&self, uv: Vec2) -> Rgba {
        self.frame.sample(uv)
    }

    fn rgba8(&self) -> Option<&[u8]> {
        Some(self.frame.as_raw())
    }

    fn frame_serial(&self) -> u64 {
        self.serial
    }

    fn advance_to(&mut self, elapsed_time: f32) -> Result<()> {
        let mut target = (f64::from(elapsed_time.max(0.0)) * self.info.fps).floor() as u64;
        if let Some(total) = self.total_frames {
            target %= total;
        }
        if target < self.frame_index {
            self.restart()?;
        }

        while self.frame_index < target {
            let next = self.decoder.as_ref().and_then(FfmpegInput::read_frame);
            match next {
                Some(bytes) => {
                    self.frame = ImageSource::from_rgba8(self.info.width, self.info.height, bytes)?;
                    self.frame_index += 1;
                    self.serial += 1;
                }
                None => {
                    let total = self.frame_index + 1;
                    self.total_frames = Some(total);
                    target %= total;
                    if target == self.frame_index {
                        break;
                    }
                    self.restart()?;
                }
            }
        }
        Ok(())
    }
}


/// Any picture the CLI can bind: a decoded still or a looping video.
pub enum MediaSource {
    Image(ImageSource),
    Video(VideoSource),
}

impl MediaSource {
    /// Dispatch on file extension; anything not recognised as video is decoded
    /// as a still image.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!(CodedError::usage(
                "INPUT_NOT_FOUND",
                format!("input does not exist or is not a file: {}", path.display()),
            )));
        }
        if is_video_path(path) {
            Ok(Self::Video(VideoSource::open(path)?))
        } else {
            Ok(Self::Image(ImageSource::open(path)?))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Video(_) => "video",
        }
    }
}

pub fn is_video_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            VIDEO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

impl PixelSource for MediaSource {
    fn width(&self) -> u32 {
        match self {
            Self::Image(image) => image.width(),
            Self::Video(video) => video.width(),
        }
    }

    fn height(&self) -> u32 {
        match self {
            Self::Image(image) => image.height(),
            Self::Video(video) => video.height(),
        }
    }

    fn sample(&self, uv: Vec2) -> Rgba {
        match self {
            Self::Image(image) => image.sample(uv),
            Self::Video(video) => video.sample(uv),
        }
    }

    fn rgba8(&self) -> Option<&[u8]> {
        match self {
            Self::Image(image) => image.rgba8(),
            Self::Video(video) => video.rgba8(),
        }
    }

    fn frame_serial(&self) -> u64 {
        match self {
            Self::Image(image) => image.frame_serial(),
            Self::Video(video) => video.frame_serial(),
        }
    }

    fn advance_to(&mut self, elapsed_time: f32) -> Result<()> {
        match self {
            Self::Image(image) => image.advance_to(elapsed_time),
            Self::Video(video) => video.advance_to(elapsed_time),
        }
    }
}
