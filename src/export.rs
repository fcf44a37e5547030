//! Still capture and timed recording of the composited frame.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::compositor::PixelSource;
use crate::encoding::FfmpegPipe;
use crate::error_codes::CodedError;
use crate::frame_driver::{FrameDriver, FramePlan};
use crate::renderer::Renderer;

pub const JPEG_QUALITY: u8 = 95;
pub const DEFAULT_RECORD_SECONDS: f32 = 5.0;
pub const DEFAULT_RECORD_FPS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    Png,
    Jpeg,
}

impl StillFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            _ => Err(anyhow!(CodedError::usage(
                "UNSUPPORTED_OUTPUT_FORMAT",
                format!(
                    "cannot export a still to '{}': expected .png, .jpg or .jpeg",
                    path.display()
                ),
            ))),
        }
    }
}

/// Encode one RGBA8 frame. JPEG drops alpha, which the effect always
/// renders opaque.
pub fn write_still(path: &Path, width: u32, height: u32, rgba: Vec<u8>) -> Result<()> {
    let format = StillFormat::from_path(path)?;
    let image = RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))?;

    match format {
        StillFormat::Png => image
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("failed writing {}", path.display())),
        StillFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
            let file = File::create(path)
                .with_context(|| format!("failed creating {}", path.display()))?;
            let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
            encoder
                .encode_image(&rgb)
                .with_context(|| format!("failed encoding {}", path.display()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordSettings {
    pub duration_secs: f32,
    pub fps: u32,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_RECORD_SECONDS,
            fps: DEFAULT_RECORD_FPS,
        }
    }
}

impl RecordSettings {
    pub fn total_frames(&self) -> Result<u32> {
        if self.fps == 0 {
            bail!("recording fps must be positive");
        }
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            bail!(
                "recording duration must be a positive number of seconds, got {}",
                self.duration_secs
            );
        }
        let frames = (f64::from(self.duration_secs) * f64::from(self.fps)).round();
        Ok((frames as u32).max(1))
    }

    /// Clock value of frame `index`; recordings never read the wall clock.
    pub fn frame_time(&self, index: u32) -> f32 {
        (f64::from(index) / f64::from(self.fps)) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub width: u32,
    pub height: u32,
    pub frames: u32,
}

fn render_planned<S: PixelSource + Sync>(
    renderer: &mut Renderer,
    driver: &mut FrameDriver<S>,
    elapsed_time: f32,
) -> Result<(FramePlan, Vec<u8>)> {
    let plan = driver
        .tick(elapsed_time)?
        .ok_or_else(|| anyhow!("no source bound; nothing to render"))?;
    let source = driver
        .source()
        .ok_or_else(|| anyhow!("no source bound; nothing to render"))?;
    let rgba =
        renderer.render_frame_rgba(source, &plan.inputs, plan.frame_width, plan.frame_height)?;
    Ok((plan, rgba))
}

/// Render the frame visible at `elapsed_time` and save it as PNG or JPEG.
pub fn export_still<S: PixelSource + Sync>(
    renderer: &mut Renderer,
    driver: &mut FrameDriver<S>,
    elapsed_time: f32,
    output_path: &Path,
) -> Result<ExportSummary> {
    StillFormat::from_path(output_path)?;
    let (plan, rgba) = render_planned(renderer, driver, elapsed_time)?;
    write_still(output_path, plan.frame_width, plan.frame_height, rgba)?;
    Ok(ExportSummary {
        width: plan.frame_width,
        height: plan.frame_height,
        frames: 1,
    })
}

/// Render `duration × fps` frames with `elapsed = frame / fps` and stream them
/// to ffmpeg.
pub fn record_animation<S: PixelSource + Sync>(
    renderer: &mut Renderer,
    driver: &mut FrameDriver<S>,
    settings: RecordSettings,
    output_path: &Path,
) -> Result<ExportSummary> {
    let total_frames = settings.total_frames()?;
    let (width, height) = driver.frame_size();
    if !driver.params().animate {
        eprintln!("[crossflute] record: animate is off; only video sources will change over time");
    }

    let ffmpeg = FfmpegPipe::spawn(width, height, settings.fps, output_path)?;
    for frame_index in 0..total_frames {
        let (_, rgba) = render_planned(renderer, driver, settings.frame_time(frame_index))?;
        ffmpeg.write_frame(rgba)?;

        if frame_index % settings.fps == 0 {
            eprintln!(
                "[crossflute] record: frame {}/{}",
                frame_index + 1,
                total_frames
            );
        }
    }
    ffmpeg.finish()?;

    Ok(ExportSummary {
        width,
        height,
        frames: total_frames,
    })
}
