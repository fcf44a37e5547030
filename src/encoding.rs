//! Video recording through a system `ffmpeg` child fed raw RGBA on stdin.

use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};

use crate::error_codes::CodedError;

/// Target bitrate for VP9 recordings.
pub const WEBM_BITRATE: &str = "8M";

/// Output container, chosen from the output file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Webm,
    Mp4,
}

impl VideoContainer {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "webm" => Ok(Self::Webm),
            "mp4" | "m4v" => Ok(Self::Mp4),
            _ => Err(anyhow!(CodedError::usage(
                "UNSUPPORTED_OUTPUT_FORMAT",
                format!(
                    "cannot record to '{}': expected a .webm or .mp4 output",
                    path.display()
                ),
            ))),
        }
    }

    fn codec_args(self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Webm => &["-c:v", "libvpx-vp9", "-b:v", WEBM_BITRATE, "-pix_fmt", "yuv420p"],
            Self::Mp4 => &[
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ],
        };
        args.iter().map(|arg| (*arg).to_owned()).collect()
    }
}

pub struct FfmpegPipe {
    sender: Option<mpsc::SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl FfmpegPipe {
    pub fn spawn(width: u32, height: u32, fps: u32, output_path: &Path) -> Result<Self> {
        let container = VideoContainer::from_path(output_path)?;
        let args = ffmpeg_args(width, height, fps, container, output_path);
        let output_path = output_path.to_path_buf();
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let worker = thread::Builder::new()
            .name("crossflute-ffmpeg-encoder".to_owned())
            .spawn(move || run_ffmpeg_process(&args, receiver, &output_path))
            .context("failed to spawn ffmpeg writer thread")?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn write_frame(&self, rgba_frame: Vec<u8>) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        sender
            .send(rgba_frame)
            .map_err(|_| anyhow!("failed to enqueue frame for ffmpeg"))
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.sender.take());

        let handle = self
            .worker
            .take()
            .ok_or_else(|| anyhow!("ffmpeg worker thread missing"))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("ffmpeg worker thread panicked")),
        }
    }
}

fn run_ffmpeg_process(
    args: &[String],
    receiver: mpsc::Receiver<Vec<u8>>,
    output_path: &Path,
) -> Result<()> {
    if output_path.to_string_lossy().chars().any(char::is_control) {
        bail!("output path contains control characters");
    }

    let mut child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!("ffmpeg executable not found; install ffmpeg to record video")
            } else {
                anyhow!("failed to spawn ffmpeg (args='{}'): {error}", args.join(" "))
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
    let mut stderr_pipe = child.stderr.take();

    while let Ok(frame) = receiver.recv() {
        stdin
            .write_all(&frame)
            .context("failed to write frame to ffmpeg stdin")?;
    }

    stdin.flush().context("failed to flush ffmpeg stdin")?;
    drop(stdin);

    let status = child.wait().context("failed waiting for ffmpeg process")?;
    let stderr_tail = read_stderr_tail(&mut stderr_pipe)?;
    if !status.success() {
        bail!(
            "ffmpeg failed with status {status} writing {} (stderr_tail='{stderr_tail}')",
            output_path.display()
        );
    }
    Ok(())
}

pub fn ffmpeg_args(
    width: u32,
    height: u32,
    fps: u32,
    container: VideoContainer,
    output_path: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        fps.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ];
    args.extend(container.codec_args());
    args.push(output_path.to_string_lossy().into_owned());
    args
}

fn read_stderr_tail(stderr: &mut Option<std::process::ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buf);
    let chars = text.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(500);
    Ok(chars[start..].iter().collect::<String>().trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_follows_extension() {
        assert_eq!(
            VideoContainer::from_path(Path::new("out/loop.WEBM")).expect("webm"),
            VideoContainer::Webm
        );
        assert_eq!(
            VideoContainer::from_path(Path::new("loop.mp4")).expect("mp4"),
            VideoContainer::Mp4
        );
        let err = VideoContainer::from_path(Path::new("loop.gif")).expect_err("gif");
        let coded = crate::error_codes::find_coded_error(&err).expect("coded");
        assert_eq!(coded.code, "UNSUPPORTED_OUTPUT_FORMAT");
    }

    #[test]
    fn webm_uses_vp9_at_eight_megabits() {
        let args = ffmpeg_args(1080, 608, 60, VideoContainer::Webm, Path::new("a.webm"));
        let joined = args.join(" ");
        assert!(joined.contains("-s:v 1080x608"));
        assert!(joined.contains("-r 60"));
        assert!(joined.contains("-c:v libvpx-vp9 -b:v 8M"));
        assert_eq!(args.last().map(String::as_str), Some("a.webm"));
    }

    #[test]
    fn mp4_uses_h264_yuv420p() {
        let args = ffmpeg_args(864, 1080, 30, VideoContainer::Mp4, Path::new("b.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
    }
}
