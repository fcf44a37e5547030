use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};

use crate::error_codes::CodedError;

/// Native stream properties reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,r_frame_rate")
        .arg("-of")
        .arg("csv=p=0")
        .arg(path)
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe (is ffmpeg installed?)")?;

    if !output.status.success() {
        return Err(anyhow!(CodedError::source(
            "UNDECODABLE_VIDEO",
            format!(
                "ffprobe rejected {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_probe_line(stdout.trim())
        .with_context(|| format!("failed to read stream info for {}", path.display()))
}

/// Parse one `width,height,num/den` line from ffprobe's csv output.
pub fn parse_probe_line(line: &str) -> Result<VideoInfo> {
    let first = line.lines().next().unwrap_or_default();
    let fields = first.split(',').map(str::trim).collect::<Vec<_>>();
    let [width, height, rate] = fields.as_slice() else {
        bail!("unexpected ffprobe output '{first}'");
    };

    let width = width
        .parse::<u32>()
        .with_context(|| format!("invalid width '{width}'"))?;
    let height = height
        .parse::<u32>()
        .with_context(|| format!("invalid height '{height}'"))?;
    if width == 0 || height == 0 {
        return Err(anyhow!(CodedError::source(
            "EMPTY_SOURCE",
            format!("video stream reports {width}x{height}"),
        )));
    }

    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num = num.parse::<f64>().with_context(|| format!("invalid rate '{rate}'"))?;
            let den = den.parse::<f64>().with_context(|| format!("invalid rate '{rate}'"))?;
            if den == 0.0 {
                bail!("invalid rate '{rate}'");
            }
            num / den
        }
        None => rate
            .parse::<f64>()
            .with_context(|| format!("invalid rate '{rate}'"))?,
    };
    if !(fps.is_finite() && fps > 0.0) {
        bail!("video stream reports a non-positive frame rate '{rate}'");
    }

    Ok(VideoInfo { width, height, fps })
}

/// Raw RGBA frames streamed out of an ffmpeg child process on a reader thread.
///
/// Dropping the input kills and reaps the child and joins the reader, so no
/// error path can leave a decoder running.
pub struct FfmpegInput {
    receiver: Option<Mutex<mpsc::Receiver<Vec<u8>>>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Child,
}

impl FfmpegInput {
    pub fn spawn(input_path: &Path, width: u32, height: u32) -> Result<Self> {
        let size = format!("{}x{}", width, height);
        let child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input_path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-s")
            .arg(size)
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn ffmpeg decoder")?;

        Self::attach(child, (width as usize) * (height as usize) * 4)
    }

    /// Start reading `frame_size`-byte frames from the child's stdout.
    fn attach(mut child: Child, frame_size: usize) -> Result<Self> {
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            bail!("failed to capture ffmpeg stdout");
        };
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(4);

        let spawned = thread::Builder::new()
            .name("crossflute-ffmpeg-decoder".to_owned())
            .spawn(move || {
                loop {
                    let mut buffer = vec![0u8; frame_size];
                    match stdout.read_exact(&mut buffer) {
                        Ok(()) => {
                            if sender.send(buffer).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(anyhow!("failed to read from ffmpeg: {e}")),
                    }
                }
                Ok(())
            });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(error) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(error).context("failed to spawn ffmpeg reader thread"));
            }
        };

        Ok(Self {
            receiver: Some(Mutex::new(receiver)),
            worker: Some(worker),
            child,
        })
    }

    /// Blocks until the next frame arrives; `None` at end of stream.
    pub fn read_frame(&self) -> Option<Vec<u8>> {
        self.receiver.as_ref()?.lock().ok()?.recv().ok()
    }

    pub fn finish(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let _ = self.child.kill();
        let _ = self.child.wait();

        // A reader parked on a full channel wakes with a send error.
        drop(self.receiver.take());

        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow!("ffmpeg reader thread panicked")),
            },
            None => Ok(()),
        }
    }
}

impl Drop for FfmpegInput {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_rate() {
        let info = parse_probe_line("1920,1080,30000/1001").expect("should parse");
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn parses_integer_rate_and_ignores_extra_lines() {
        let info = parse_probe_line("640,360,25\n640,360,25").expect("should parse");
        assert_eq!(info.fps, 25.0);
    }

    #[test]
    fn rejects_zero_dimensions_and_bad_rates() {
        assert!(parse_probe_line("0,1080,30/1").is_err());
        assert!(parse_probe_line("10,10,0/0").is_err());
        assert!(parse_probe_line("10,10").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_an_input_reaps_the_child() {
        let child = match Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                eprintln!("Skipping test: {error}");
                return;
            }
        };
        let pid = child.id();
        let input = FfmpegInput::attach(child, 16).expect("attach");
        assert!(Path::new(&format!("/proc/{pid}")).exists());

        drop(input);
        assert!(
            !Path::new(&format!("/proc/{pid}")).exists(),
            "child {pid} outlived its input"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn finish_after_end_of_stream_is_clean() {
        let child = match Command::new("printf")
            .arg("abcdefgh")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                eprintln!("Skipping test: {error}");
                return;
            }
        };
        let input = FfmpegInput::attach(child, 4).expect("attach");
        assert_eq!(input.read_frame().as_deref(), Some(&b"abcd"[..]));
        assert_eq!(input.read_frame().as_deref(), Some(&b"efgh"[..]));
        assert_eq!(input.read_frame(), None);
        input.finish().expect("clean finish");
    }
}
