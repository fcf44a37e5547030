use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use crossflute::aspect_preset::AspectPreset;
use crossflute::compositor::PixelSource;
use crossflute::error_codes::{envelope_for, find_coded_error, CodedError};
use crossflute::export::{
    export_still, record_animation, RecordSettings, DEFAULT_RECORD_FPS, DEFAULT_RECORD_SECONDS,
};
use crossflute::frame_driver::FrameDriver;
use crossflute::look::{default_look_with_overrides, load_look_with_overrides};
use crossflute::offset::PanState;
use crossflute::renderer::Renderer;
use crossflute::schema::{Look, ParamOverride};
use crossflute::source::MediaSource;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CROSSFLUTE_GIT_HASH"),
    ")"
);

#[derive(Debug, Parser)]
#[command(name = "crossflute")]
#[command(version = VERSION)]
#[command(about = "Cross-fluted glass distortion over stills and video")]
struct Cli {
    /// Print machine-readable JSON on stdout, including error envelopes.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct LookArgs {
    /// YAML look file (frame, params, pan). Defaults apply when omitted.
    #[arg(long)]
    look: Option<PathBuf>,
    /// Override one parameter after the look file, e.g. `--set zoom=1.5`.
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a look file and summarize the resolved settings.
    Check {
        look: PathBuf,
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
    /// Render one frame of an image or video to PNG/JPEG.
    Render {
        input: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[command(flatten)]
        look: LookArgs,
        /// Clock value in seconds for the rendered frame.
        #[arg(long, default_value_t = 0.0)]
        time: f32,
        /// Skip GPU initialization.
        #[arg(long)]
        software: bool,
    },
    /// Record the animated effect to WebM (VP9) or MP4 (H.264) via ffmpeg.
    Record {
        input: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[command(flatten)]
        look: LookArgs,
        #[arg(long, default_value_t = DEFAULT_RECORD_SECONDS)]
        duration: f32,
        #[arg(long, default_value_t = DEFAULT_RECORD_FPS)]
        fps: u32,
        #[arg(long)]
        software: bool,
    },
    /// List the frame presets.
    Presets,
    /// Interactive preview window with sliders, drag-to-pan and look hot reload.
    #[cfg(feature = "play")]
    Play {
        input: PathBuf,
        #[command(flatten)]
        look: LookArgs,
    },
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(error) = run(cli) {
        let exit_code = find_coded_error(&error)
            .map(|coded| coded.kind.exit_code())
            .unwrap_or(1);
        if json {
            match serde_json::to_string_pretty(&envelope_for(&error)) {
                Ok(text) => println!("{text}"),
                Err(_) => eprintln!("[crossflute] error: {error:#}"),
            }
        } else {
            eprintln!("[crossflute] error: {error:#}");
        }
        std::process::exit(exit_code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Check { look, set } => run_check(&look, &set, json),
        Commands::Render {
            input,
            output,
            look,
            time,
            software,
        } => run_render(&input, &output, &look, time, software, json),
        Commands::Record {
            input,
            output,
            look,
            duration,
            fps,
            software,
        } => {
            let settings = RecordSettings {
                duration_secs: duration,
                fps,
            };
            run_record(&input, &output, &look, settings, software, json)
        }
        Commands::Presets => run_presets(json),
        #[cfg(feature = "play")]
        Commands::Play { input, look } => {
            let overrides = parse_overrides(&look.set)?;
            crossflute::play::run_play(&input, look.look.as_deref(), &overrides)
        }
    }
}

fn parse_overrides(raw: &[String]) -> Result<Vec<ParamOverride>> {
    raw.iter().map(|item| ParamOverride::parse(item)).collect()
}

fn resolve_look(args: &LookArgs) -> Result<Look> {
    let overrides = parse_overrides(&args.set)?;
    match &args.look {
        Some(path) => load_look_with_overrides(path, &overrides),
        None => default_look_with_overrides(&overrides),
    }
}

fn run_check(look_path: &Path, set: &[String], json: bool) -> Result<()> {
    let overrides = parse_overrides(set)?;
    let look = load_look_with_overrides(look_path, &overrides)?;
    let (width, height) = look.frame.dimensions_px()?;

    if json {
        let summary = json!({
            "ok": true,
            "look": look_path.display().to_string(),
            "frame": { "width": width, "height": height },
            "params": look.params,
            "pan": look.pan,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let params = &look.params;
    println!(
        "OK: {} ({}x{}, square_size {}, zoom {}, {})",
        look_path.display(),
        width,
        height,
        params.square_size,
        params.zoom,
        if params.enabled { "enabled" } else { "bypassed" }
    );
    if params.animate {
        println!(
            "Animated: speed {}, direction {} deg (tiling on)",
            params.speed, params.direction
        );
    }
    Ok(())
}

fn prepare(
    input: &Path,
    look_args: &LookArgs,
    software: bool,
) -> Result<(FrameDriver<MediaSource>, Renderer)> {
    let look = resolve_look(look_args)?;
    let (width, height) = look.frame.dimensions_px()?;

    let source = MediaSource::open(input)?;
    eprintln!(
        "[crossflute] source: {} ({}, {}x{})",
        input.display(),
        source.kind(),
        source.width(),
        source.height()
    );

    let mut driver = FrameDriver::new(width, height, look.params)?;
    driver.set_pan(PanState::new(look.pan));
    driver.bind_source(source)?;

    let renderer = if software {
        Renderer::new_software("--software")
    } else {
        pollster::block_on(Renderer::new())
    };
    eprintln!(
        "[crossflute] backend: {} ({})",
        renderer.backend_name(),
        renderer.backend_reason()
    );
    Ok((driver, renderer))
}

fn run_render(
    input: &Path,
    output: &Path,
    look_args: &LookArgs,
    time: f32,
    software: bool,
    json: bool,
) -> Result<()> {
    if !(time.is_finite() && time >= 0.0) {
        return Err(anyhow!(CodedError::usage(
            "INVALID_TIME",
            format!("--time must be a finite number of seconds >= 0, got {time}"),
        )));
    }
    let (mut driver, mut renderer) = prepare(input, look_args, software)?;
    let summary = export_still(&mut renderer, &mut driver, time, output)?;

    if json {
        let report = json!({
            "ok": true,
            "output": output.display().to_string(),
            "width": summary.width,
            "height": summary.height,
            "backend": renderer.backend_name(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Wrote {} ({}x{})",
            output.display(),
            summary.width,
            summary.height
        );
    }
    Ok(())
}

fn run_record(
    input: &Path,
    output: &Path,
    look_args: &LookArgs,
    settings: RecordSettings,
    software: bool,
    json: bool,
) -> Result<()> {
    let (mut driver, mut renderer) = prepare(input, look_args, software)?;
    let summary = record_animation(&mut renderer, &mut driver, settings, output)?;

    if json {
        let report = json!({
            "ok": true,
            "output": output.display().to_string(),
            "width": summary.width,
            "height": summary.height,
            "frames": summary.frames,
            "fps": settings.fps,
            "backend": renderer.backend_name(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Wrote {} ({}x{}, {} frames @ {} fps)",
            output.display(),
            summary.width,
            summary.height,
            summary.frames,
            settings.fps
        );
    }
    Ok(())
}

fn run_presets(json: bool) -> Result<()> {
    if json {
        let presets = AspectPreset::ALL
            .iter()
            .map(|preset| {
                let (width, height) = preset.dimensions_px();
                json!({
                    "preset": preset.keyword(),
                    "label": preset.label(),
                    "width": width,
                    "height": height,
                })
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    for preset in AspectPreset::ALL {
        let (width, height) = preset.dimensions_px();
        println!(
            "{:<5} {:<10} {}x{}",
            preset.keyword(),
            preset.label(),
            width,
            height
        );
    }
    Ok(())
}
