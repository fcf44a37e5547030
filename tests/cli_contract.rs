use std::fs;
use std::path::Path;
use std::process::Command;

use image::{Rgba, RgbaImage};
use serde_json::Value;
use tempfile::tempdir;

fn run_crossflute(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_crossflute"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("crossflute command should run")
}

fn write_source(path: &Path) {
    let image = RgbaImage::from_fn(40, 30, |x, y| {
        Rgba([(x * 6) as u8, (y * 8) as u8, 128, 255])
    });
    image.save(path).expect("source png should write");
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|error| {
        panic!(
            "stdout should be json ({error}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn render_writes_a_frame_at_the_look_size() {
    let dir = tempdir().expect("tempdir should create");
    write_source(&dir.path().join("in.png"));
    fs::write(
        dir.path().join("look.yaml"),
        "frame: { width: 64, height: 36 }\nparams:\n  square_size: 0.1\n  highlight: 0.2\n",
    )
    .expect("look should write");

    let output = run_crossflute(
        dir.path(),
        &[
            "render", "in.png", "-o", "out.png", "--look", "look.yaml", "--software", "--json",
        ],
    );
    assert!(
        output.status.success(),
        "render should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["ok"], true);
    assert_eq!(report["backend"], "software");

    let frame = image::open(dir.path().join("out.png"))
        .expect("output should decode")
        .to_rgba8();
    assert_eq!(frame.dimensions(), (64, 36));
    assert!(frame.pixels().all(|pixel| pixel.0[3] == 255));
}

#[test]
fn render_is_reproducible_across_runs() {
    let dir = tempdir().expect("tempdir should create");
    write_source(&dir.path().join("in.png"));
    let args = |out: &'static str| {
        [
            "render", "in.png", "-o", out, "--software", "--set", "animate=true", "--set",
            "direction=45", "--time", "2.5",
        ]
    };

    assert!(run_crossflute(dir.path(), &args("a.png")).status.success());
    assert!(run_crossflute(dir.path(), &args("b.png")).status.success());
    let a = fs::read(dir.path().join("a.png")).expect("a.png");
    let b = fs::read(dir.path().join("b.png")).expect("b.png");
    assert_eq!(a, b);
}

#[test]
fn check_reports_resolved_look_as_json() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("look.yaml"),
        "frame: { preset: \"9:16\" }\nparams:\n  zoom: 1.5\npan: { x: 0.25, y: 0.0 }\n",
    )
    .expect("look should write");

    let output = run_crossflute(
        dir.path(),
        &["check", "look.yaml", "--set", "animate=true", "--json"],
    );
    assert!(output.status.success(), "check should succeed");
    let summary = stdout_json(&output);
    assert_eq!(summary["frame"]["width"], 608);
    assert_eq!(summary["frame"]["height"], 1080);
    assert_eq!(summary["params"]["zoom"], 1.5);
    assert_eq!(summary["params"]["animate"], true);
    assert_eq!(summary["pan"]["x"], 0.25);
}

#[test]
fn presets_json_lists_every_aspect() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_crossflute(dir.path(), &["presets", "--json"]);
    assert!(output.status.success());
    let presets = stdout_json(&output);
    let keywords = presets
        .as_array()
        .expect("array")
        .iter()
        .map(|item| item["preset"].as_str().expect("keyword").to_owned())
        .collect::<Vec<_>>();
    assert_eq!(keywords, ["1:1", "4:5", "9:16", "16:9", "4:3"]);
}

#[test]
fn unknown_parameter_is_a_usage_error_envelope() {
    let dir = tempdir().expect("tempdir should create");
    write_source(&dir.path().join("in.png"));

    let output = run_crossflute(
        dir.path(),
        &[
            "render", "in.png", "-o", "out.png", "--software", "--set", "wobble=2", "--json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    let envelope = stdout_json(&output);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"]["code"], "UNKNOWN_PARAMETER");
    assert_eq!(envelope["error"]["kind"], "usage");
    assert!(!dir.path().join("out.png").exists());
}

#[test]
fn missing_input_and_bad_output_extension_are_usage_errors() {
    let dir = tempdir().expect("tempdir should create");
    let missing = run_crossflute(
        dir.path(),
        &["render", "nope.png", "-o", "out.png", "--software", "--json"],
    );
    assert_eq!(missing.status.code(), Some(2));
    assert_eq!(stdout_json(&missing)["error"]["code"], "INPUT_NOT_FOUND");

    write_source(&dir.path().join("in.png"));
    let bad_ext = run_crossflute(
        dir.path(),
        &["render", "in.png", "-o", "out.tiff", "--software", "--json"],
    );
    assert_eq!(bad_ext.status.code(), Some(2));
    assert_eq!(
        stdout_json(&bad_ext)["error"]["code"],
        "UNSUPPORTED_OUTPUT_FORMAT"
    );
}

#[test]
fn undecodable_source_is_a_source_error() {
    let dir = tempdir().expect("tempdir should create");
    fs::write(dir.path().join("in.png"), b"not a png").expect("garbage should write");
    let output = run_crossflute(
        dir.path(),
        &["render", "in.png", "-o", "out.png", "--software", "--json"],
    );
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(stdout_json(&output)["error"]["code"], "UNDECODABLE_IMAGE");
}

#[test]
fn oversized_explicit_frame_is_a_usage_error() {
    let dir = tempdir().expect("tempdir should create");
    write_source(&dir.path().join("in.png"));
    fs::write(
        dir.path().join("look.yaml"),
        "frame: { width: 20000, height: 100 }\n",
    )
    .expect("look should write");

    let output = run_crossflute(
        dir.path(),
        &[
            "render", "in.png", "-o", "out.png", "--look", "look.yaml", "--software", "--json",
        ],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["code"], "INVALID_FRAME_SIZE");
    assert!(!dir.path().join("out.png").exists());
}
