//! Shared helpers for integration tests: run the `fresh` binary, capture its
//! output, and keep a per-case log for post-mortem.

#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use image::{ImageFormat, Rgb, RgbImage};

pub struct CliResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn log_dir() -> PathBuf {
    let dir = std::env::temp_dir().join("fresh-cli-test-logs");
    let _ = fs::create_dir_all(&dir);
    dir
}

/// Run `fresh` with `args` from the current directory.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CliResult {
    run_cli_case_in(case_name, &std::env::current_dir().unwrap(), args)
}

/// Run `fresh` with `args` inside `cwd`, with colour and `FRESH_CONFIG` off.
pub fn run_cli_case_in(case_name: &str, cwd: &Path, args: &[&str]) -> CliResult {
    let output = Command::new(env!("CARGO_BIN_EXE_fresh"))
        .args(args)
        .current_dir(cwd)
        .env("NO_COLOR", "1")
        .env_remove("FRESH_CONFIG")
        .env_remove("CLICOLOR_FORCE")
        .output()
        .unwrap_or_else(|err| panic!("failed to spawn fresh for {case_name}: {err}"));

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let log_path = log_dir().join(format!("{case_name}.log"));
    let _ = fs::write(
        &log_path,
        format!(
            "args: {args:?}\ncwd: {}\nstatus: {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
            cwd.display(),
            output.status
        ),
    );
    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write a config that keeps the ledger and activity log inside `dir`.
pub fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("fresh.toml");
    let body = format!(
        "[ledger]\npath = {:?}\n\n[logging]\npath = {:?}\n\n{extra}",
        dir.join("ledger.jsonl"),
        dir.join("activity.jsonl")
    );
    fs::write(&path, body).unwrap();
    path
}

// ──────────────────── synthetic images ────────────────────

/// Deterministic noise in `-amp..=amp`.
struct Noise(u64);

impl Noise {
    fn next(&mut self, amp: i32) -> i32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 33) % (2 * amp as u64 + 1)) as i32 - amp
    }
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// A softly shaded, lightly textured orange surface filling the frame.
pub fn healthy_produce(size: u32) -> RgbImage {
    let mut noise = Noise(17);
    let centre = size as f32 / 2.0;
    RgbImage::from_fn(size, size, |x, y| {
        let dx = x as f32 - centre;
        let dy = y as f32 - centre;
        let falloff = 1.0 - (dx * dx + dy * dy).sqrt() / (centre * 1.6);
        let shade = 0.75 + 0.25 * falloff;
        let n = noise.next(5);
        Rgb([
            clamp((235.0 * shade) as i32 + n),
            clamp((140.0 * shade) as i32 + n),
            clamp((40.0 * shade) as i32 + n / 2),
        ])
    })
}

/// The healthy surface with several dark brown lesions near the centre.
pub fn decayed_produce(size: u32) -> RgbImage {
    let mut image = healthy_produce(size);
    let step = size as f32 / 5.0;
    let radius = (size as f32 / 14.0).max(3.0);
    let spots = [
        (1.5, 1.5),
        (2.5, 1.4),
        (3.5, 1.6),
        (1.6, 2.6),
        (2.5, 2.5),
        (3.4, 2.6),
        (1.5, 3.5),
        (2.6, 3.4),
        (3.5, 3.5),
    ];
    for (cx, cy) in spots {
        let (cx, cy) = (cx * step, cy * step);
        for y in 0..size {
            for x in 0..size {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                if dx * dx + dy * dy <= radius * radius {
                    image.put_pixel(x, y, Rgb([42, 26, 10]));
                }
            }
        }
    }
    image
}

/// A flat single-colour graphic.
pub fn flat_graphic(size: u32) -> RgbImage {
    RgbImage::from_pixel(size, size, Rgb([40, 90, 200]))
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, png_bytes(image)).unwrap();
    path
}
