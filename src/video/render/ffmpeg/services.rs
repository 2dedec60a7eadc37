use std::io::Read;
use std::process::{Command, Stdio};

use indicatif::ProgressBar;

use crate::common::progress::{create_media_bar, create_spinner};
use crate::ui::prelude::*;
use crate::video::render::error::EngineFailure;

/// Blocking ffmpeg invocation. Success is the exit status alone; stderr is
/// only carried along for diagnostics.
pub trait FfmpegRunner {
    fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<(), EngineFailure>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFfmpegRunner;

#[derive(Debug, Clone, Default)]
pub struct FfmpegRunOptions {
    /// Expected output duration, drives the progress bar
    pub total_duration: Option<f64>,
    pub label: String,
}

impl FfmpegRunOptions {
    pub fn new(total_duration: Option<f64>, label: impl Into<String>) -> Self {
        Self {
            total_duration,
            label: label.into(),
        }
    }
}

impl FfmpegRunner for SystemFfmpegRunner {
    fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<(), EngineFailure> {
        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineFailure::new(None, format!("failed to spawn ffmpeg: {e}")))?;

        let pb = match (options.total_duration, get_output_format()) {
            (_, OutputFormat::Json) => None,
            (Some(duration), OutputFormat::Text) => Some(create_media_bar(duration, &options.label)),
            (None, OutputFormat::Text) => Some(create_spinner(options.label.clone())),
        };

        let mut diagnostic = String::new();
        let read_result = match child.stderr.take() {
            Some(stderr) => read_ffmpeg_stderr(stderr, pb.as_ref(), &mut diagnostic),
            None => Ok(()),
        };

        let status = child
            .wait()
            .map_err(|e| EngineFailure::new(None, format!("failed to wait for ffmpeg: {e}")))?;

        if let Some(pb) = pb {
            if status.success() {
                pb.finish_and_clear();
            } else {
                pb.abandon();
            }
        }

        if let Err(e) = read_result {
            diagnostic.push_str(&format!("\n(stderr read failed: {e})"));
        }

        if !status.success() {
            return Err(EngineFailure::new(status.code(), diagnostic));
        }
        Ok(())
    }
}

/// Collect stderr verbatim, minus the carriage-return progress updates,
/// which only feed the progress bar.
fn read_ffmpeg_stderr<R: Read>(
    mut stderr: R,
    pb: Option<&ProgressBar>,
    diagnostic: &mut String,
) -> std::io::Result<()> {
    let mut buffer = [0u8; 4096];
    let mut pending = String::new();

    loop {
        let bytes_read = stderr.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        pending.push_str(&String::from_utf8_lossy(&buffer[..bytes_read]));

        while let Some(pos) = pending.find(['\r', '\n']) {
            let line: String = pending.drain(..=pos).collect();
            handle_stderr_line(line.trim_end_matches(['\r', '\n']), pb, diagnostic);
        }
    }
    if !pending.is_empty() {
        handle_stderr_line(&pending, pb, diagnostic);
    }

    Ok(())
}

fn handle_stderr_line(line: &str, pb: Option<&ProgressBar>, diagnostic: &mut String) {
    if line.trim().is_empty() {
        return;
    }

    if let Some(seconds) = parse_ffmpeg_progress(line) {
        if let Some(pb) = pb {
            pb.set_position((seconds * 1000.0) as u64);
            if let Some(speed) = parse_ffmpeg_speed(line) {
                pb.set_message(speed);
            }
        }
        return;
    }

    emit(Level::Debug, "ffmpeg.stderr", line, None);
    diagnostic.push_str(line);
    diagnostic.push('\n');
}

fn parse_ffmpeg_progress(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let time_end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time_to_seconds(&time_str[..time_end])
}

fn parse_time_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_ffmpeg_speed(line: &str) -> Option<String> {
    let speed_start = line.find("speed=")?;
    let speed_str = line[speed_start + 6..].trim_start();
    let speed_end = speed_str.find('x')?;
    Some(speed_str[..=speed_end].to_string())
}
