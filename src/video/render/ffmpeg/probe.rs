use std::path::Path;

use anyhow::Result;
use duct::cmd;
use serde::{Deserialize, Serialize};

use crate::video::render::error::PipelineError;

/// What the renderer needs to know about a video input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub duration: f64,
    /// Channel count of the first audio stream, if any
    pub audio_channels: Option<u8>,
}

impl SourceInfo {
    pub fn bit_depth(&self) -> BitDepth {
        BitDepth::from_pixel_format(&self.pixel_format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BitDepth {
    Eight,
    Ten,
}

impl BitDepth {
    pub fn from_pixel_format(pix_fmt: &str) -> Self {
        let fmt = pix_fmt.to_ascii_lowercase();
        if fmt.starts_with("p010")
            || fmt.starts_with("p016")
            || fmt.contains("10le")
            || fmt.contains("10be")
            || fmt.contains("12le")
            || fmt.contains("12be")
        {
            BitDepth::Ten
        } else {
            BitDepth::Eight
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        if bits >= 10 { BitDepth::Ten } else { BitDepth::Eight }
    }

    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Ten => 10,
        }
    }
}

/// Pixel formats used at each boundary of the video chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelFormats {
    /// Format of frames leaving device memory (follows the source)
    pub download: &'static str,
    /// RGB working format for LUT application
    pub working: &'static str,
    /// Format of the CPU filter chain
    pub cpu: &'static str,
    /// Format handed to the encoder
    pub encode: &'static str,
}

impl PixelFormats {
    pub fn resolve(source: BitDepth, output: BitDepth, nvenc: bool) -> Self {
        let download = match source {
            BitDepth::Eight => "nv12",
            BitDepth::Ten => "p010le",
        };
        let (working, cpu) = match output {
            BitDepth::Eight => ("gbrp", "yuv420p"),
            BitDepth::Ten => ("gbrp10le", "yuv420p10le"),
        };
        let encode = match (output, nvenc) {
            (BitDepth::Ten, true) => "p010le",
            _ => cpu,
        };
        Self {
            download,
            working,
            cpu,
            encode,
        }
    }

    /// `overlay` output format matching the CPU chain's bit depth; the
    /// filter's default is 8-bit `yuv420`.
    pub fn overlay(&self) -> &'static str {
        if self.cpu == "yuv420p10le" {
            "yuv420p10"
        } else {
            "yuv420"
        }
    }
}

pub trait MediaProbe {
    /// Video stream properties; fails when the file has no video stream.
    fn source_info(&self, path: &Path) -> Result<SourceInfo>;

    /// Container duration of any media file.
    fn duration(&self, path: &Path) -> Result<f64>;

    /// Channel count of the first audio stream; works for audio-only files.
    fn audio_channels(&self, path: &Path) -> Result<Option<u8>> {
        Ok(self.source_info(path)?.audio_channels)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    fn run(&self, path: &Path) -> Result<ProbeReport> {
        let output = cmd!(
            "ffprobe",
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
            path
        )
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .map_err(|e| PipelineError::probe(path, format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(PipelineError::probe(
                path,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )
            .into());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(path, &stdout)
    }
}

impl MediaProbe for SystemProbe {
    fn source_info(&self, path: &Path) -> Result<SourceInfo> {
        self.run(path)?.into_source_info(path)
    }

    fn duration(&self, path: &Path) -> Result<f64> {
        self.run(path)?.duration(path)
    }

    fn audio_channels(&self, path: &Path) -> Result<Option<u8>> {
        Ok(self.run(path)?.stream("audio").and_then(|s| s.channels))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeReport {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    pix_fmt: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u8>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(path: &Path, json: &str) -> Result<ProbeReport> {
    serde_json::from_str(json)
        .map_err(|e| PipelineError::probe(path, format!("unreadable ffprobe output: {e}")).into())
}

impl ProbeReport {
    fn stream(&self, kind: &str) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
    }

    fn duration(&self, path: &Path) -> Result<f64> {
        let from_format = self
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref())
            .and_then(|d| d.parse::<f64>().ok());
        let from_streams = || {
            self.streams
                .iter()
                .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
                .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
        };
        match from_format.or_else(from_streams) {
            Some(d) if d.is_finite() && d > 0.0 => Ok(d),
            _ => Err(PipelineError::probe(path, "no usable duration").into()),
        }
    }

    fn into_source_info(self, path: &Path) -> Result<SourceInfo> {
        let duration = self.duration(path)?;
        let audio_channels = self.stream("audio").and_then(|s| s.channels);
        let video = self
            .stream("video")
            .ok_or_else(|| PipelineError::probe(path, "no video stream"))?;
        let (Some(pixel_format), Some(width), Some(height)) =
            (video.pix_fmt.clone(), video.width, video.height)
        else {
            return Err(PipelineError::probe(path, "video stream lacks pix_fmt or dimensions").into());
        };

        Ok(SourceInfo {
            pixel_format,
            width,
            height,
            duration,
            audio_channels,
        })
    }
}
