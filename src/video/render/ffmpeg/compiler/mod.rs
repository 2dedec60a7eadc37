mod audio;
pub mod graph;
mod inputs;
mod overlays;
pub mod text;
mod util;
mod video;


use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use self::audio::AudioRoute;
use self::graph::FilterGraph;
use self::inputs::InputList;
use super::probe::{BitDepth, PixelFormats, SourceInfo};
use crate::video::config::{ChannelLayout, HwAccel, Resolution, StyleConfig, VideoOutput};
use crate::video::render::effects::TriggeredEffect;
use crate::video::render::music::MusicSlice;
use crate::video::render::overlays::{NextUpClip, WorkoutProgress};
use crate::video::render::plan::SegmentPlan;

pub use self::util::format_time;

/// Everything resolved for one segment before compilation.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentJob {
    pub plan: SegmentPlan,
    pub video: SourceInfo,
    /// Declared layout of the segment's own audio; `None` when it has none
    pub source_audio: Option<ChannelLayout>,
    pub timer: Option<PathBuf>,
    pub effects: Vec<TriggeredEffect>,
    pub music: Vec<MusicSlice>,
    /// Progress bar state; `None` hides the bar for this segment
    pub progress: Option<WorkoutProgress>,
    pub next_up: Option<NextUpClip>,
    pub formats: PixelFormats,
    pub encoder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderChoice {
    pub codec: String,
    /// Encoder that was requested but cannot produce 10-bit output
    pub replaced: Option<String>,
}

pub fn is_nvenc(codec: &str) -> bool {
    codec.ends_with("_nvenc")
}

fn supports_ten_bit(codec: &str) -> bool {
    !(codec.starts_with("h264_") || codec == "libopenh264")
}

pub fn select_encoder(output: &VideoOutput, depth: BitDepth) -> EncoderChoice {
    if depth == BitDepth::Ten && !supports_ten_bit(&output.codec) {
        return EncoderChoice {
            codec: output.codec_10bit_fallback.clone(),
            replaced: Some(output.codec.clone()),
        };
    }
    EncoderChoice {
        codec: output.codec.clone(),
        replaced: None,
    }
}

/// Output bit depth: configured, else the source's.
pub fn output_depth(output: &VideoOutput, source: BitDepth) -> BitDepth {
    output.bit_depth.map(BitDepth::from_bits).unwrap_or(source)
}

#[derive(Debug, Clone)]
pub struct CompiledSegment {
    pub args: Vec<String>,
    #[cfg(test)]
    pub graph: FilterGraph,
    /// Source audio is stream-copied rather than re-encoded
    pub audio_copied: bool,
}

pub struct SegmentCompiler<'a> {
    config: &'a StyleConfig,
    target: Resolution,
}

impl<'a> SegmentCompiler<'a> {
    pub fn new(config: &'a StyleConfig, target: Resolution) -> Self {
        Self { config, target }
    }

    pub fn compile(&self, job: &SegmentJob, output: &Path) -> Result<CompiledSegment> {
        let mut inputs = InputList::new();
        let mut graph = FilterGraph::new();

        let (video_input, audio_input) = self.register_sources(&mut inputs, job);
        self.build_video_graph(&mut graph, &mut inputs, job, video_input)?;
        let audio_route = self.build_audio_graph(&mut graph, &mut inputs, job, audio_input);

        graph.validate(inputs.len())?;

        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];
        if self.config.finishing_filters.denoise.enabled {
            args.extend(
                ["-init_hw_device", "opencl=ocl", "-filter_hw_device", "ocl"]
                    .map(String::from),
            );
        }
        args.extend(inputs.input_args());
        args.push("-filter_complex".to_string());
        args.push(graph.render());
        for label in graph.mapped_outputs() {
            args.extend(["-map".to_string(), format!("[{label}]")]);
        }

        let audio_copied = matches!(audio_route, AudioRoute::Copy(_));
        match audio_route {
            AudioRoute::Copy(index) => {
                args.extend(["-map".to_string(), format!("{index}:a:0")]);
                args.extend(["-c:a", "copy"].map(String::from));
            }
            AudioRoute::Filtered => self.push_audio_codec_args(&mut args),
        }

        self.push_video_codec_args(&mut args, &job.encoder);
        args.extend([
            "-t".to_string(),
            format_time(job.plan.duration()),
            "-f".to_string(),
            "mp4".to_string(),
        ]);
        args.push(output.to_string_lossy().into_owned());

        Ok(CompiledSegment {
            args,
            #[cfg(test)]
            graph,
            audio_copied,
        })
    }

    fn register_sources(&self, inputs: &mut InputList, job: &SegmentJob) -> (usize, Option<usize>) {
        let plan = &job.plan;
        let duration = plan.duration();
        let shared_audio = plan.audio_source == plan.video_source;

        let mut options = Vec::new();
        if self.config.source_video_processing.hwaccel == HwAccel::Cuda {
            options.extend(
                ["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"].map(String::from),
            );
        }
        if shared_audio && let Some(layout) = job.source_audio {
            options.extend(inputs::layout_options(layout.as_str()));
        }
        options.extend(inputs::range_options(plan.source_start, duration));
        let video_input = inputs.add(&plan.video_source, options);

        let audio_input = match job.source_audio {
            None => None,
            Some(_) if shared_audio => Some(video_input),
            Some(layout) => {
                let mut options = inputs::layout_options(layout.as_str());
                options.extend(inputs::range_options(0.0, duration));
                Some(inputs.add(&plan.audio_source, options))
            }
        };

        (video_input, audio_input)
    }

    fn push_video_codec_args(&self, args: &mut Vec<String>, codec: &str) {
        let output = &self.config.video_output;
        args.extend(["-c:v".to_string(), codec.to_string()]);
        args.extend(["-preset".to_string(), output.preset.clone()]);
        let quality_flag = if is_nvenc(codec) { "-cq" } else { "-crf" };
        args.extend([quality_flag.to_string(), output.quality.to_string()]);
    }

    fn push_audio_codec_args(&self, args: &mut Vec<String>) {
        let output = &self.config.video_output;
        args.extend([
            "-c:a".to_string(),
            output.audio_codec.clone(),
            "-b:a".to_string(),
            output.audio_bitrate.clone(),
            "-ar".to_string(),
            output.audio_sample_rate.to_string(),
            "-ac".to_string(),
            output.audio_channels.to_string(),
        ]);
    }

    fn output_layout(&self) -> ChannelLayout {
        ChannelLayout::from_channels(self.config.video_output.audio_channels)
    }
}
