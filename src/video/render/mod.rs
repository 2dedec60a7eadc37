pub mod error;
mod assemble;
mod cache;
mod effects;
pub mod ffmpeg;
mod logging;
mod music;
mod output;
mod overlays;
mod plan;
mod timer;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use serde_json::json;

use self::assemble::Assembler;
use self::cache::{CacheDecision, SegmentCache, fingerprint, remove_file};
use self::effects::resolve_effects;
use self::error::PipelineError;
use self::ffmpeg::compiler::{SegmentCompiler, SegmentJob, is_nvenc, output_depth, select_encoder};
use self::ffmpeg::probe::{MediaProbe, PixelFormats, SourceInfo, SystemProbe};
use self::ffmpeg::services::{FfmpegRunOptions, FfmpegRunner, SystemFfmpegRunner};
use self::logging::{log_event, log_event_with};
use self::music::{MusicCursor, MusicScheduler};
use self::output::{prepare_output_destination, resolve_cache_dir};
use self::overlays::{next_up_clip, workout_progress};
use self::plan::{
    Plan, PlanRequest, SegmentPlan, parse_segment_filter, plan_segments, resolve_overrides,
    validate_window,
};
use self::timer::locate_timer;
use super::cli::RenderArgs;
use super::config::{ChannelLayout, StyleConfig};
use super::routine::Routine;
use crate::ui::prelude::Level;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub output: PathBuf,
    pub rendered: usize,
    pub reused: usize,
    pub skipped: usize,
    pub concatenated: bool,
}

pub fn handle_render(args: &RenderArgs) -> Result<RunSummary> {
    // Argument mistakes surface even where ffmpeg is not installed
    if let Some(raw) = &args.segments {
        parse_segment_filter(raw)?;
    }
    validate_window(args.start, args.end)?;
    for tool in ["ffmpeg", "ffprobe"] {
        which::which(tool).map_err(|_| anyhow!("{tool} was not found on PATH"))?;
    }

    handle_render_with_services(args, &SystemFfmpegRunner, &SystemProbe)
}

/// Wall-clock time per pipeline stage, reported in verbose mode.
struct StageClock {
    last: Instant,
    stages: Vec<(&'static str, f64)>,
}

impl StageClock {
    fn start() -> Self {
        Self {
            last: Instant::now(),
            stages: Vec::new(),
        }
    }

    fn lap(&mut self, stage: &'static str) {
        let now = Instant::now();
        self.stages
            .push((stage, now.duration_since(self.last).as_secs_f64()));
        self.last = now;
    }

    fn report(&self) {
        let summary = self
            .stages
            .iter()
            .map(|(stage, secs)| format!("{stage} {secs:.2}s"))
            .collect::<Vec<_>>()
            .join(", ");
        let data: serde_json::Map<String, serde_json::Value> = self
            .stages
            .iter()
            .map(|(stage, secs)| (stage.to_string(), json!(secs)))
            .collect();
        log_event_with(
            Level::Debug,
            "render.timings",
            format!("Stage timings: {summary}"),
            serde_json::Value::Object(data),
        );
    }
}

pub fn handle_render_with_services(
    args: &RenderArgs,
    runner: &dyn FfmpegRunner,
    probe: &dyn MediaProbe,
) -> Result<RunSummary> {
    let mut clock = StageClock::start();

    let mut config = StyleConfig::load(args.config.as_deref())?;
    if args.test {
        config.apply_test_mode();
        config.validate()?;
        log_event(
            Level::Info,
            "render.test_mode",
            format!("Test mode: rendering at {}", config.video_output.resolution),
        );
    }
    check_style_assets(&config)?;

    let routine = Routine::load(&args.routine_file)?;
    log_event_with(
        Level::Debug,
        "render.routine",
        format!(
            "Routine {} has {} entries ({:.1}s)",
            args.routine_file.display(),
            routine.len(),
            routine.total_length()
        ),
        json!({ "entries": routine.len(), "length": routine.total_length() }),
    );
    let selection = args
        .segments
        .as_deref()
        .map(parse_segment_filter)
        .transpose()?;
    validate_window(args.start, args.end)?;
    if !args.source_video.is_file() {
        return Err(PipelineError::Config(format!(
            "source video {} does not exist",
            args.source_video.display()
        ))
        .into());
    }
    prepare_output_destination(&args.output_video, &args.source_video)?;

    let primary = probe
        .source_info(&args.source_video)
        .map_err(|e| probe_error(&args.source_video, e))?;

    let request = PlanRequest {
        source_video: &args.source_video,
        start: args.start,
        end: args.end,
        segments: selection.as_deref(),
        source_duration: Some(primary.duration),
    };
    let mut plan = plan_segments(&routine, &request)?;
    report_skipped(&plan);
    resolve_overrides(&mut plan, probe)?;
    clock.lap("plan");

    let jobs = prepare_jobs(args, &config, &routine, &request, &plan, primary, probe)?;
    clock.lap("probe");

    let cache_dir = resolve_cache_dir(&config.paths, &args.output_video)?;
    let cache = SegmentCache::open(&cache_dir)?;
    let mut decisions = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let fp = fingerprint(job, &config, args.test)
            .with_context(|| format!("fingerprinting segment {}", job.plan.index))?;
        decisions.push(cache.decide(job.plan.index, &fp, args.force_render)?);
    }
    clock.lap("fingerprint");

    let target = config.video_output.resolution()?;
    let compiler = SegmentCompiler::new(&config, target);
    let total = jobs.len();
    let mut artifacts = Vec::with_capacity(total);
    let (mut rendered, mut reused) = (0, 0);

    for (position, (job, decision)) in jobs.iter().zip(decisions).enumerate() {
        let segment = &job.plan;
        match decision {
            CacheDecision::Reuse(artifact) => {
                log_event_with(
                    Level::Info,
                    "render.segment.reuse",
                    format!(
                        "[{}/{total}] Reusing segment {} ('{}')",
                        position + 1,
                        segment.index,
                        segment.title
                    ),
                    json!({ "segment": segment.index, "artifact": artifact.display().to_string() }),
                );
                artifacts.push(artifact);
                reused += 1;
            }
            CacheDecision::NeedsRender(artifact) => {
                log_event(
                    Level::Info,
                    "render.segment.start",
                    format!(
                        "[{}/{total}] Rendering segment {} ('{}', {:.1}s)",
                        position + 1,
                        segment.index,
                        segment.title,
                        segment.duration()
                    ),
                );
                render_segment(&compiler, runner, &cache, job, &artifact)?;
                artifacts.push(artifact);
                rendered += 1;
            }
        }
    }
    clock.lap("render");

    let expected: f64 = jobs.iter().map(|job| job.plan.duration()).sum();
    let assembler = Assembler::new(&config, runner, probe);
    let report = assembler.assemble(&artifacts, expected, cache.dir(), &args.output_video)?;
    clock.lap("assemble");

    if !config.paths.retain_segment_cache {
        for artifact in &artifacts {
            remove_file(artifact)?;
        }
        remove_cache_dir(cache.dir());
    }

    let summary = RunSummary {
        output: args.output_video.clone(),
        rendered,
        reused,
        skipped: plan.skipped.len(),
        concatenated: report.concatenated,
    };
    log_event_with(
        Level::Success,
        "render.complete",
        format!(
            "Wrote {} ({} rendered, {} reused)",
            summary.output.display(),
            summary.rendered,
            summary.reused
        ),
        json!({
            "output": summary.output.display().to_string(),
            "rendered": summary.rendered,
            "reused": summary.reused,
            "skipped": summary.skipped,
            "concatenated": summary.concatenated,
            "mastered": report.mastered,
        }),
    );
    clock.report();

    Ok(summary)
}

/// Drop the cache directory once it holds nothing but this run's artifacts.
fn remove_cache_dir(dir: &Path) {
    match fs::remove_dir(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log_event_with(
            Level::Warn,
            "render.cache.cleanup",
            format!("Kept segment cache {}: {e}", dir.display()),
            json!({ "dir": dir.display().to_string() }),
        ),
    }
}

fn probe_error(path: &Path, err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<PipelineError>().is_some() {
        err
    } else {
        PipelineError::probe(path, format!("{err:#}")).into()
    }
}

fn report_skipped(plan: &Plan) {
    for skipped in &plan.skipped {
        log_event_with(
            Level::Warn,
            "render.segment.skipped",
            format!(
                "Skipping segment {} ('{}'): {}",
                skipped.index, skipped.name, skipped.reason
            ),
            json!({ "segment": skipped.index, "reason": skipped.reason }),
        );
    }
}

/// LUTs and fonts are read by ffmpeg mid-render; check them now.
fn check_style_assets(config: &StyleConfig) -> Result<()> {
    let grading = &config.source_video_processing.color_grading;
    let mut missing = Vec::new();
    if grading.is_active() {
        missing.extend(grading.luts.iter().filter(|lut| !lut.is_file()));
    }
    let title = &config.text_overlays.exercise_name;
    if title.enabled
        && let Some(font) = &title.font_file
        && !font.is_file()
    {
        missing.push(font);
    }
    let preview = &config.next_up_preview;
    if preview.enabled
        && let Some(font) = &preview.font_file
        && !font.is_file()
    {
        missing.push(font);
    }
    if missing.is_empty() {
        return Ok(());
    }
    let names = missing
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Err(PipelineError::Config(format!("missing style assets: {names}")).into())
}

/// Resolve everything each segment needs before the first render starts,
/// walking segments in order so the music cursor carries across them.
fn prepare_jobs(
    args: &RenderArgs,
    config: &StyleConfig,
    routine: &Routine,
    request: &PlanRequest<'_>,
    plan: &Plan,
    primary: SourceInfo,
    probe: &dyn MediaProbe,
) -> Result<Vec<SegmentJob>> {
    let mut sources: HashMap<PathBuf, SourceInfo> = HashMap::new();
    sources.insert(args.source_video.clone(), primary);

    let music_source = MusicScheduler::select_source(&config.background_music, args.bgm.as_deref())?;
    let mut scheduler = MusicScheduler::new(&config.background_music, music_source, probe);
    let mut cursor = MusicCursor::new();
    let mut fallback_reported = false;

    let mut jobs = Vec::with_capacity(plan.segments.len());
    for segment in &plan.segments {
        let video = match sources.get(&segment.video_source) {
            Some(info) => info.clone(),
            None => {
                let info = probe
                    .source_info(&segment.video_source)
                    .map_err(|e| probe_error(&segment.video_source, e))?;
                sources.insert(segment.video_source.clone(), info.clone());
                info
            }
        };

        let source_audio = audio_layout(args, config, segment, &video, probe)?;
        let timer = locate_timer(&config.paths, &config.progress_ring, segment);

        let effects = resolve_effects(&config.sound_effects, segment);
        if let Some(effect) = effects.iter().find(|e| !e.file.is_file()) {
            return Err(PipelineError::Config(format!(
                "sound effect for rule '{}' is missing: {}",
                effect.rule,
                effect.file.display()
            ))
            .into());
        }

        let (music, next) = scheduler.slices_for(segment, cursor)?;
        cursor = next;

        let progress = workout_progress(&config.progress_bar, routine, segment);
        let next_up = next_up_clip(&config.next_up_preview, routine, request, segment);
        if let Some(clip) = &next_up {
            log_event_with(
                Level::Debug,
                "render.next_up",
                format!(
                    "Segment {} previews '{}' from {} at {:.2}s",
                    segment.index,
                    clip.name,
                    clip.source.display(),
                    clip.start
                ),
                json!({ "segment": segment.index, "next": clip.index, "duration": clip.duration }),
            );
        }

        let depth = output_depth(&config.video_output, video.bit_depth());
        let encoder = select_encoder(&config.video_output, depth);
        if let Some(replaced) = &encoder.replaced
            && !fallback_reported
        {
            log_event(
                Level::Warn,
                "render.encoder.fallback",
                format!(
                    "{replaced} cannot encode {}-bit video; using {} instead",
                    depth.bits(),
                    encoder.codec
                ),
            );
            fallback_reported = true;
        }
        let formats = PixelFormats::resolve(video.bit_depth(), depth, is_nvenc(&encoder.codec));

        jobs.push(SegmentJob {
            plan: segment.clone(),
            video,
            source_audio,
            timer,
            effects,
            music,
            progress,
            next_up,
            formats,
            encoder: encoder.codec,
        });
    }
    Ok(jobs)
}

/// Declared layout of a segment's own audio. The configured layout of the
/// primary recording wins over the probed channel count.
fn audio_layout(
    args: &RenderArgs,
    config: &StyleConfig,
    segment: &SegmentPlan,
    video: &SourceInfo,
    probe: &dyn MediaProbe,
) -> Result<Option<ChannelLayout>> {
    let channels = if segment.audio_source == segment.video_source {
        video.audio_channels
    } else {
        probe
            .audio_channels(&segment.audio_source)
            .map_err(|e| probe_error(&segment.audio_source, e))?
    };
    let Some(channels) = channels else {
        return Ok(None);
    };
    if segment.audio_source == args.source_video
        && let Some(layout) = config.audio_optimization.source_channel_layout
    {
        return Ok(Some(layout));
    }
    Ok(Some(ChannelLayout::from_channels(channels)))
}

fn render_segment(
    compiler: &SegmentCompiler<'_>,
    runner: &dyn FfmpegRunner,
    cache: &SegmentCache,
    job: &SegmentJob,
    artifact: &Path,
) -> Result<()> {
    let segment = &job.plan;
    let partial = SegmentCache::partial_path(artifact);
    remove_file(&partial)?;

    let compiled = compiler
        .compile(job, &partial)
        .with_context(|| format!("building filter graph for segment {}", segment.index))?;
    let command = format!("ffmpeg {}", shell_words::join(&compiled.args));
    log_event_with(
        Level::Debug,
        "render.segment.command",
        command.clone(),
        json!({ "segment": segment.index, "audio_copied": compiled.audio_copied }),
    );

    let options = FfmpegRunOptions::new(
        Some(segment.duration()),
        format!("segment {}", segment.index),
    );
    if let Err(failure) = runner.run(&compiled.args, options) {
        remove_file(&partial)?;
        return Err(PipelineError::Render {
            index: segment.index,
            name: segment.title.clone(),
            command,
            failure,
        }
        .into());
    }

    fs::rename(&partial, artifact).with_context(|| {
        format!(
            "promoting {} to {}",
            partial.display(),
            artifact.display()
        )
    })?;
    let removed = cache.remove_stale(segment.index, artifact)?;
    if removed > 0 {
        log_event(
            Level::Debug,
            "render.cache.pruned",
            format!("Removed {removed} stale artifact(s) for segment {}", segment.index),
        );
    }
    Ok(())
}
