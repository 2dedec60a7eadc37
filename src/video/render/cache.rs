//! Segment fingerprints and the on-disk artifact cache.
//!
//! A fingerprint is the SHA-256 of a canonical JSON document holding every
//! input that changes a segment's pixels or samples. Artifacts are named
//! after their segment index and fingerprint, so a lookup is a single
//! existence check.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::effects::TriggeredEffect;
use super::ffmpeg::compiler::SegmentJob;
use super::ffmpeg::probe::PixelFormats;
use super::music::MusicSlice;
use super::overlays::{NextUpClip, WorkoutProgress};
use crate::video::config::{
    BackgroundMusic, ChannelLayout, Ducking, FinishingFilters, NextUpPreview, ProgressBar,
    ProgressRing, SourceVideoProcessing, StyleConfig, TextOverlays, VideoOutput,
};

/// Bumped whenever graph construction changes in a way that alters output.
pub const FINGERPRINT_VERSION: u32 = 2;

const FINGERPRINT_PREFIX_LEN: usize = 16;

/// Cheap identity of a file: path, size and modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIdentity {
    pub path: String,
    pub size: u64,
    pub modified_secs: u64,
    pub modified_nanos: u32,
}

impl FileIdentity {
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("reading metadata for {}", path.display()))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        Ok(Self {
            path: path.display().to_string(),
            size: metadata.len(),
            modified_secs: modified.as_secs(),
            modified_nanos: modified.subsec_nanos(),
        })
    }
}

#[derive(Serialize)]
struct EffectInput<'a> {
    effect: &'a TriggeredEffect,
    identity: FileIdentity,
}

#[derive(Serialize)]
struct MusicInput<'a> {
    slice: &'a MusicSlice,
    identity: FileIdentity,
}

/// Overlay settings only count for segments that draw the overlay.
#[derive(Serialize)]
struct ProgressInput<'a> {
    progress: WorkoutProgress,
    style: &'a ProgressBar,
}

#[derive(Serialize)]
struct NextUpInput<'a> {
    clip: &'a NextUpClip,
    identity: FileIdentity,
    style: &'a NextUpPreview,
    font: Option<FileIdentity>,
}

/// Music settings that reach the graph; scheduling settings only matter
/// through the resolved slices.
#[derive(Serialize)]
struct MusicMix<'a> {
    volume: f64,
    channel_layout: ChannelLayout,
    ducking: &'a Ducking,
}

impl<'a> From<&'a BackgroundMusic> for MusicMix<'a> {
    fn from(music: &'a BackgroundMusic) -> Self {
        Self {
            volume: music.volume,
            channel_layout: music.channel_layout,
            ducking: &music.ducking,
        }
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    version: u32,
    start_ms: i64,
    end_ms: i64,
    title: &'a str,
    video: FileIdentity,
    audio: Option<FileIdentity>,
    source_audio: Option<ChannelLayout>,
    timer: Option<FileIdentity>,
    effects: Vec<EffectInput<'a>>,
    music: Vec<MusicInput<'a>>,
    formats: &'a PixelFormats,
    encoder: &'a str,
    video_output: &'a VideoOutput,
    processing: &'a SourceVideoProcessing,
    finishing: &'a FinishingFilters,
    progress_ring: &'a ProgressRing,
    text_overlays: &'a TextOverlays,
    progress_bar: Option<ProgressInput<'a>>,
    next_up: Option<NextUpInput<'a>>,
    music_mix: MusicMix<'a>,
    luts: Vec<FileIdentity>,
    font: Option<FileIdentity>,
    test_mode: bool,
}

fn millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

/// Reproducibility key for one fully resolved segment.
pub fn fingerprint(job: &SegmentJob, config: &StyleConfig, test_mode: bool) -> Result<String> {
    let plan = &job.plan;
    let audio = match job.source_audio {
        Some(_) if plan.audio_source != plan.video_source => {
            Some(FileIdentity::of(&plan.audio_source)?)
        }
        _ => None,
    };
    let effects = job
        .effects
        .iter()
        .map(|effect| {
            Ok(EffectInput {
                effect,
                identity: FileIdentity::of(&effect.file)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let music = job
        .music
        .iter()
        .map(|slice| {
            Ok(MusicInput {
                slice,
                identity: FileIdentity::of(&slice.file)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let grading = &config.source_video_processing.color_grading;
    let luts = if grading.is_active() {
        grading
            .luts
            .iter()
            .map(|lut| FileIdentity::of(lut))
            .collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };
    let title = &config.text_overlays.exercise_name;
    let font = match &title.font_file {
        Some(font) if title.enabled => Some(FileIdentity::of(font)?),
        _ => None,
    };

    let progress_bar = job.progress.map(|progress| ProgressInput {
        progress,
        style: &config.progress_bar,
    });
    let preview = &config.next_up_preview;
    let next_up = match &job.next_up {
        Some(clip) => Some(NextUpInput {
            clip,
            identity: FileIdentity::of(&clip.source)?,
            style: preview,
            font: preview.font_file.as_deref().map(FileIdentity::of).transpose()?,
        }),
        None => None,
    };

    let input = FingerprintInput {
        version: FINGERPRINT_VERSION,
        start_ms: millis(plan.source_start),
        end_ms: millis(plan.source_end),
        title: &plan.title,
        video: FileIdentity::of(&plan.video_source)?,
        audio,
        source_audio: job.source_audio,
        timer: job.timer.as_deref().map(FileIdentity::of).transpose()?,
        effects,
        music,
        formats: &job.formats,
        encoder: &job.encoder,
        video_output: &config.video_output,
        processing: &config.source_video_processing,
        finishing: &config.finishing_filters,
        progress_ring: &config.progress_ring,
        text_overlays: &config.text_overlays,
        progress_bar,
        next_up,
        music_mix: MusicMix::from(&config.background_music),
        luts,
        font,
        test_mode,
    };

    let canonical = serde_json::to_vec(&input).context("serializing fingerprint input")?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    Reuse(PathBuf),
    NeedsRender(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SegmentCache {
    dir: PathBuf,
}

impl SegmentCache {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating segment cache {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, index: usize, fingerprint: &str) -> PathBuf {
        let short = &fingerprint[..fingerprint.len().min(FINGERPRINT_PREFIX_LEN)];
        self.dir.join(format!("segment_{index:03}_{short}.mp4"))
    }

    /// Where ffmpeg writes before the artifact is promoted.
    pub fn partial_path(artifact: &Path) -> PathBuf {
        artifact.with_extension("partial.mp4")
    }

    pub fn decide(&self, index: usize, fingerprint: &str, force: bool) -> Result<CacheDecision> {
        let artifact = self.artifact_path(index, fingerprint);
        if force {
            for stale in self.artifacts_for(index)? {
                remove_file(&stale)?;
            }
            return Ok(CacheDecision::NeedsRender(artifact));
        }
        let reusable = fs::metadata(&artifact)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if reusable {
            Ok(CacheDecision::Reuse(artifact))
        } else {
            Ok(CacheDecision::NeedsRender(artifact))
        }
    }

    /// Completed artifacts for one segment index, any fingerprint.
    pub fn artifacts_for(&self, index: usize) -> Result<Vec<PathBuf>> {
        let prefix = format!("segment_{index:03}_");
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("listing {}", self.dir.display()));
            }
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("listing {}", self.dir.display()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".mp4") && !name.ends_with(".partial.mp4")
            {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Drop every artifact of `index` other than `keep`.
    pub fn remove_stale(&self, index: usize, keep: &Path) -> Result<usize> {
        let mut removed = 0;
        for path in self.artifacts_for(index)? {
            if path != keep {
                remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub(super) fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}
