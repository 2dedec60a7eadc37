//! Final assembly: concatenation of segment artifacts and the master pass.
//!
//! Video is always stream-copied. Audio crosses every segment boundary
//! through `aresample`, which repairs the independently reset timestamps
//! of each artifact. The finished file is staged next to the output and
//! renamed into place, so the output path never holds a partial file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{Builder, NamedTempFile};

use super::error::PipelineError;
use super::ffmpeg::compiler::format_time;
use super::ffmpeg::probe::MediaProbe;
use super::ffmpeg::services::{FfmpegRunOptions, FfmpegRunner};
use super::logging::log_event;
use crate::ui::prelude::Level;
use crate::video::config::StyleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblyReport {
    pub concatenated: bool,
    pub mastered: bool,
}

pub struct Assembler<'a> {
    config: &'a StyleConfig,
    runner: &'a dyn FfmpegRunner,
    probe: &'a dyn MediaProbe,
}

fn assembly_error(message: impl Into<String>) -> anyhow::Error {
    PipelineError::Assembly(message.into()).into()
}

impl<'a> Assembler<'a> {
    pub fn new(config: &'a StyleConfig, runner: &'a dyn FfmpegRunner, probe: &'a dyn MediaProbe) -> Self {
        Self {
            config,
            runner,
            probe,
        }
    }

    /// Join `artifacts` in order into `output`. `work_dir` holds the concat
    /// manifest and intermediates, which are removed before returning.
    pub fn assemble(
        &self,
        artifacts: &[PathBuf],
        expected_duration: f64,
        work_dir: &Path,
        output: &Path,
    ) -> Result<AssemblyReport> {
        if artifacts.is_empty() {
            return Err(assembly_error("no segment artifacts to assemble"));
        }
        let output_dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let staging = Builder::new()
            .prefix(".routinecut-")
            .suffix(".mp4")
            .tempfile_in(output_dir)
            .with_context(|| format!("creating staging file in {}", output_dir.display()))?;

        let master = self.config.audio_optimization.master.enabled;
        let concatenated = artifacts.len() > 1;

        match (artifacts, master) {
            ([single], false) => {
                log_event(
                    Level::Info,
                    "render.assemble.single",
                    "Single segment selected; using its artifact as the output",
                );
                fs::copy(single, staging.path()).with_context(|| {
                    format!("copying {} to {}", single.display(), staging.path().display())
                })?;
            }
            ([single], true) => self.master(single, staging.path())?,
            (_, false) => self.concat(artifacts, expected_duration, work_dir, staging.path())?,
            (_, true) => {
                let joined = Builder::new()
                    .prefix("joined_")
                    .suffix(".mp4")
                    .tempfile_in(work_dir)
                    .with_context(|| format!("creating intermediate in {}", work_dir.display()))?;
                self.concat(artifacts, expected_duration, work_dir, joined.path())?;
                self.master(joined.path(), staging.path())?;
            }
        }

        staging
            .persist(output)
            .map_err(|e| assembly_error(format!("moving result to {}: {}", output.display(), e.error)))?;

        Ok(AssemblyReport {
            concatenated,
            mastered: master,
        })
    }

    fn concat(
        &self,
        artifacts: &[PathBuf],
        expected_duration: f64,
        work_dir: &Path,
        target: &Path,
    ) -> Result<()> {
        log_event(
            Level::Info,
            "render.assemble.concat",
            format!("Concatenating {} segments", artifacts.len()),
        );
        let manifest = write_manifest(artifacts, work_dir)?;

        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest.path().to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "0:a".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-af".to_string(),
            "aresample=async=1:first_pts=0".to_string(),
        ];
        self.push_audio_args(&mut args);
        self.push_container_args(&mut args, target);

        self.run(&args, expected_duration, "concat")
    }

    fn master(&self, input: &Path, target: &Path) -> Result<()> {
        let master = &self.config.audio_optimization.master;
        let duration = self
            .probe
            .duration(input)
            .map_err(|e| assembly_error(format!("cannot measure {}: {e:#}", input.display())))?;

        let mut filters = Vec::new();
        if master.fade_in > 0.0 {
            filters.push(format!("afade=t=in:st=0:d={}", format_time(master.fade_in)));
        }
        if master.fade_out > 0.0 {
            let start = (duration - master.fade_out).max(0.0);
            filters.push(format!(
                "afade=t=out:st={}:d={}",
                format_time(start),
                format_time(master.fade_out)
            ));
        }
        filters.push(format!(
            "loudnorm=I={}:TP={}:LRA={}",
            master.loudness_i, master.true_peak, master.lra
        ));

        log_event(
            Level::Info,
            "render.assemble.master",
            "Applying fades and loudness normalization",
        );
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v".to_string(),
            "-map".to_string(),
            "0:a".to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-af".to_string(),
            filters.join(","),
        ];
        self.push_audio_args(&mut args);
        self.push_container_args(&mut args, target);

        self.run(&args, duration, "master")
    }

    fn run(&self, args: &[String], duration: f64, label: &str) -> Result<()> {
        log_event(
            Level::Debug,
            "render.assemble.command",
            format!("ffmpeg {}", shell_words::join(args)),
        );
        self.runner
            .run(args, FfmpegRunOptions::new(Some(duration), label))
            .map_err(|failure| assembly_error(format!("{label} step: {failure}")))
    }

    fn push_audio_args(&self, args: &mut Vec<String>) {
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

    fn push_container_args(&self, args: &mut Vec<String>, target: &Path) {
        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            target.to_string_lossy().into_owned(),
        ]);
    }
}

/// Concat demuxer manifest with absolute, quote-escaped paths.
fn write_manifest(artifacts: &[PathBuf], work_dir: &Path) -> Result<NamedTempFile> {
    let mut manifest = Builder::new()
        .prefix("concat_")
        .suffix(".txt")
        .tempfile_in(work_dir)
        .with_context(|| format!("creating concat manifest in {}", work_dir.display()))?;
    for artifact in artifacts {
        let absolute = fs::canonicalize(artifact)
            .with_context(|| format!("resolving segment artifact {}", artifact.display()))?;
        let escaped = absolute.to_string_lossy().replace('\'', "'\\''");
        writeln!(manifest, "file '{escaped}'").context("writing concat manifest")?;
    }
    manifest.flush().context("writing concat manifest")?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::render::error::EngineFailure;
    use crate::video::render::ffmpeg::probe::SourceInfo;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<Vec<String>>>,
        manifests: RefCell<Vec<String>>,
        fail: bool,
    }

    impl FfmpegRunner for RecordingRunner {
        fn run(&self, args: &[String], _options: FfmpegRunOptions) -> Result<(), EngineFailure> {
            self.calls.borrow_mut().push(args.to_vec());
            if let Some(pos) = args.iter().position(|a| a == "concat") {
                let manifest = &args[pos + 4];
                self.manifests
                    .borrow_mut()
                    .push(fs::read_to_string(manifest).unwrap_or_default());
            }
            if self.fail {
                return Err(EngineFailure::new(Some(1), "Invalid data found when processing input"));
            }
            let target = args.last().map(String::as_str).unwrap_or_default();
            fs::write(target, b"assembled").map_err(|e| EngineFailure::new(None, e.to_string()))
        }
    }

    struct FixedProbe(f64);

    impl MediaProbe for FixedProbe {
        fn source_info(&self, _path: &Path) -> Result<SourceInfo> {
            anyhow::bail!("not a video probe")
        }

        fn duration(&self, _path: &Path) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn artifacts(dir: &Path, count: usize) -> Vec<PathBuf> {
        (1..=count)
            .map(|i| {
                let path = dir.join(format!("segment_{i:03}_ffff.mp4"));
                fs::write(&path, format!("segment {i}")).unwrap();
                path
            })
            .collect()
    }

    fn config(master: bool) -> StyleConfig {
        let mut config = StyleConfig::default();
        config.audio_optimization.master.enabled = master;
        config
    }

    #[test]
    fn single_segment_is_promoted_without_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let config = config(false);
        let assembler = Assembler::new(&config, &runner, &FixedProbe(30.0));
        let parts = artifacts(dir.path(), 1);
        let output = dir.path().join("out").join("final.mp4");
        fs::create_dir_all(output.parent().unwrap()).unwrap();

        let report = assembler.assemble(&parts, 30.0, dir.path(), &output).unwrap();

        assert!(!report.concatenated);
        assert!(runner.calls.borrow().is_empty());
        assert_eq!(fs::read_to_string(&output).unwrap(), "segment 1");
        assert!(parts[0].exists());
    }

    #[test]
    fn several_segments_concat_with_copied_video_and_resampled_audio() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let config = config(false);
        let assembler = Assembler::new(&config, &runner, &FixedProbe(90.0));
        let parts = artifacts(dir.path(), 3);
        let output = dir.path().join("final.mp4");

        let report = assembler.assemble(&parts, 90.0, dir.path(), &output).unwrap();
        assert!(report.concatenated);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        let args = calls[0].join(" ");
        assert!(args.contains("-f concat -safe 0 -i"));
        assert!(args.contains("-c:v copy"));
        assert!(args.contains("-af aresample=async=1:first_pts=0"));
        assert!(args.contains("-c:a aac"));
        assert!(args.contains("-movflags +faststart"));

        let manifest = &runner.manifests.borrow()[0];
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("file '/"));
        assert!(lines[0].ends_with("segment_001_ffff.mp4'"));
        assert!(lines[2].ends_with("segment_003_ffff.mp4'"));

        assert!(output.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with("concat_") || name.starts_with(".routinecut-")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn master_pass_touches_audio_only() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::default();
        let config = config(true);
        let assembler = Assembler::new(&config, &runner, &FixedProbe(120.0));
        let parts = artifacts(dir.path(), 2);
        let output = dir.path().join("final.mp4");

        let report = assembler.assemble(&parts, 120.0, dir.path(), &output).unwrap();
        assert!(report.mastered);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 2);
        let master = calls[1].join(" ");
        assert!(master.contains("-c:v copy"));
        assert!(master.contains(
            "afade=t=in:st=0:d=1.000000,afade=t=out:st=118.000000:d=2.000000,loudnorm=I=-16:TP=-1.5:LRA=11"
        ));
        assert_eq!(calls[1][3], calls[0].last().unwrap().as_str());
    }

    #[test]
    fn engine_failure_becomes_assembly_error() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner {
            fail: true,
            ..Default::default()
        };
        let config = config(false);
        let assembler = Assembler::new(&config, &runner, &FixedProbe(60.0));
        let parts = artifacts(dir.path(), 2);
        let output = dir.path().join("final.mp4");

        let err = assembler
            .assemble(&parts, 60.0, dir.path(), &output)
            .unwrap_err();
        let pipeline = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(pipeline, PipelineError::Assembly(_)));
        assert!(err.to_string().contains("Invalid data found"));
        assert!(!output.exists());
    }

    #[test]
    fn manifest_escapes_single_quotes() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("it's.mp4");
        fs::write(&odd, b"x").unwrap();
        let manifest = write_manifest(&[odd], dir.path()).unwrap();
        let text = fs::read_to_string(manifest.path()).unwrap();
        assert!(text.trim_end().ends_with("it'\\''s.mp4'"));
    }
}
