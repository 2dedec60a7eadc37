//! Style configuration schema.
//!
//! Every section is a plain serde struct with documented defaults, so a
//! config file only needs to mention what it changes. Unknown keys are
//! rejected at load time and [`StyleConfig::validate`] runs before any
//! planning, which keeps typos from surfacing halfway through a render.

mod audio;
mod video;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ui::prelude::*;
use crate::video::render::error::PipelineError;

use audio::AudioOptimization;
pub use audio::{
    BackgroundMusic, ChannelLayout, Ducking, EffectTiming, MusicRule, SoundEffect,
    SoundEffectRule, SoundEffects,
};
use video::TestModeSettings;
pub use video::{
    FinishingFilters, Framing, HwAccel, NextUpPreview, ProgressBar, ProgressRing, Resolution,
    SourceVideoProcessing, TextOverlays, VideoOutput, WorkingSpace,
};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Root of generated assets (timers live below it)
    pub asset_output_dir: PathBuf,
    /// Subdirectory of `asset_output_dir` holding `timer_<N>s.mov` files
    pub timers_subdir: String,
    /// Where segment artifacts are cached; defaults next to the output file
    pub segment_cache_dir: Option<PathBuf>,
    /// Keep segment artifacts after a successful run so later runs can reuse them
    pub retain_segment_cache: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            asset_output_dir: PathBuf::from("assets"),
            timers_subdir: "timers".to_string(),
            segment_cache_dir: None,
            retain_segment_cache: true,
        }
    }
}

impl PathsConfig {
    pub fn timer_asset(&self, seconds: u32) -> PathBuf {
        self.asset_output_dir
            .join(&self.timers_subdir)
            .join(format!("timer_{seconds}s.mov"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StyleConfig {
    pub paths: PathsConfig,
    pub source_video_processing: SourceVideoProcessing,
    pub finishing_filters: FinishingFilters,
    pub progress_ring: ProgressRing,
    pub progress_bar: ProgressBar,
    pub next_up_preview: NextUpPreview,
    pub text_overlays: TextOverlays,
    pub sound_effects: SoundEffects,
    pub background_music: BackgroundMusic,
    pub video_output: VideoOutput,
    pub test_mode_settings: TestModeSettings,
    pub audio_optimization: AudioOptimization,
}

impl StyleConfig {
    /// Load the style config. An explicit path must exist; the implicit
    /// default falls back to built-in settings.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(PipelineError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    ))
                    .into());
                }
                path.to_path_buf()
            }
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    emit(
                        Level::Warn,
                        "config.default",
                        &format!("No {DEFAULT_CONFIG_FILE} found; using built-in style defaults"),
                        None,
                    );
                    let config = Self::default();
                    config.validate()?;
                    return Ok(config);
                }
                path
            }
        };

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading style config from {}", path.display()))?;
        let mut config = Self::parse(&contents, is_toml(path))
            .with_context(|| format!("loading style config {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str, toml_syntax: bool) -> Result<Self> {
        let parsed: Self = if toml_syntax {
            toml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?
        } else {
            serde_yaml::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?
        };
        Ok(parsed)
    }

    /// Expand `~`/`$VAR` and anchor relative paths at the config's directory.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        let fix = |p: &mut PathBuf| {
            let resolved = resolve_path(base_dir, p);
            *p = resolved;
        };

        fix(&mut self.paths.asset_output_dir);
        if let Some(dir) = self.paths.segment_cache_dir.as_mut() {
            fix(dir);
        }
        for lut in &mut self.source_video_processing.color_grading.luts {
            fix(lut);
        }
        if let Some(font) = self.text_overlays.exercise_name.font_file.as_mut() {
            fix(font);
        }
        if let Some(font) = self.next_up_preview.font_file.as_mut() {
            fix(font);
        }
        for effect in self.sound_effects.library.values_mut() {
            fix(&mut effect.file);
        }
        if let Some(folder) = self.background_music.music_folder.as_mut() {
            fix(folder);
        }
        for rule in &mut self.background_music.rules {
            fix(&mut rule.file);
        }
    }

    /// Fold `test_mode_settings` over the output settings.
    pub fn apply_test_mode(&mut self) {
        let overrides = self.test_mode_settings.clone();
        let output = &mut self.video_output;
        if let Some(resolution) = overrides.resolution {
            output.resolution = resolution;
        }
        if let Some(codec) = overrides.codec {
            output.codec = codec;
        }
        if let Some(preset) = overrides.preset {
            output.preset = preset;
        }
        if let Some(quality) = overrides.quality {
            output.quality = quality;
        }
        if let Some(fps) = overrides.fps {
            output.fps = Some(fps);
        }
        if let Some(bit_depth) = overrides.bit_depth {
            output.bit_depth = Some(bit_depth);
        }
        if overrides.disable_finishing_filters {
            self.finishing_filters.sharpen.enabled = false;
            self.finishing_filters.denoise.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        self.video_output.validate(&mut problems);
        if let Some(resolution) = &self.test_mode_settings.resolution
            && let Err(e) = Resolution::parse(resolution)
        {
            problems.push(format!("test_mode_settings.resolution: {e}"));
        }
        self.source_video_processing.validate(&mut problems);
        self.finishing_filters.validate(&mut problems);
        if self.progress_ring.size == 0 {
            problems.push("progress_ring.size must be positive".to_string());
        }
        if self.text_overlays.exercise_name.font_size == 0 {
            problems.push("text_overlays.exercise_name.font_size must be positive".to_string());
        }
        video::validate_overlays(&self.progress_bar, &self.next_up_preview, &mut problems);
        self.sound_effects.validate(&mut problems);
        self.background_music.validate(&mut problems);
        self.audio_optimization.validate(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(problems.join("; ")).into())
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.into_owned());
    let expanded = PathBuf::from(expanded);
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        StyleConfig::default().validate().unwrap();
    }

    #[test]
    fn yaml_sections_override_defaults() {
        let yaml = r#"
video_output:
  resolution: 1280x720
  codec: libx265
  quality: 20
source_video_processing:
  framing: scale
  hwaccel: none
  color_grading:
    enabled: true
    luts: [looks/a.cube, looks/b.cube]
sound_effects:
  library:
    whistle:
      file: sfx/whistle.wav
      volume: 0.8
      channel_layout: mono
  rules:
    - triggers: ["rest"]
      timing: -3
      effect: whistle
    - triggers: ["*"]
      timing: random
      probability: 0.5
      effect: whistle
"#;
        let mut config = StyleConfig::parse(yaml, false).unwrap();
        config.resolve_paths(Path::new("/cfg"));
        config.validate().unwrap();

        assert_eq!(config.video_output.resolution, "1280x720");
        assert_eq!(config.video_output.quality, 20);
        assert_eq!(config.source_video_processing.framing, Framing::Scale);
        assert_eq!(config.source_video_processing.hwaccel, HwAccel::None);
        assert_eq!(
            config.source_video_processing.color_grading.luts,
            vec![
                PathBuf::from("/cfg/looks/a.cube"),
                PathBuf::from("/cfg/looks/b.cube")
            ]
        );
        let whistle = &config.sound_effects.library["whistle"];
        assert_eq!(whistle.file, PathBuf::from("/cfg/sfx/whistle.wav"));
        assert_eq!(whistle.channel_layout, ChannelLayout::Mono);
        assert_eq!(config.sound_effects.rules[0].timing, EffectTiming::FromEnd(3.0));
        assert_eq!(config.sound_effects.rules[1].timing, EffectTiming::Random);
        // untouched sections keep their defaults
        assert!(config.paths.retain_segment_cache);
    }

    #[test]
    fn overlay_sections_parse_and_resolve_fonts() {
        let yaml = r#"
progress_bar:
  enabled: true
  position: top
  height: 16
next_up_preview:
  enabled: true
  label: "UP NEXT"
  font_file: fonts/Anton.ttf
"#;
        let mut config = StyleConfig::parse(yaml, false).unwrap();
        config.resolve_paths(Path::new("/cfg"));
        config.validate().unwrap();

        assert!(config.progress_bar.enabled);
        assert_eq!(config.progress_bar.top(1080), 0);
        assert_eq!(config.progress_bar.excluded_types.len(), 3);
        assert_eq!(config.next_up_preview.label, "UP NEXT");
        assert_eq!(
            config.next_up_preview.font_file,
            Some(PathBuf::from("/cfg/fonts/Anton.ttf"))
        );
        assert!(!StyleConfig::default().progress_bar.enabled);
        assert!(!StyleConfig::default().next_up_preview.enabled);
    }

    #[test]
    fn toml_syntax_is_accepted() {
        let toml = r#"
[video_output]
resolution = "1080x1920"
bit_depth = 10

[background_music]
enabled = true
volume = 0.3
"#;
        let config = StyleConfig::parse(toml, true).unwrap();
        assert_eq!(config.video_output.bit_depth, Some(10));
        assert!(config.background_music.enabled);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StyleConfig::parse("video_output:\n  resolutoin: 1x1\n", false).unwrap_err();
        assert!(err.to_string().contains("resolutoin"));
    }

    #[test]
    fn rules_must_reference_defined_effects() {
        let yaml = r#"
sound_effects:
  rules:
    - triggers: ["jump"]
      timing: 1
      effect: boing
"#;
        let config = StyleConfig::parse(yaml, false).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown effect 'boing'"));
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = StyleConfig::default();
        config.video_output.resolution = "1921x1080".to_string();
        config.video_output.bit_depth = Some(12);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("even"));
        assert!(err.contains("bit_depth"));
    }

    #[test]
    fn test_mode_overrides_output_subset() {
        let mut config = StyleConfig::default();
        config.finishing_filters.denoise.enabled = true;
        let codec = config.video_output.codec.clone();
        config.apply_test_mode();

        assert_eq!(config.video_output.resolution, "854x480");
        assert_eq!(config.video_output.fps, Some(15.0));
        assert_eq!(config.video_output.codec, codec);
        assert!(!config.finishing_filters.sharpen.enabled);
        assert!(!config.finishing_filters.denoise.enabled);
    }

    #[test]
    fn explicit_missing_config_is_a_config_error() {
        let err = StyleConfig::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }

    #[test]
    fn timer_asset_uses_duration_naming() {
        let paths = PathsConfig::default();
        assert_eq!(
            paths.timer_asset(45),
            PathBuf::from("assets/timers/timer_45s.mov")
        );
    }
}
