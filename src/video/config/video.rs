use std::fmt;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// How the source aspect ratio is reconciled with the output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Scale to cover the frame, then crop the overflow
    #[default]
    Crop,
    /// Scale to fit inside the frame, then pad
    Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    None,
    #[default]
    Cuda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkingSpace {
    /// Full-range RGB with the source transfer curve
    #[default]
    FullRange,
    /// Full-range RGB with linearized transfer
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Parse `1920x1080` (or `1920:1080`).
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let Some((w, h)) = value.split_once(['x', 'X', ':']) else {
            bail!("expected WIDTHxHEIGHT, got '{value}'");
        };
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid width in '{value}'"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid height in '{value}'"))?;
        if width == 0 || height == 0 {
            bail!("resolution '{value}' must be positive");
        }
        if width % 2 != 0 || height % 2 != 0 {
            bail!("resolution '{value}' must use even dimensions");
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColorGrading {
    pub enabled: bool,
    /// LUT files applied in order
    pub luts: Vec<PathBuf>,
    /// lut3d interpolation (nearest, trilinear, tetrahedral, pyramid, prism)
    pub interp: String,
    pub working_space: WorkingSpace,
}

impl Default for ColorGrading {
    fn default() -> Self {
        Self {
            enabled: false,
            luts: Vec::new(),
            interp: "tetrahedral".to_string(),
            working_space: WorkingSpace::default(),
        }
    }
}

impl ColorGrading {
    pub fn is_active(&self) -> bool {
        self.enabled && !self.luts.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceVideoProcessing {
    pub framing: Framing,
    pub hwaccel: HwAccel,
    /// Horizontal crop anchor, 0.0 = left edge, 1.0 = right edge
    pub crop_focus_x: f64,
    /// Vertical crop anchor, 0.0 = top edge, 1.0 = bottom edge
    pub crop_focus_y: f64,
    /// Fill color for `scale` framing
    pub pad_color: String,
    pub color_grading: ColorGrading,
}

impl Default for SourceVideoProcessing {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            hwaccel: HwAccel::default(),
            crop_focus_x: 0.5,
            crop_focus_y: 0.5,
            pad_color: "black".to_string(),
            color_grading: ColorGrading::default(),
        }
    }
}

impl SourceVideoProcessing {
    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        for (name, value) in [("crop_focus_x", self.crop_focus_x), ("crop_focus_y", self.crop_focus_y)] {
            if !(0.0..=1.0).contains(&value) {
                problems.push(format!("source_video_processing.{name} must be within 0..1"));
            }
        }
        if self.color_grading.enabled && self.color_grading.luts.is_empty() {
            problems.push("color_grading is enabled but no luts are configured".to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sharpen {
    pub enabled: bool,
    pub luma_msize: u32,
    pub luma_amount: f64,
    pub chroma_msize: u32,
    pub chroma_amount: f64,
}

impl Default for Sharpen {
    fn default() -> Self {
        Self {
            enabled: true,
            luma_msize: 5,
            luma_amount: 0.6,
            chroma_msize: 5,
            chroma_amount: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Denoise {
    pub enabled: bool,
    /// OpenCL filter run between hwupload and hwdownload
    pub filter: String,
    pub strength: f64,
    pub patch_size: u32,
    pub research_size: u32,
}

impl Default for Denoise {
    fn default() -> Self {
        Self {
            enabled: false,
            filter: "nlmeans_opencl".to_string(),
            strength: 1.5,
            patch_size: 7,
            research_size: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FinishingFilters {
    pub sharpen: Sharpen,
    pub denoise: Denoise,
}

impl FinishingFilters {
    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        let sharpen = &self.sharpen;
        for (name, size) in [("luma_msize", sharpen.luma_msize), ("chroma_msize", sharpen.chroma_msize)] {
            // unsharp only accepts odd matrix sizes between 3 and 23
            if !(3..=23).contains(&size) || size % 2 == 0 {
                problems.push(format!("finishing_filters.sharpen.{name} must be odd and within 3..23"));
            }
        }
        if self.denoise.enabled && self.denoise.strength <= 0.0 {
            problems.push("finishing_filters.denoise.strength must be positive".to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgressRing {
    pub enabled: bool,
    /// Rendered width of the timer in pixels
    pub size: u32,
    /// Overlay x expression (W/H = frame, w/h = timer)
    pub x: String,
    pub y: String,
}

impl Default for ProgressRing {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 220,
            x: "(W-w)/2".to_string(),
            y: "50".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarPosition {
    Top,
    #[default]
    Bottom,
}

/// Whole-workout progress bar across the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgressBar {
    pub enabled: bool,
    pub height: u32,
    pub position: BarPosition,
    /// Distance from the chosen frame edge
    pub margin: u32,
    pub background_color: String,
    pub foreground_color: String,
    /// Entry types that neither show the bar nor count toward the workout
    pub excluded_types: Vec<String>,
}

impl Default for ProgressBar {
    fn default() -> Self {
        Self {
            enabled: false,
            height: 12,
            position: BarPosition::default(),
            margin: 0,
            background_color: "black@0.4".to_string(),
            foreground_color: "0x4CAF50".to_string(),
            excluded_types: ["warmup", "cool down", "rest"].map(String::from).to_vec(),
        }
    }
}

impl ProgressBar {
    pub fn excludes(&self, kind: Option<&str>) -> bool {
        kind.is_some_and(|kind| {
            self.excluded_types
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(kind.trim()))
        })
    }

    /// Top edge of the bar within a frame of `frame_height`.
    pub fn top(&self, frame_height: u32) -> u32 {
        match self.position {
            BarPosition::Top => self.margin,
            BarPosition::Bottom => frame_height.saturating_sub(self.height + self.margin),
        }
    }
}

/// Picture-in-picture preview of the upcoming exercise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NextUpPreview {
    pub enabled: bool,
    /// Preview width as a fraction of the frame width
    pub scale: f64,
    pub show_before_end_seconds: f64,
    pub clip_seconds: f64,
    pub fps: f64,
    pub fade_seconds: f64,
    /// Overlay x expression (W/H = frame, w/h = preview)
    pub x: String,
    pub y: String,
    pub label: String,
    pub font_file: Option<PathBuf>,
    pub font_size: u32,
    pub font_color: String,
    pub box_color: String,
    /// Upcoming entries with one of these names or types get no preview
    pub skip_names: Vec<String>,
}

impl Default for NextUpPreview {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: 0.3,
            show_before_end_seconds: 5.0,
            clip_seconds: 5.0,
            fps: 15.0,
            fade_seconds: 0.5,
            x: "W-w-40".to_string(),
            y: "H-h-40".to_string(),
            label: "NEXT UP:".to_string(),
            font_file: None,
            font_size: 40,
            font_color: "white".to_string(),
            box_color: "black@0.6".to_string(),
            skip_names: ["rest", "cool down"].map(String::from).to_vec(),
        }
    }
}

impl NextUpPreview {
    pub fn skips(&self, name: &str, kind: Option<&str>) -> bool {
        self.skip_names.iter().any(|skip| {
            skip.eq_ignore_ascii_case(name.trim())
                || kind.is_some_and(|kind| skip.eq_ignore_ascii_case(kind.trim()))
        })
    }
}

pub(super) fn validate_overlays(bar: &ProgressBar, preview: &NextUpPreview, problems: &mut Vec<String>) {
    if bar.enabled && bar.height == 0 {
        problems.push("progress_bar.height must be positive".to_string());
    }
    if !preview.enabled {
        return;
    }
    if !(preview.scale > 0.0 && preview.scale <= 1.0) {
        problems.push("next_up_preview.scale must be within (0, 1]".to_string());
    }
    for (name, value) in [
        ("show_before_end_seconds", preview.show_before_end_seconds),
        ("clip_seconds", preview.clip_seconds),
        ("fps", preview.fps),
    ] {
        if !value.is_finite() || value <= 0.0 {
            problems.push(format!("next_up_preview.{name} must be positive"));
        }
    }
    if !preview.fade_seconds.is_finite() || preview.fade_seconds < 0.0 {
        problems.push("next_up_preview.fade_seconds must not be negative".to_string());
    }
    if preview.font_size == 0 {
        problems.push("next_up_preview.font_size must be positive".to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExerciseName {
    pub enabled: bool,
    pub font_file: Option<PathBuf>,
    pub font_size: u32,
    pub font_color: String,
    pub stroke_width: u32,
    pub stroke_color: String,
    pub box_enabled: bool,
    pub box_color: String,
    /// Padding around the measured text extents
    pub box_padding: u32,
    /// drawtext x expression (w/h = frame, text_w/text_h = text)
    pub position_x: String,
    pub position_y: String,
    pub wrap_at_char: usize,
}

impl Default for ExerciseName {
    fn default() -> Self {
        Self {
            enabled: true,
            font_file: None,
            font_size: 72,
            font_color: "white".to_string(),
            stroke_width: 3,
            stroke_color: "black".to_string(),
            box_enabled: true,
            box_color: "black@0.5".to_string(),
            box_padding: 20,
            position_x: "(w-text_w)/2".to_string(),
            position_y: "h-text_h-80".to_string(),
            wrap_at_char: 25,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TextOverlays {
    pub exercise_name: ExerciseName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoOutput {
    pub resolution: String,
    pub codec: String,
    /// Used when 10-bit output is requested from an 8-bit-only encoder
    pub codec_10bit_fallback: String,
    pub preset: String,
    /// `-cq` for NVENC encoders, `-crf` for software encoders
    pub quality: u32,
    /// Output bit depth; follows the source when unset
    pub bit_depth: Option<u8>,
    pub fps: Option<f64>,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
}

impl Default for VideoOutput {
    fn default() -> Self {
        Self {
            resolution: "1920x1080".to_string(),
            codec: "hevc_nvenc".to_string(),
            codec_10bit_fallback: "hevc_nvenc".to_string(),
            preset: "p5".to_string(),
            quality: 23,
            bit_depth: None,
            fps: None,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

impl VideoOutput {
    pub fn resolution(&self) -> Result<Resolution> {
        Resolution::parse(&self.resolution)
    }

    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        if let Err(e) = self.resolution() {
            problems.push(format!("video_output.resolution: {e}"));
        }
        if let Some(depth) = self.bit_depth
            && depth != 8
            && depth != 10
        {
            problems.push(format!("video_output.bit_depth must be 8 or 10, got {depth}"));
        }
        if let Some(fps) = self.fps
            && (!fps.is_finite() || fps <= 0.0)
        {
            problems.push("video_output.fps must be positive".to_string());
        }
        if !(1..=2).contains(&self.audio_channels) {
            problems.push("video_output.audio_channels must be 1 or 2".to_string());
        }
        if self.audio_sample_rate == 0 {
            problems.push("video_output.audio_sample_rate must be positive".to_string());
        }
        if self.codec.trim().is_empty() {
            problems.push("video_output.codec must not be empty".to_string());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestModeSettings {
    pub resolution: Option<String>,
    pub codec: Option<String>,
    pub preset: Option<String>,
    pub quality: Option<u32>,
    pub fps: Option<f64>,
    pub bit_depth: Option<u8>,
    pub disable_finishing_filters: bool,
}

impl Default for TestModeSettings {
    fn default() -> Self {
        Self {
            resolution: Some("854x480".to_string()),
            codec: None,
            preset: Some("p1".to_string()),
            quality: Some(32),
            fps: Some(15.0),
            bit_depth: Some(8),
            disable_finishing_filters: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_accepts_both_separators() {
        assert_eq!(
            Resolution::parse("1920x1080").unwrap(),
            Resolution {
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(Resolution::parse("1080:1920").unwrap().height, 1920);
    }

    #[test]
    fn resolution_rejects_odd_or_malformed_values() {
        assert!(Resolution::parse("1921x1080").is_err());
        assert!(Resolution::parse("0x1080").is_err());
        assert!(Resolution::parse("full-hd").is_err());
    }

    #[test]
    fn bar_sits_on_the_chosen_edge() {
        let mut bar = ProgressBar {
            height: 12,
            margin: 8,
            ..ProgressBar::default()
        };
        assert_eq!(bar.top(1080), 1060);
        bar.position = BarPosition::Top;
        assert_eq!(bar.top(1080), 8);
    }

    #[test]
    fn overlay_exclusions_ignore_case() {
        let bar = ProgressBar::default();
        assert!(bar.excludes(Some("Cool Down")));
        assert!(!bar.excludes(Some("strength")));
        assert!(!bar.excludes(None));

        let preview = NextUpPreview::default();
        assert!(preview.skips("REST", None));
        assert!(preview.skips("Stretch it out", Some("cool down")));
        assert!(!preview.skips("Burpees", Some("cardio")));
    }

    #[test]
    fn disabled_overlays_are_not_validated() {
        let bar = ProgressBar {
            height: 0,
            ..ProgressBar::default()
        };
        let preview = NextUpPreview {
            scale: 3.0,
            ..NextUpPreview::default()
        };
        let mut problems = Vec::new();
        validate_overlays(&bar, &preview, &mut problems);
        assert!(problems.is_empty());

        let bar = ProgressBar { enabled: true, ..bar };
        let preview = NextUpPreview { enabled: true, fps: 0.0, ..preview };
        validate_overlays(&bar, &preview, &mut problems);
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn sharpen_matrix_must_be_odd() {
        let mut filters = FinishingFilters::default();
        filters.sharpen.luma_msize = 4;
        let mut problems = Vec::new();
        filters.validate(&mut problems);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("luma_msize"));
    }
}
