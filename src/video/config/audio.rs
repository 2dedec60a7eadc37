use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelLayout::Mono => "mono",
            ChannelLayout::Stereo => "stereo",
        }
    }

    pub fn from_channels(channels: u8) -> Self {
        if channels <= 1 {
            ChannelLayout::Mono
        } else {
            ChannelLayout::Stereo
        }
    }
}

/// When an effect starts within its segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTiming", into = "RawTiming")]
pub enum EffectTiming {
    /// Seconds after the segment starts
    FromStart(f64),
    /// Seconds before the segment ends
    FromEnd(f64),
    /// Uniformly drawn within the rule's window
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawTiming {
    Seconds(f64),
    Keyword(String),
}

impl TryFrom<RawTiming> for EffectTiming {
    type Error = String;

    fn try_from(raw: RawTiming) -> Result<Self, Self::Error> {
        match raw {
            RawTiming::Seconds(s) if !s.is_finite() => Err(format!("timing {s} is not finite")),
            RawTiming::Seconds(s) if s < 0.0 => Ok(EffectTiming::FromEnd(-s)),
            RawTiming::Seconds(s) => Ok(EffectTiming::FromStart(s)),
            RawTiming::Keyword(k) if k.eq_ignore_ascii_case("random") => Ok(EffectTiming::Random),
            RawTiming::Keyword(k) => Err(format!(
                "timing must be a number of seconds or 'random', got '{k}'"
            )),
        }
    }
}

impl From<EffectTiming> for RawTiming {
    fn from(timing: EffectTiming) -> Self {
        match timing {
            EffectTiming::FromStart(s) => RawTiming::Seconds(s),
            EffectTiming::FromEnd(s) => RawTiming::Seconds(-s),
            EffectTiming::Random => RawTiming::Keyword("random".to_string()),
        }
    }
}

impl Default for EffectTiming {
    fn default() -> Self {
        EffectTiming::FromStart(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoundEffect {
    pub file: PathBuf,
    #[serde(default = "unit_volume")]
    pub volume: f64,
    #[serde(default)]
    pub channel_layout: ChannelLayout,
}

fn unit_volume() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoundEffectRule {
    #[serde(default)]
    pub name: Option<String>,
    /// Title substrings, `*`, or `type:<tag>`
    pub triggers: Vec<String>,
    #[serde(default)]
    pub timing: EffectTiming,
    #[serde(default = "unit_probability")]
    pub probability: f64,
    /// Key into the sound-effect library
    pub effect: String,
    /// `[min, max]` seconds for `random` timing; whole segment when unset
    #[serde(default)]
    pub random_window: Option<[f64; 2]>,
}

fn unit_probability() -> f64 {
    1.0
}

impl SoundEffectRule {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.effect)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoundEffects {
    pub enabled: bool,
    /// Base seed for probability and random-timing draws
    pub seed: u64,
    pub library: BTreeMap<String, SoundEffect>,
    pub rules: Vec<SoundEffectRule>,
}

impl Default for SoundEffects {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: 0,
            library: BTreeMap::new(),
            rules: Vec::new(),
        }
    }
}

impl SoundEffects {
    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        for (name, effect) in &self.library {
            if !effect.volume.is_finite() || effect.volume < 0.0 {
                problems.push(format!("sound effect '{name}' has invalid volume {}", effect.volume));
            }
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            let label = format!("sound_effects.rules[{idx}]");
            if !self.library.contains_key(&rule.effect) {
                problems.push(format!("{label} references unknown effect '{}'", rule.effect));
            }
            if !(0.0..=1.0).contains(&rule.probability) {
                problems.push(format!("{label}.probability must be within 0..1"));
            }
            if rule.triggers.is_empty() {
                problems.push(format!("{label} has no triggers"));
            }
            if let Some([lo, hi]) = rule.random_window
                && (!(lo.is_finite() && hi.is_finite()) || lo < 0.0 || hi < lo)
            {
                problems.push(format!("{label}.random_window must be [min, max] with 0 <= min <= max"));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MusicRule {
    #[serde(default)]
    pub name: Option<String>,
    pub triggers: Vec<String>,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Ducking {
    pub enabled: bool,
    pub threshold: f64,
    pub ratio: f64,
    /// Milliseconds
    pub attack: f64,
    /// Milliseconds
    pub release: f64,
    pub makeup: f64,
}

impl Default for Ducking {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.05,
            ratio: 8.0,
            attack: 20.0,
            release: 400.0,
            makeup: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundMusic {
    pub enabled: bool,
    pub volume: f64,
    pub channel_layout: ChannelLayout,
    /// Library scanned for continue-mode playback
    pub music_folder: Option<PathBuf>,
    /// Seed for playlist shuffles
    pub seed: u64,
    pub rules: Vec<MusicRule>,
    pub ducking: Ducking,
}

impl Default for BackgroundMusic {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: 0.25,
            channel_layout: ChannelLayout::Stereo,
            music_folder: None,
            seed: 0,
            rules: Vec::new(),
            ducking: Ducking::default(),
        }
    }
}

impl BackgroundMusic {
    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        if !self.volume.is_finite() || self.volume < 0.0 {
            problems.push(format!("background_music.volume is invalid: {}", self.volume));
        }
        let d = &self.ducking;
        for (name, value) in [
            ("threshold", d.threshold),
            ("ratio", d.ratio),
            ("attack", d.attack),
            ("release", d.release),
            ("makeup", d.makeup),
        ] {
            if !value.is_finite() || value <= 0.0 {
                problems.push(format!("background_music.ducking.{name} must be positive"));
            }
        }
        // sidechaincompress limits
        if d.threshold > 1.0 {
            problems.push("background_music.ducking.threshold must be at most 1".to_string());
        }
        if d.ratio < 1.0 {
            problems.push("background_music.ducking.ratio must be at least 1".to_string());
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.triggers.is_empty() {
                problems.push(format!("background_music.rules[{idx}] has no triggers"));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MasterPass {
    pub enabled: bool,
    /// Seconds
    pub fade_in: f64,
    /// Seconds
    pub fade_out: f64,
    pub loudness_i: f64,
    pub true_peak: f64,
    pub lra: f64,
}

impl Default for MasterPass {
    fn default() -> Self {
        Self {
            enabled: true,
            fade_in: 1.0,
            fade_out: 2.0,
            loudness_i: -16.0,
            true_peak: -1.5,
            lra: 11.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioOptimization {
    /// Declared layout of the source recording; probed when unset
    pub source_channel_layout: Option<ChannelLayout>,
    pub master: MasterPass,
}

impl AudioOptimization {
    pub(super) fn validate(&self, problems: &mut Vec<String>) {
        let m = &self.master;
        if m.fade_in < 0.0 || m.fade_out < 0.0 {
            problems.push("audio_optimization.master fades must not be negative".to_string());
        }
        if !(-70.0..=-5.0).contains(&m.loudness_i) {
            problems.push("audio_optimization.master.loudness_i must be within -70..-5".to_string());
        }
        if !(-9.0..=0.0).contains(&m.true_peak) {
            problems.push("audio_optimization.master.true_peak must be within -9..0".to_string());
        }
        if !(1.0..=50.0).contains(&m.lra) {
            problems.push("audio_optimization.master.lra must be within 1..50".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_rejects_unknown_keywords() {
        let err = serde_yaml::from_str::<EffectTiming>("soon").unwrap_err();
        assert!(err.to_string().contains("random"));
    }

    #[test]
    fn timing_serializes_back_to_signed_seconds() {
        let yaml = serde_yaml::to_string(&EffectTiming::FromEnd(2.5)).unwrap();
        assert_eq!(yaml.trim(), "-2.5");
    }

    #[test]
    fn ducking_ratio_below_one_is_rejected() {
        let mut music = BackgroundMusic::default();
        music.ducking.ratio = 0.5;
        let mut problems = Vec::new();
        music.validate(&mut problems);
        assert!(problems.iter().any(|p| p.contains("ratio")));
    }
}
