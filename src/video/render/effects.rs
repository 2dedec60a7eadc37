//! Sound-effect rule matching and placement.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::plan::SegmentPlan;
use crate::video::config::{ChannelLayout, EffectTiming, SoundEffects};

/// One effect that fires in a segment, already positioned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredEffect {
    pub rule: String,
    pub file: PathBuf,
    pub volume: f64,
    pub layout: ChannelLayout,
    /// Seconds from the start of the segment
    pub delay: f64,
}

/// Case-insensitive trigger match against a segment's title and type tag.
pub fn trigger_matches(trigger: &str, title: &str, kind: Option<&str>) -> bool {
    let trigger = trigger.trim();
    if trigger == "*" {
        return true;
    }
    if let Some(tag) = trigger.strip_prefix("type:") {
        return kind.is_some_and(|k| k.trim().eq_ignore_ascii_case(tag.trim()));
    }
    !trigger.is_empty() && title.to_lowercase().contains(&trigger.to_lowercase())
}

pub fn any_trigger_matches(triggers: &[String], plan: &SegmentPlan) -> bool {
    triggers
        .iter()
        .any(|t| trigger_matches(t, &plan.title, plan.kind.as_deref()))
}

/// Seed derived from the configured seed and the segment's identity, so a
/// segment draws the same effects on every run.
pub(super) fn segment_seed(base: u64, index: usize, title: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

pub fn resolve_effects(config: &SoundEffects, plan: &SegmentPlan) -> Vec<TriggeredEffect> {
    if !config.enabled {
        return Vec::new();
    }

    let duration = plan.duration();
    let mut rng = StdRng::seed_from_u64(segment_seed(config.seed, plan.index, &plan.title));
    let mut fired = Vec::new();

    for rule in &config.rules {
        if !any_trigger_matches(&rule.triggers, plan) {
            continue;
        }
        // Always draw so later rules see the same sequence whatever this one does
        let roll: f64 = rng.r#gen();
        if roll >= rule.probability {
            continue;
        }
        let Some(effect) = config.library.get(&rule.effect) else {
            continue;
        };

        let delay = match rule.timing {
            EffectTiming::FromStart(secs) => secs,
            EffectTiming::FromEnd(secs) => (duration - secs).max(0.0),
            EffectTiming::Random => {
                let [lo, hi] = rule.random_window.unwrap_or([0.0, duration]);
                let hi = hi.min(duration);
                let lo = lo.min(hi);
                if hi > lo { rng.gen_range(lo..hi) } else { lo }
            }
        };
        if delay >= duration {
            continue;
        }

        fired.push(TriggeredEffect {
            rule: rule.label().to_string(),
            file: effect.file.clone(),
            volume: effect.volume,
            layout: effect.channel_layout,
            delay,
        });
    }

    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::config::{SoundEffect, SoundEffectRule};
    use std::path::Path;

    fn plan(index: usize, title: &str, kind: Option<&str>, duration: f64) -> SegmentPlan {
        SegmentPlan {
            index,
            title: title.to_string(),
            kind: kind.map(str::to_string),
            source_start: 100.0,
            source_end: 100.0 + duration,
            timeline_offset: 100.0,
            timer_duration: duration,
            video_source: PathBuf::from("raw.mp4"),
            audio_source: PathBuf::from("raw.mp4"),
            overridden: false,
        }
    }

    fn rule(triggers: &[&str], timing: EffectTiming, probability: f64) -> SoundEffectRule {
        SoundEffectRule {
            name: None,
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
            timing,
            probability,
            effect: "whistle".to_string(),
            random_window: None,
        }
    }

    fn effects(rules: Vec<SoundEffectRule>) -> SoundEffects {
        let mut config = SoundEffects::default();
        config.library.insert(
            "whistle".to_string(),
            SoundEffect {
                file: PathBuf::from("/sfx/whistle.wav"),
                volume: 0.7,
                channel_layout: ChannelLayout::Mono,
            },
        );
        config.rules = rules;
        config
    }

    #[test]
    fn triggers_match_substrings_wildcards_and_types() {
        assert!(trigger_matches("push", "Diamond Push Ups", None));
        assert!(trigger_matches("PUSH", "diamond push ups", None));
        assert!(trigger_matches("*", "anything", None));
        assert!(trigger_matches("type:rest", "Breathe", Some("Rest")));
        assert!(!trigger_matches("type:rest", "Rest", None));
        assert!(!trigger_matches("squat", "Lunges", None));
    }

    #[test]
    fn timing_from_end_counts_back_from_segment_end() {
        let config = effects(vec![
            rule(&["plank"], EffectTiming::FromEnd(3.0), 1.0),
            rule(&["plank"], EffectTiming::FromStart(1.5), 1.0),
        ]);
        let fired = resolve_effects(&config, &plan(2, "Plank", None, 30.0));
        assert_eq!(fired.len(), 2);
        assert!((fired[0].delay - 27.0).abs() < 1e-9);
        assert!((fired[1].delay - 1.5).abs() < 1e-9);
        assert_eq!(fired[0].file, Path::new("/sfx/whistle.wav"));
        assert_eq!(fired[0].layout, ChannelLayout::Mono);
    }

    #[test]
    fn effects_past_the_segment_end_are_dropped() {
        let config = effects(vec![rule(&["*"], EffectTiming::FromStart(12.0), 1.0)]);
        assert!(resolve_effects(&config, &plan(1, "Rest", None, 10.0)).is_empty());
    }

    #[test]
    fn random_draws_are_stable_per_segment() {
        let mut random = rule(&["*"], EffectTiming::Random, 0.5);
        random.random_window = Some([2.0, 8.0]);
        let config = effects(vec![random.clone(), random.clone(), random]);

        let segment = plan(4, "Burpees", None, 20.0);
        let first = resolve_effects(&config, &segment);
        let second = resolve_effects(&config, &segment);
        assert_eq!(first, second);
        assert!(first.iter().all(|e| (2.0..8.0).contains(&e.delay)));
    }

    #[test]
    fn zero_probability_never_fires_and_disabled_config_is_silent() {
        let config = effects(vec![rule(&["*"], EffectTiming::FromStart(0.0), 0.0)]);
        assert!(resolve_effects(&config, &plan(1, "Squats", None, 30.0)).is_empty());

        let mut config = effects(vec![rule(&["*"], EffectTiming::FromStart(0.0), 1.0)]);
        config.enabled = false;
        assert!(resolve_effects(&config, &plan(1, "Squats", None, 30.0)).is_empty());
    }
}
