//! Segment planning: routine entries to absolute source ranges.
//!
//! Offsets are always computed over the full routine, so selecting a subset
//! of segments never shifts where a segment reads from the source.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use super::error::PipelineError;
use super::ffmpeg::probe::MediaProbe;
use crate::video::routine::Routine;

pub(super) const TIME_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentPlan {
    /// 1-based position in the routine
    pub index: usize,
    pub title: String,
    pub kind: Option<String>,
    pub source_start: f64,
    pub source_end: f64,
    /// Position of the entry within the full routine, independent of `--start`
    pub timeline_offset: f64,
    pub timer_duration: f64,
    pub video_source: PathBuf,
    pub audio_source: PathBuf,
    /// Whether `video_source` is a per-entry replacement clip
    pub overridden: bool,
}

impl SegmentPlan {
    pub fn duration(&self) -> f64 {
        self.source_end - self.source_start
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSegment {
    pub index: usize,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub segments: Vec<SegmentPlan>,
    pub skipped: Vec<SkippedSegment>,
}

#[derive(Debug, Clone)]
pub struct PlanRequest<'a> {
    pub source_video: &'a Path,
    pub start: f64,
    pub end: Option<f64>,
    /// Sorted 1-based indices; `None` selects everything
    pub segments: Option<&'a [usize]>,
    /// Probed duration of the primary source, when known
    pub source_duration: Option<f64>,
}

impl PlanRequest<'_> {
    /// Last usable second of the primary source: `--end` or its duration.
    pub fn source_limit(&self) -> Option<f64> {
        match (self.end, self.source_duration) {
            (Some(end), Some(dur)) => Some(end.min(dur)),
            (end, dur) => end.or(dur),
        }
    }
}

/// Parse `1,3,5-7` into sorted, de-duplicated 1-based indices.
pub fn parse_segment_filter(raw: &str) -> Result<Vec<usize>> {
    let mut indices = BTreeSet::new();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(config_error(format!("empty entry in --segments '{raw}'")));
        }
        let (first, last) = match token.split_once('-') {
            Some((a, b)) => (parse_index(a, raw)?, parse_index(b, raw)?),
            None => {
                let idx = parse_index(token, raw)?;
                (idx, idx)
            }
        };
        if last < first {
            return Err(config_error(format!(
                "descending range '{token}' in --segments"
            )));
        }
        indices.extend(first..=last);
    }
    Ok(indices.into_iter().collect())
}

fn parse_index(value: &str, raw: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(config_error(format!(
            "--segments '{raw}' contains 0; indices are 1-based"
        ))),
        Ok(idx) => Ok(idx),
        Err(_) => Err(config_error(format!(
            "--segments '{raw}' contains non-numeric entry '{}'",
            value.trim()
        ))),
    }
}

fn config_error(message: String) -> anyhow::Error {
    PipelineError::Config(message).into()
}

/// Reject an unusable trim window before anything else runs.
pub fn validate_window(start: f64, end: Option<f64>) -> Result<()> {
    if !start.is_finite() || start < 0.0 {
        return Err(config_error(format!("--start must be >= 0, got {start}")));
    }
    if let Some(end) = end
        && (!end.is_finite() || end <= start)
    {
        return Err(config_error(format!(
            "--end ({end}) must be greater than --start ({start})"
        )));
    }
    Ok(())
}

pub fn plan_segments(routine: &Routine, request: &PlanRequest<'_>) -> Result<Plan> {
    validate_window(request.start, request.end)?;

    let total = routine.len();
    if let Some(selected) = request.segments
        && let Some(&bad) = selected.iter().find(|&&idx| idx == 0 || idx > total)
    {
        return Err(config_error(format!(
            "segment {bad} is out of range (routine has {total} segments)"
        )));
    }

    let source_limit = request.source_limit();

    let mut plan = Plan::default();
    let mut timeline_offset = 0.0;

    for (pos, entry) in routine.entries.iter().enumerate() {
        let index = pos + 1;
        let offset = timeline_offset;
        timeline_offset += entry.length;

        if !entry.length.is_finite() || entry.length <= 0.0 {
            return Err(config_error(format!(
                "segment {index} ('{}') has non-positive length {}",
                entry.name, entry.length
            )));
        }

        let explicit = request.segments.is_some_and(|s| s.binary_search(&index).is_ok());
        if request.segments.is_some() && !explicit {
            continue;
        }

        let slot_start = request.start + offset;
        let mut length = entry.length;

        // Override clips are not bounded by the primary source's duration
        let limit = if entry.replace_video.is_some() {
            request.end
        } else {
            source_limit
        };
        if let Some(limit) = limit {
            if slot_start >= limit - TIME_EPSILON {
                let reason = if request.end.is_some_and(|end| slot_start >= end - TIME_EPSILON) {
                    format!("starts at {slot_start:.3}s, at or after --end")
                } else {
                    format!("starts at {slot_start:.3}s, past the end of the source video")
                };
                if explicit {
                    return Err(config_error(format!(
                        "segment {index} ('{}') {reason}",
                        entry.name
                    )));
                }
                plan.skipped.push(SkippedSegment {
                    index,
                    name: entry.name.clone(),
                    reason,
                });
                continue;
            }
            length = length.min(limit - slot_start);
        }

        let (video_source, source_start) = match &entry.replace_video {
            Some(clip) => (clip.clone(), 0.0),
            None => (request.source_video.to_path_buf(), slot_start),
        };
        let audio_source = entry
            .audio_override()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| request.source_video.to_path_buf());

        plan.segments.push(SegmentPlan {
            index,
            title: entry.name.clone(),
            kind: entry.kind.clone(),
            source_start,
            source_end: source_start + length,
            timeline_offset: offset,
            timer_duration: length,
            video_source,
            audio_source,
            overridden: entry.replace_video.is_some(),
        });
    }

    if plan.segments.is_empty() {
        return Err(config_error(
            "no segments fall inside the requested window".to_string(),
        ));
    }

    Ok(plan)
}

/// Check replacement files and clamp their ranges to native durations.
pub fn resolve_overrides(plan: &mut Plan, probe: &dyn MediaProbe) -> Result<()> {
    for segment in &mut plan.segments {
        let mut overrides = Vec::new();
        if segment.overridden {
            overrides.push(segment.video_source.clone());
        }
        if segment.audio_source != segment.video_source {
            overrides.push(segment.audio_source.clone());
        }
        for path in &overrides {
            if !path.exists() {
                return Err(config_error(format!(
                    "segment {} ('{}') references missing file {}",
                    segment.index,
                    segment.title,
                    path.display()
                )));
            }
        }

        if segment.overridden {
            let native = probe.duration(&segment.video_source)?;
            if native + TIME_EPSILON < segment.duration() {
                segment.source_end = segment.source_start + native;
                segment.timer_duration = native;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::routine::RoutineEntry;

    fn routine(lengths: &[f64]) -> Routine {
        Routine::new(
            lengths
                .iter()
                .enumerate()
                .map(|(i, &len)| RoutineEntry::new(format!("exercise {}", i + 1), len))
                .collect(),
        )
    }

    fn request<'a>(segments: Option<&'a [usize]>) -> PlanRequest<'a> {
        PlanRequest {
            source_video: Path::new("raw.mp4"),
            start: 0.0,
            end: None,
            segments,
            source_duration: None,
        }
    }

    #[test]
    fn segment_filter_accepts_lists_and_ranges() {
        assert_eq!(parse_segment_filter("5,1,3-4,3").unwrap(), vec![1, 3, 4, 5]);
        assert_eq!(parse_segment_filter(" 2 ").unwrap(), vec![2]);
    }

    #[test]
    fn segment_filter_rejects_bad_tokens() {
        for raw in ["", "1,,2", "0", "a", "4-2"] {
            let err = parse_segment_filter(raw).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Config(_))),
                "{raw} should be a config error"
            );
        }
    }

    #[test]
    fn selected_segment_keeps_absolute_offset() {
        let routine = routine(&[30.0, 45.0, 20.0, 10.0, 60.0]);
        let selected = [3];
        let mut req = request(Some(&selected));
        req.start = 12.5;
        let plan = plan_segments(&routine, &req).unwrap();

        assert_eq!(plan.segments.len(), 1);
        let seg = &plan.segments[0];
        assert_eq!(seg.index, 3);
        assert!((seg.source_start - (12.5 + 75.0)).abs() < 1e-9);
        assert!((seg.duration() - 20.0).abs() < 1e-9);
        assert!((seg.timeline_offset - 75.0).abs() < 1e-9);
    }

    #[test]
    fn planned_durations_sum_to_selected_lengths_regardless_of_start() {
        let routine = routine(&[12.0, 7.5, 30.25, 4.0]);
        let selected = [2, 4];
        for start in [0.0, 3.0, 100.0] {
            let mut req = request(Some(&selected));
            req.start = start;
            let plan = plan_segments(&routine, &req).unwrap();
            let total: f64 = plan.segments.iter().map(SegmentPlan::duration).sum();
            assert!((total - 11.5).abs() < 1e-9);
        }
    }

    #[test]
    fn out_of_range_selection_is_a_config_error() {
        let routine = routine(&[10.0, 10.0]);
        let selected = [3];
        let err = plan_segments(&routine, &request(Some(&selected))).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn end_must_follow_start() {
        let routine = routine(&[10.0]);
        let mut req = request(None);
        req.start = 5.0;
        req.end = Some(5.0);
        assert!(plan_segments(&routine, &req).is_err());
        req.start = -1.0;
        req.end = None;
        assert!(plan_segments(&routine, &req).is_err());
    }

    #[test]
    fn end_truncates_straddling_and_skips_later_segments() {
        let routine = routine(&[10.0, 10.0, 10.0]);
        let mut req = request(None);
        req.end = Some(15.0);
        let plan = plan_segments(&routine, &req).unwrap();

        assert_eq!(plan.segments.len(), 2);
        assert!((plan.segments[1].source_end - 15.0).abs() < 1e-9);
        assert!((plan.segments[1].timer_duration - 5.0).abs() < 1e-9);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].index, 3);
    }

    #[test]
    fn explicitly_selected_segment_past_end_fails() {
        let routine = routine(&[10.0, 10.0, 10.0]);
        let selected = [3];
        let mut req = request(Some(&selected));
        req.end = Some(15.0);
        assert!(plan_segments(&routine, &req).is_err());
    }

    #[test]
    fn source_duration_bounds_primary_segments() {
        let routine = routine(&[10.0, 10.0, 10.0]);
        let mut req = request(None);
        req.source_duration = Some(25.0);
        let plan = plan_segments(&routine, &req).unwrap();
        assert_eq!(plan.segments.len(), 3);
        assert!((plan.segments[2].duration() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn override_entries_read_from_their_own_file() {
        let mut entries = vec![
            RoutineEntry::new("hook", 4.0),
            RoutineEntry::new("jumping jacks", 30.0),
        ];
        entries[0].replace_video = Some(PathBuf::from("/clips/hook.mp4"));
        entries[0].replace_audio = Some(PathBuf::from("/clips/voice.wav"));
        let routine = Routine::new(entries);
        let mut req = request(None);
        req.start = 60.0;
        let plan = plan_segments(&routine, &req).unwrap();

        let hook = &plan.segments[0];
        assert!(hook.overridden);
        assert_eq!(hook.video_source, PathBuf::from("/clips/hook.mp4"));
        assert_eq!(hook.audio_source, PathBuf::from("/clips/voice.wav"));
        assert_eq!((hook.source_start, hook.source_end), (0.0, 4.0));

        let jacks = &plan.segments[1];
        assert!(!jacks.overridden);
        assert_eq!(jacks.audio_source, PathBuf::from("raw.mp4"));
        assert!((jacks.source_start - 64.0).abs() < 1e-9);
    }
}
