//! Per-segment data for the workout progress bar and the next-up preview.
//!
//! Both look at the whole routine rather than the selected segments, so a
//! segment renders the same overlays whether or not its neighbours are
//! part of the run.

use std::path::PathBuf;

use serde::Serialize;

use super::plan::{PlanRequest, SegmentPlan, TIME_EPSILON};
use crate::video::config::{NextUpPreview, ProgressBar};
use crate::video::routine::Routine;

/// Workout seconds completed before a segment starts, out of the total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkoutProgress {
    pub elapsed_before: f64,
    pub total: f64,
}

/// Source range shown in the preview of the following entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextUpClip {
    /// 1-based routine position of the upcoming entry
    pub index: usize,
    pub name: String,
    pub source: PathBuf,
    pub start: f64,
    pub duration: f64,
}

pub fn workout_progress(
    config: &ProgressBar,
    routine: &Routine,
    segment: &SegmentPlan,
) -> Option<WorkoutProgress> {
    if !config.enabled {
        return None;
    }
    let current = routine.entries.get(segment.index.checked_sub(1)?)?;
    if config.excludes(current.kind.as_deref()) {
        return None;
    }

    let counted = |pos: usize| !config.excludes(routine.entries[pos].kind.as_deref());
    let total: f64 = (0..routine.len())
        .filter(|&pos| counted(pos))
        .map(|pos| routine.entries[pos].length)
        .sum();
    if total <= TIME_EPSILON {
        return None;
    }
    let elapsed_before = (0..segment.index - 1)
        .filter(|&pos| counted(pos))
        .map(|pos| routine.entries[pos].length)
        .sum();

    Some(WorkoutProgress {
        elapsed_before,
        total,
    })
}

/// The following routine entry's opening seconds, when there is one worth
/// previewing and the source still has footage for it.
pub fn next_up_clip(
    config: &NextUpPreview,
    routine: &Routine,
    request: &PlanRequest<'_>,
    segment: &SegmentPlan,
) -> Option<NextUpClip> {
    if !config.enabled {
        return None;
    }
    let next = routine.entries.get(segment.index)?;
    if config.skips(&next.name, next.kind.as_deref()) {
        return None;
    }
    let show = config.show_before_end_seconds.min(segment.duration());
    if show <= TIME_EPSILON {
        return None;
    }

    let (source, start, available) = match &next.replace_video {
        Some(clip) => {
            if !clip.is_file() {
                return None;
            }
            (clip.clone(), 0.0, next.length)
        }
        None => {
            let offset: f64 = routine.entries[..segment.index]
                .iter()
                .map(|entry| entry.length)
                .sum();
            let start = request.start + offset;
            let available = match request.source_limit() {
                Some(limit) => limit - start,
                None => next.length,
            };
            (request.source_video.to_path_buf(), start, available)
        }
    };
    if available <= TIME_EPSILON {
        return None;
    }

    Some(NextUpClip {
        index: segment.index + 1,
        name: next.name.clone(),
        source,
        start,
        duration: config.clip_seconds.min(show).min(available),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::video::render::plan::plan_segments;
    use crate::video::routine::RoutineEntry;

    fn entry(name: &str, length: f64, kind: Option<&str>) -> RoutineEntry {
        let mut entry = RoutineEntry::new(name, length);
        entry.kind = kind.map(String::from);
        entry
    }

    fn routine() -> Routine {
        Routine::new(vec![
            entry("Arm Circles", 60.0, Some("warmup")),
            entry("Squats", 40.0, None),
            entry("Rest", 20.0, Some("rest")),
            entry("Burpees", 30.0, None),
            entry("Stretch", 45.0, Some("cool down")),
        ])
    }

    fn request<'a>() -> PlanRequest<'a> {
        PlanRequest {
            source_video: Path::new("raw.mp4"),
            start: 10.0,
            end: None,
            segments: None,
            source_duration: Some(600.0),
        }
    }

    fn plan(request: &PlanRequest<'_>) -> Vec<SegmentPlan> {
        plan_segments(&routine(), request).unwrap().segments
    }

    #[test]
    fn progress_counts_only_workout_entries() {
        let bar = ProgressBar {
            enabled: true,
            ..ProgressBar::default()
        };
        let segments = plan(&request());
        let progress: Vec<_> = segments
            .iter()
            .map(|s| workout_progress(&bar, &routine(), s))
            .collect();

        assert_eq!(progress[0], None);
        assert_eq!(
            progress[1],
            Some(WorkoutProgress {
                elapsed_before: 0.0,
                total: 70.0
            })
        );
        assert_eq!(progress[2], None);
        assert_eq!(
            progress[3],
            Some(WorkoutProgress {
                elapsed_before: 40.0,
                total: 70.0
            })
        );
        assert_eq!(progress[4], None);
    }

    #[test]
    fn progress_ignores_the_segment_selection() {
        let bar = ProgressBar {
            enabled: true,
            ..ProgressBar::default()
        };
        let selected = [4];
        let mut req = request();
        req.segments = Some(&selected);
        let segments = plan(&req);
        let progress = workout_progress(&bar, &routine(), &segments[0]).unwrap();
        assert_eq!(progress.elapsed_before, 40.0);

        assert_eq!(workout_progress(&ProgressBar::default(), &routine(), &segments[0]), None);
    }

    #[test]
    fn next_up_reads_the_following_entry_from_the_source() {
        let preview = NextUpPreview {
            enabled: true,
            ..NextUpPreview::default()
        };
        let segments = plan(&request());

        let clip = next_up_clip(&preview, &routine(), &request(), &segments[0]).unwrap();
        assert_eq!(clip.index, 2);
        assert_eq!(clip.name, "Squats");
        assert_eq!(clip.source, PathBuf::from("raw.mp4"));
        assert!((clip.start - 70.0).abs() < 1e-9);
        assert!((clip.duration - 5.0).abs() < 1e-9);

        // the following entries are a rest, then a cool down, then nothing
        assert_eq!(next_up_clip(&preview, &routine(), &request(), &segments[1]), None);
        assert_eq!(next_up_clip(&preview, &routine(), &request(), &segments[3]), None);
        assert_eq!(next_up_clip(&preview, &routine(), &request(), &segments[4]), None);
    }

    #[test]
    fn next_up_stops_at_the_end_of_the_source() {
        let preview = NextUpPreview {
            enabled: true,
            ..NextUpPreview::default()
        };
        let mut req = request();
        req.source_duration = Some(72.0);
        let segments = plan(&req);
        let clip = next_up_clip(&preview, &routine(), &req, &segments[0]).unwrap();
        assert!((clip.duration - 2.0).abs() < 1e-9);

        req.source_duration = Some(70.0);
        let segments = plan(&req);
        assert_eq!(next_up_clip(&preview, &routine(), &req, &segments[0]), None);
    }

    #[test]
    fn next_up_uses_a_replacement_clip_when_present() {
        let dir = tempfile::TempDir::new().unwrap();
        let hook = dir.path().join("squats.mp4");
        std::fs::write(&hook, b"clip").unwrap();
        let mut routine = routine();
        routine.entries[1].replace_video = Some(hook.clone());
        let preview = NextUpPreview {
            enabled: true,
            ..NextUpPreview::default()
        };
        let segments = plan_segments(&routine, &request()).unwrap().segments;

        let clip = next_up_clip(&preview, &routine, &request(), &segments[0]).unwrap();
        assert_eq!(clip.source, hook);
        assert_eq!(clip.start, 0.0);

        routine.entries[1].replace_video = Some(dir.path().join("gone.mp4"));
        assert_eq!(next_up_clip(&preview, &routine, &request(), &segments[0]), None);
    }
}
