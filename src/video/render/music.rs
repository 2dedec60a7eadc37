//! Background-music scheduling.
//!
//! Music either comes from a single bed passed with `--bgm`, read at each
//! segment's timeline position, or from a library played in continue mode:
//! a track keeps playing across segments until it runs out or a rule
//! switches to another one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use walkdir::WalkDir;

use super::effects::any_trigger_matches;
use super::error::PipelineError;
use super::ffmpeg::probe::MediaProbe;
use super::plan::SegmentPlan;
use crate::video::config::BackgroundMusic;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "wav", "flac", "ogg", "opus"];
const SLICE_EPSILON: f64 = 1e-3;

/// A contiguous read from one music file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MusicSlice {
    pub file: PathBuf,
    pub offset: f64,
    pub duration: f64,
}

/// Continue-mode playback state, handed from one segment to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MusicCursor {
    pub track: Option<PathBuf>,
    pub elapsed: f64,
    pub remaining: f64,
    /// Next playlist position to start once the current track ends
    position: usize,
    /// How many times the playlist has been reshuffled
    cycle: u64,
}

impl MusicCursor {
    pub fn new() -> Self {
        Self::default()
    }

    fn exhausted(&self) -> bool {
        self.track.is_none() || self.remaining <= SLICE_EPSILON
    }

    fn start(&mut self, track: PathBuf, duration: f64) {
        self.track = Some(track);
        self.elapsed = 0.0;
        self.remaining = duration;
    }
}

#[derive(Debug, Clone)]
pub enum MusicSource {
    None,
    /// Pre-mixed bed consumed whole
    Bed(PathBuf),
    Library(Vec<PathBuf>),
}

pub struct MusicScheduler<'a> {
    config: &'a BackgroundMusic,
    source: MusicSource,
    probe: &'a dyn MediaProbe,
    durations: HashMap<PathBuf, f64>,
}

impl<'a> MusicScheduler<'a> {
    pub fn new(config: &'a BackgroundMusic, source: MusicSource, probe: &'a dyn MediaProbe) -> Self {
        Self {
            config,
            source,
            probe,
            durations: HashMap::new(),
        }
    }

    /// Pick the music source: `--bgm` first, then the configured library.
    pub fn select_source(config: &BackgroundMusic, bgm: Option<&Path>) -> Result<MusicSource> {
        if let Some(bed) = bgm {
            if !bed.is_file() {
                return Err(PipelineError::Config(format!(
                    "--bgm file {} does not exist",
                    bed.display()
                ))
                .into());
            }
            return Ok(MusicSource::Bed(bed.to_path_buf()));
        }
        if !config.enabled {
            return Ok(MusicSource::None);
        }
        for rule in &config.rules {
            if !rule.file.is_file() {
                return Err(PipelineError::Config(format!(
                    "music rule track {} does not exist",
                    rule.file.display()
                ))
                .into());
            }
        }
        let tracks = match &config.music_folder {
            Some(folder) => scan_library(folder)?,
            None => Vec::new(),
        };
        if tracks.is_empty() && config.rules.is_empty() {
            return Ok(MusicSource::None);
        }
        Ok(MusicSource::Library(tracks))
    }

    /// Music for one segment plus the cursor the next segment starts from.
    pub fn slices_for(
        &mut self,
        plan: &SegmentPlan,
        cursor: MusicCursor,
    ) -> Result<(Vec<MusicSlice>, MusicCursor)> {
        let duration = plan.duration();
        let bed = match &self.source {
            MusicSource::None => return Ok((Vec::new(), cursor)),
            MusicSource::Bed(bed) => bed.clone(),
            MusicSource::Library(_) => return self.continue_playback(plan, cursor, duration),
        };
        let slice = MusicSlice {
            file: bed,
            offset: plan.timeline_offset,
            duration,
        };
        Ok((vec![slice], cursor))
    }

    fn continue_playback(
        &mut self,
        plan: &SegmentPlan,
        mut cursor: MusicCursor,
        duration: f64,
    ) -> Result<(Vec<MusicSlice>, MusicCursor)> {
        let forced = self
            .config
            .rules
            .iter()
            .find(|rule| any_trigger_matches(&rule.triggers, plan))
            .map(|rule| rule.file.clone());
        if let Some(track) = forced
            && cursor.track.as_ref() != Some(&track)
        {
            let length = self.track_duration(&track)?;
            cursor.start(track, length);
        }

        let mut slices = Vec::new();
        let mut needed = duration;
        while needed > SLICE_EPSILON {
            if cursor.exhausted() {
                let Some(next) = self.next_track(&mut cursor)? else {
                    break;
                };
                let length = self.track_duration(&next)?;
                cursor.start(next, length);
            }
            let take = needed.min(cursor.remaining);
            if let Some(track) = &cursor.track {
                slices.push(MusicSlice {
                    file: track.clone(),
                    offset: cursor.elapsed,
                    duration: take,
                });
            }
            cursor.elapsed += take;
            cursor.remaining -= take;
            needed -= take;
        }

        Ok((slices, cursor))
    }

    /// Advance along the shuffled playlist, reshuffling once it wraps.
    fn next_track(&mut self, cursor: &mut MusicCursor) -> Result<Option<PathBuf>> {
        let MusicSource::Library(tracks) = &self.source else {
            return Ok(None);
        };
        if tracks.is_empty() {
            return Ok(None);
        }
        let tracks = tracks.clone();
        // bounded so a library of silent files cannot spin forever
        for _ in 0..=tracks.len() {
            if cursor.position >= tracks.len() {
                cursor.position = 0;
                cursor.cycle += 1;
            }
            let order = playlist_order(&tracks, self.config.seed, cursor.cycle);
            let candidate = order[cursor.position].clone();
            cursor.position += 1;
            if self.track_duration(&candidate)? > SLICE_EPSILON {
                return Ok(Some(candidate));
            }
        }
        bail!("every track in the music library has zero duration")
    }

    fn track_duration(&mut self, track: &Path) -> Result<f64> {
        if let Some(&d) = self.durations.get(track) {
            return Ok(d);
        }
        let d = self.probe.duration(track)?;
        self.durations.insert(track.to_path_buf(), d);
        Ok(d)
    }
}

fn playlist_order(tracks: &[PathBuf], seed: u64, cycle: u64) -> Vec<PathBuf> {
    let mut order = tracks.to_vec();
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(cycle));
    order.shuffle(&mut rng);
    order
}

/// Audio files below `folder`, sorted so shuffles are reproducible.
pub fn scan_library(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        return Err(PipelineError::Config(format!(
            "music_folder {} is not a directory",
            folder.display()
        ))
        .into());
    }
    let mut tracks: Vec<PathBuf> = WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    tracks.sort();
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::config::MusicRule;
    use crate::video::render::ffmpeg::probe::SourceInfo;
    use std::fs;

    struct DurationProbe(HashMap<PathBuf, f64>);

    impl MediaProbe for DurationProbe {
        fn source_info(&self, _path: &Path) -> Result<SourceInfo> {
            bail!("not a video")
        }

        fn duration(&self, path: &Path) -> Result<f64> {
            self.0
                .get(path)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("unknown track {}", path.display()))
        }
    }

    fn plan(index: usize, title: &str, offset: f64, duration: f64) -> SegmentPlan {
        SegmentPlan {
            index,
            title: title.to_string(),
            kind: None,
            source_start: offset,
            source_end: offset + duration,
            timeline_offset: offset,
            timer_duration: duration,
            video_source: PathBuf::from("raw.mp4"),
            audio_source: PathBuf::from("raw.mp4"),
            overridden: false,
        }
    }

    fn probe(tracks: &[(&str, f64)]) -> DurationProbe {
        DurationProbe(
            tracks
                .iter()
                .map(|(p, d)| (PathBuf::from(p), *d))
                .collect(),
        )
    }

    #[test]
    fn bed_is_read_at_timeline_offset() {
        let config = BackgroundMusic::default();
        let probe = probe(&[]);
        let mut scheduler =
            MusicScheduler::new(&config, MusicSource::Bed(PathBuf::from("bed.mp3")), &probe);
        let (slices, _) = scheduler
            .slices_for(&plan(3, "Lunges", 75.0, 20.0), MusicCursor::new())
            .unwrap();
        assert_eq!(
            slices,
            vec![MusicSlice {
                file: PathBuf::from("bed.mp3"),
                offset: 75.0,
                duration: 20.0
            }]
        );
    }

    #[test]
    fn continue_mode_carries_track_across_segments() {
        let config = BackgroundMusic::default();
        let probe = probe(&[("a.mp3", 50.0)]);
        let mut scheduler = MusicScheduler::new(
            &config,
            MusicSource::Library(vec![PathBuf::from("a.mp3")]),
            &probe,
        );

        let (first, cursor) = scheduler
            .slices_for(&plan(1, "Squats", 0.0, 30.0), MusicCursor::new())
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].offset, 0.0);

        let (second, cursor) = scheduler
            .slices_for(&plan(2, "Rest", 30.0, 30.0), cursor)
            .unwrap();
        // 20s left on the track, then the playlist wraps to it again
        assert_eq!(second.len(), 2);
        assert!((second[0].offset - 30.0).abs() < 1e-9);
        assert!((second[0].duration - 20.0).abs() < 1e-9);
        assert_eq!(second[1].offset, 0.0);
        assert!((second[1].duration - 10.0).abs() < 1e-9);
        assert!((cursor.remaining - 40.0).abs() < 1e-9);
    }

    #[test]
    fn rules_force_their_track_once() {
        let mut config = BackgroundMusic::default();
        config.rules.push(MusicRule {
            name: None,
            triggers: vec!["type:finisher".to_string()],
            file: PathBuf::from("hype.mp3"),
        });
        let probe = probe(&[("a.mp3", 300.0), ("hype.mp3", 120.0)]);
        let mut scheduler = MusicScheduler::new(
            &config,
            MusicSource::Library(vec![PathBuf::from("a.mp3")]),
            &probe,
        );

        let (_, cursor) = scheduler
            .slices_for(&plan(1, "Squats", 0.0, 30.0), MusicCursor::new())
            .unwrap();
        let mut finisher = plan(2, "Sprint", 30.0, 20.0);
        finisher.kind = Some("finisher".to_string());
        let (slices, cursor) = scheduler.slices_for(&finisher, cursor).unwrap();
        assert_eq!(slices[0].file, PathBuf::from("hype.mp3"));
        assert_eq!(slices[0].offset, 0.0);

        // a second matching segment keeps playing rather than restarting
        let mut again = plan(3, "Sprint", 50.0, 20.0);
        again.kind = Some("finisher".to_string());
        let (slices, _) = scheduler.slices_for(&again, cursor).unwrap();
        assert!((slices[0].offset - 20.0).abs() < 1e-9);
    }

    #[test]
    fn playlist_shuffle_is_seeded() {
        let tracks: Vec<PathBuf> = (0..8).map(|i| PathBuf::from(format!("{i}.mp3"))).collect();
        assert_eq!(playlist_order(&tracks, 7, 0), playlist_order(&tracks, 7, 0));
        let mut sorted = playlist_order(&tracks, 7, 3);
        sorted.sort();
        assert_eq!(sorted, tracks);
    }

    #[test]
    fn library_scan_keeps_audio_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.MP3"), b"").unwrap();
        fs::write(dir.path().join("nested/a.flac"), b"").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"").unwrap();

        let tracks = scan_library(dir.path()).unwrap();
        assert_eq!(
            tracks,
            vec![dir.path().join("b.MP3"), dir.path().join("nested/a.flac")]
        );
    }
}
