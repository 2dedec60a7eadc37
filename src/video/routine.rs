//! Routine file loading.
//!
//! A routine is an ordered YAML list of named, timed segments. Ordering
//! defines the timeline; nothing here mutates entries after loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::render::error::PipelineError;

const DEFAULT_ENTRY_NAME: &str = "Unnamed Exercise";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutineEntry {
    #[serde(default = "default_entry_name")]
    pub name: String,
    /// Segment length in seconds
    pub length: f64,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub replace_video: Option<PathBuf>,
    #[serde(default)]
    pub replace_audio: Option<PathBuf>,
}

fn default_entry_name() -> String {
    DEFAULT_ENTRY_NAME.to_string()
}

impl RoutineEntry {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, length: f64) -> Self {
        Self {
            name: name.into(),
            length,
            kind: None,
            replace_video: None,
            replace_audio: None,
        }
    }

    /// Audio override: explicit `replace_audio`, else the replacement clip's own sound.
    pub fn audio_override(&self) -> Option<&Path> {
        self.replace_audio
            .as_deref()
            .or(self.replace_video.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Routine {
    pub entries: Vec<RoutineEntry>,
}

impl Routine {
    #[cfg(test)]
    pub fn new(entries: Vec<RoutineEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read routine file {}: {e}", path.display()))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&contents, base_dir)
            .with_context(|| format!("loading routine {}", path.display()))
    }

    /// Parse routine YAML, resolving relative override paths against `base_dir`.
    pub fn parse(contents: &str, base_dir: &Path) -> Result<Self> {
        let mut entries: Vec<RoutineEntry> = serde_yaml::from_str(contents)
            .map_err(|e| PipelineError::Config(format!("routine is not a list of segments: {e}")))?;

        if entries.is_empty() {
            return Err(PipelineError::Config("routine contains no segments".to_string()).into());
        }

        for (idx, entry) in entries.iter_mut().enumerate() {
            if !entry.length.is_finite() || entry.length <= 0.0 {
                return Err(PipelineError::Config(format!(
                    "segment {} ('{}') has non-positive length {}",
                    idx + 1,
                    entry.name,
                    entry.length
                ))
                .into());
            }
            entry.replace_video = entry.replace_video.take().map(|p| resolve_relative(base_dir, p));
            entry.replace_audio = entry.replace_audio.take().map(|p| resolve_relative(base_dir, p));
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn total_length(&self) -> f64 {
        self.entries.iter().map(|e| e.length).sum()
    }
}

fn resolve_relative(base_dir: &Path, path: PathBuf) -> PathBuf {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
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
    fn parses_entries_in_order_with_optional_fields() {
        let yaml = r#"
- name: intro
  length: 5
  replace_video: hook.mp4
- name: push ups
  length: 30.5
  type: work
- length: 10
"#;
        let routine = Routine::parse(yaml, Path::new("/routines")).unwrap();
        assert_eq!(routine.len(), 3);
        assert_eq!(routine.entries[0].name, "intro");
        assert_eq!(
            routine.entries[0].replace_video,
            Some(PathBuf::from("/routines/hook.mp4"))
        );
        assert_eq!(routine.entries[1].kind.as_deref(), Some("work"));
        assert_eq!(routine.entries[2].name, DEFAULT_ENTRY_NAME);
        assert!((routine.total_length() - 45.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_length() {
        let yaml = "- name: a\n  length: 0\n";
        let err = Routine::parse(yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("non-positive length"));
        let err = err.downcast::<PipelineError>().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn unreadable_routine_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("routine.yaml");

        let err = Routine::load(&missing).unwrap_err();
        assert!(err.to_string().contains("routine.yaml"));
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));

        let err = Routine::load(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }

    #[test]
    fn rejects_non_list_documents() {
        let err = Routine::parse("name: a\nlength: 3\n", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("not a list"));
    }

    #[test]
    fn audio_override_falls_back_to_replacement_video() {
        let mut entry = RoutineEntry::new("intro", 3.0);
        assert!(entry.audio_override().is_none());
        entry.replace_video = Some(PathBuf::from("hook.mp4"));
        assert_eq!(entry.audio_override(), Some(Path::new("hook.mp4")));
        entry.replace_audio = Some(PathBuf::from("voice.wav"));
        assert_eq!(entry.audio_override(), Some(Path::new("voice.wav")));
    }
}
