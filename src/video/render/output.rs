use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::error::PipelineError;
use crate::video::config::PathsConfig;

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => std::path::absolute(a).ok() == std::path::absolute(b).ok(),
    }
}

pub(super) fn prepare_output_destination(output_path: &Path, source_video: &Path) -> Result<()> {
    if same_file(output_path, source_video) {
        return Err(PipelineError::Config(format!(
            "output path {} would overwrite the source video",
            output_path.display()
        ))
        .into());
    }

    if output_path.is_dir() {
        return Err(PipelineError::Config(format!(
            "output path {} is a directory",
            output_path.display()
        ))
        .into());
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }

    Ok(())
}

/// `paths.segment_cache_dir`, else `.<output stem>.segments/` beside the output.
pub(super) fn resolve_cache_dir(paths: &PathsConfig, output_path: &Path) -> Result<PathBuf> {
    if let Some(dir) = &paths.segment_cache_dir {
        return Ok(dir.clone());
    }
    let stem = output_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("Output path {} has no valid file name", output_path.display()))?;
    let parent = match output_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(parent.join(format!(".{stem}.segments")))
}
