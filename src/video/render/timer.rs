use std::path::{Path, PathBuf};

use serde_json::json;

use super::logging::log_event_with;
use super::plan::SegmentPlan;
use crate::ui::prelude::Level;
use crate::video::config::{PathsConfig, ProgressRing};

/// Timer assets are keyed by whole seconds.
pub fn timer_seconds(duration: f64) -> u32 {
    duration.max(0.0).trunc() as u32
}

/// Locate the pre-rendered countdown for a segment. A missing asset only
/// drops the overlay.
pub fn locate_timer(paths: &PathsConfig, ring: &ProgressRing, plan: &SegmentPlan) -> Option<PathBuf> {
    if !ring.enabled {
        return None;
    }
    let seconds = timer_seconds(plan.timer_duration);
    let asset = paths.timer_asset(seconds);
    if asset_exists(&asset) {
        return Some(asset);
    }

    log_event_with(
        Level::Warn,
        "render.timer.missing",
        format!(
            "Timer asset {} not found; segment {} ('{}') renders without a countdown",
            asset.display(),
            plan.index,
            plan.title
        ),
        json!({ "segment": plan.index, "seconds": seconds, "path": asset.display().to_string() }),
    );
    None
}

fn asset_exists(path: &Path) -> bool {
    path.is_file()
}
