use clap::{Args, ValueHint};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Routine file: a YAML list of named, timed segments
    #[arg(value_hint = ValueHint::FilePath)]
    pub routine_file: PathBuf,

    /// Raw recording the routine is cut from
    #[arg(value_hint = ValueHint::FilePath)]
    pub source_video: PathBuf,

    /// Where the finished video is written
    #[arg(value_hint = ValueHint::FilePath)]
    pub output_video: PathBuf,

    /// Only render these 1-based segments, e.g. `2` or `1,3,5-7`
    #[arg(long, value_name = "LIST")]
    pub segments: Option<String>,

    /// Offset of the routine's first segment in the source video
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0, allow_hyphen_values = true)]
    pub start: f64,

    /// Nothing past this point of the source video is used
    #[arg(long, value_name = "SECONDS", allow_hyphen_values = true)]
    pub end: Option<f64>,

    /// Fast low-quality preview using `test_mode_settings`
    #[arg(long)]
    pub test: bool,

    /// Re-render every selected segment even when a cached artifact matches
    #[arg(long)]
    pub force_render: bool,

    /// Style configuration (YAML, or TOML by extension); defaults to ./config.yaml
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Pre-mixed background music bed, read at each segment's routine position
    #[arg(long, value_name = "AUDIO", value_hint = ValueHint::FilePath)]
    pub bgm: Option<PathBuf>,
}
