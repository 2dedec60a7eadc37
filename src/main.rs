mod common;
mod ui;
mod video;

use std::io::IsTerminal;

use clap::Parser;

use crate::ui::prelude::*;
use crate::video::cli::RenderArgs;
use crate::video::render::error::PipelineError;

/// Cut an exercise routine video out of one raw recording
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    render: RenderArgs,

    /// Echo every ffmpeg command, raw ffmpeg output and stage timings
    #[arg(short, long)]
    verbose: bool,

    /// Emit one JSON object per event instead of colored text
    #[arg(long)]
    json: bool,
}

fn error_code(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Config(_)) => "error.config",
        Some(PipelineError::Probe { .. }) => "error.probe",
        Some(PipelineError::Render { .. }) => "error.render",
        Some(PipelineError::Assembly(_)) => "error.assembly",
        None => "error",
    }
}

fn main() {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    ui::init(format, std::io::stderr().is_terminal());
    ui::set_verbose_mode(cli.verbose);

    if let Err(err) = video::render::handle_render(&cli.render) {
        emit(Level::Error, error_code(&err), &format!("{err:#}"), None);
        std::process::exit(1);
    }
}
