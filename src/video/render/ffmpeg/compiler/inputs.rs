use std::path::{Path, PathBuf};

use super::util::format_time;

/// One `-i` input with the options that must precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub path: PathBuf,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InputList {
    inputs: Vec<InputSpec>,
}

impl InputList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input and return its ffmpeg index.
    pub fn add(&mut self, path: &Path, options: Vec<String>) -> usize {
        self.inputs.push(InputSpec {
            path: path.to_path_buf(),
            options,
        });
        self.inputs.len() - 1
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn input_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().into_owned());
        }
        args
    }
}

/// Input-side seek and length, so only the needed range is decoded.
pub fn range_options(start: f64, duration: f64) -> Vec<String> {
    let mut options = Vec::new();
    if start > 0.0 {
        options.push("-ss".to_string());
        options.push(format_time(start));
    }
    options.push("-t".to_string());
    options.push(format_time(duration));
    options
}

pub fn layout_options(layout: &str) -> Vec<String> {
    vec!["-ch_layout".to_string(), layout.to_string()]
}
