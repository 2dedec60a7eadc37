use thiserror::Error;

/// Non-zero exit of the external engine, with its diagnostic stream verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}{}", exit_status(.exit_code), diagnostic_suffix(.diagnostic))]
pub struct EngineFailure {
    pub exit_code: Option<i32>,
    pub diagnostic: String,
}

impl EngineFailure {
    pub fn new(exit_code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("ffmpeg exited with status {code}"),
        None => "ffmpeg did not exit normally".to_string(),
    }
}

fn diagnostic_suffix(diagnostic: &str) -> String {
    let diagnostic = diagnostic.trim();
    if diagnostic.is_empty() {
        String::new()
    } else {
        format!(":\n{diagnostic}")
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot probe {path}: {message}")]
    Probe { path: String, message: String },

    #[error("segment {index} ('{name}') failed to render\ncommand: {command}\n{failure}")]
    Render {
        index: usize,
        name: String,
        command: String,
        failure: EngineFailure,
    },

    #[error("assembly failed: {0}")]
    Assembly(String),
}

impl PipelineError {
    pub fn probe(path: &std::path::Path, message: impl Into<String>) -> Self {
        PipelineError::Probe {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_surfaces_diagnostic_verbatim() {
        let err = PipelineError::Render {
            index: 2,
            name: "Squats".to_string(),
            command: "ffmpeg -i in.mp4 out.mp4".to_string(),
            failure: EngineFailure::new(Some(1), "No such filter: 'scale_cuda'\n"),
        };
        let text = err.to_string();
        assert!(text.contains("segment 2 ('Squats')"));
        assert!(text.contains("ffmpeg exited with status 1"));
        assert!(text.contains("No such filter: 'scale_cuda'"));
        assert!(text.contains("command: ffmpeg -i in.mp4 out.mp4"));
    }

    #[test]
    fn missing_exit_code_is_reported_plainly() {
        let failure = EngineFailure::new(None, "");
        assert_eq!(failure.to_string(), "ffmpeg did not exit normally");
    }

    #[test]
    fn engine_failure_is_a_std_error() {
        let failure = EngineFailure::new(Some(234), "  Invalid argument\n");
        let err: &dyn std::error::Error = &failure;
        assert_eq!(err.to_string(), "ffmpeg exited with status 234:\nInvalid argument");
        assert!(err.source().is_none());
    }
}
