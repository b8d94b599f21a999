use std::path::PathBuf;
use thiserror::Error;

/// Error kinds surfaced at stage boundaries. None of these unwind the
/// engine; the pipeline records them and keeps executing independent stages.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("path escapes run root: {}", path.display())]
    PathEscape { path: PathBuf },

    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),

    #[error("tool not installed: {0}")]
    ToolMissing(String),

    #[error("circuit open for {host}")]
    CircuitOpen { host: String },

    #[error("runner error: {0}")]
    Runner(String),

    #[error("unparseable tool output: {0}")]
    Parse(String),

    #[error("resume rejected: {0}")]
    ResumeMismatch(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// True for the conditions that abort the whole run rather than a
    /// single stage.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::PathEscape { .. } | EngineError::ResumeMismatch(_))
    }
}
