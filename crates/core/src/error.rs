use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Result alias that carries the custom [`ControllerError`] type.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Free-form failure that does not fit one of the structured variants.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The settings document could not be encoded or decoded.
    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),
    /// An external command-line collaborator failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// No per-user configuration directory could be resolved.
    #[error("unable to determine the user configuration directory")]
    NoConfigDir,
    /// A file held content that does not describe a valid record.
    #[error("invalid contents in {path}: {reason}")]
    InvalidRecord { path: PathBuf, reason: String },
}

impl ControllerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for ControllerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ControllerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Failure of a single external tool invocation.
///
/// Public component contracts collapse every variant into `false`, `None` or
/// a fallback value; the variants exist so the reason survives into the logs.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("`{program}` was not found on PATH")]
    NotFound { program: String },
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{program}` produced unusable output: {reason}")]
    BadOutput { program: String, reason: String },
}

impl ToolError {
    pub fn bad_output(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadOutput {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Spawn { .. } => "spawn",
            Self::TimedOut { .. } => "timeout",
            Self::Failed { .. } => "failed",
            Self::BadOutput { .. } => "bad_output",
        }
    }
}
