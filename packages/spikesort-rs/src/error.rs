use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::GroupId;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("Sorting backend '{0}' is not installed")]
    BackendNotInstalled(String),

    #[error("Unknown sorting backend: {0}")]
    UnknownBackend(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Backend '{backend}' failed on channel group {group}: {cause}")]
    BackendExecution {
        backend: String,
        group: GroupId,
        cause: ExecutionCause,
    },

    #[error("Invalid output from backend '{backend}' for channel group {group}: {reason}")]
    Normalization {
        backend: String,
        group: GroupId,
        reason: String,
    },

    #[error("Invalid recording: {0}")]
    InvalidRecording(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SortError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, SortError::Configuration(_))
    }
}

/// Caller-supplied parameters are unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid parameter: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backend '{backend}' rejected configuration: {reason}")]
    Rejected { backend: String, reason: String },
}

/// Schema-level violation found before any backend runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown parameter '{name}' for backend '{backend}'")]
    UnknownParameter { backend: String, name: String },

    #[error("parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: String,
    },

    #[error("parameter '{name}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("parameter '{name}' = '{value}' is not one of {choices:?}")]
    InvalidChoice {
        name: String,
        value: String,
        choices: &'static [&'static str],
    },
}

/// Underlying reason a backend invocation failed.
#[derive(Error, Debug)]
pub enum ExecutionCause {
    #[error("backend is not installed")]
    NotInstalled,

    #[error("failed to launch backend process: {0}")]
    Spawn(std::io::Error),

    #[error("backend exited with status {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("expected output not found at {0}")]
    OutputMissing(PathBuf),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SortError>;
