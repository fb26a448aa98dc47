use std::path::PathBuf;
use thiserror::Error;

use crate::image_set::ImageRole;

/// Convenient result type for `smartprog-lib`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),

    #[cfg(feature = "raspberry")]
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("missing image: no {role} file ending with `{suffix}` in {}", .dir.display())]
    MissingImage {
        role: ImageRole,
        suffix: String,
        dir: PathBuf,
    },

    #[error("ambiguous image: {role} suffix `{suffix}` matches {}", .candidates.join(", "))]
    AmbiguousImage {
        role: ImageRole,
        suffix: String,
        candidates: Vec<String>,
    },

    #[error("firmware version directory not found: {}", .0.display())]
    VersionNotFound(PathBuf),

    #[error("`{tool}` failed with {}", exit_code_text(.code))]
    ToolFailed { tool: String, code: Option<i32> },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timeout while {0}")]
    Timeout(String),

    #[error("a flash attempt is already in progress")]
    Busy,
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// True when the error was raised before any device communication.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::MissingImage { .. } | Self::AmbiguousImage { .. } | Self::VersionNotFound(_)
        )
    }
}
