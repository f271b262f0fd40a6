use serde::Serialize;
use thiserror::Error;

/// Stable error codes reported to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_FAILED")]
    ValidationFailed,
    #[serde(rename = "FILE_READ_FAILED")]
    FileReadFailed,
    #[serde(rename = "FILE_WRITE_FAILED")]
    FileWriteFailed,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::FileReadFailed => "FILE_READ_FAILED",
            Self::FileWriteFailed => "FILE_WRITE_FAILED",
        }
    }
}

/// Errors that can occur during tabular operations.
#[derive(Debug, Error)]
pub enum TabularError {
    /// Malformed input, disallowed query shape, unknown column, or sandbox violation.
    #[error("{0}")]
    Validation(String),

    /// Source missing, encoding undetectable, ingestion, query, or timeout failure.
    #[error("{0}")]
    ReadFailed(String),

    /// Export or round-trip failure.
    #[error("{0}")]
    WriteFailed(String),
}

impl TabularError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::ReadFailed(message.into())
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed(message.into())
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::ReadFailed(_) => ErrorCode::FileReadFailed,
            Self::WriteFailed(_) => ErrorCode::FileWriteFailed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(message) | Self::ReadFailed(message) | Self::WriteFailed(message) => {
                message
            }
        }
    }
}
