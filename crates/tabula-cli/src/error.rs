use tabula_warehouse::{ErrorCode, TabularError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Tabular(#[from] TabularError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Tabular(error) => Self::tabular_exit_code(error),
            Self::Serialization(_) => 10,
            Self::Io(_) => 10,
        }
    }

    pub const fn tabular_exit_code(error: &TabularError) -> u8 {
        match error.code() {
            ErrorCode::ValidationFailed => 2,
            ErrorCode::FileReadFailed => 3,
            ErrorCode::FileWriteFailed => 4,
        }
    }
}
