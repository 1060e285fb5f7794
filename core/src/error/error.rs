use thiserror::Error;

use super::batch::BatchError;

/// Top-level error for the `genbatch` binary.
#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid batch input: {0}")]
    Batch(#[from] BatchError),
    #[error("{failed} of {total} tasks failed")]
    TasksFailed { failed: usize, total: usize },
    #[error("command failed: {0}")]
    Command(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        // 0: success
        // 11: config error
        // 12: batch validation / precondition
        // 20: io error
        // 30: one or more tasks failed
        // 50: internal/uncategorized
        match self {
            CliError::Config(_) => 11,
            CliError::Batch(_) => 12,
            CliError::Io(_) | CliError::Command(_) => 20,
            CliError::TasksFailed { .. } => 30,
            CliError::Anyhow(_) => 50,
        }
    }
}
