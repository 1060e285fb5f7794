use thiserror::Error;

use crate::notify::Severity;

/// Rejections raised before a batch run starts, or by scheduler bookkeeping.
///
/// Row numbers are 1-based grid rows; the header is row 1, so the first data
/// row is row 2.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("the input grid is empty")]
    EmptyGrid,

    #[error("header mismatch: expected [{expected}], found [{found}]")]
    HeaderMismatch { expected: String, found: String },

    #[error("the input contains no data rows")]
    NoDataRows,

    #[error("row {row} is empty")]
    EmptyRow { row: usize },

    #[error("row {row}: {name} exceeds the maximum length of {max_length}")]
    TooLong {
        row: usize,
        name: String,
        max_length: usize,
    },

    #[error("row {row}: {name} is required")]
    Required { row: usize, name: String },

    #[error("a previous batch still has unfinished tasks")]
    PreviousBatchRunning,

    #[error("unknown task id {0}")]
    UnknownTask(u32),
}

impl BatchError {
    pub fn severity(&self) -> Severity {
        match self {
            BatchError::PreviousBatchRunning => Severity::Info,
            _ => Severity::Error,
        }
    }
}
