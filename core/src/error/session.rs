use thiserror::Error;

use crate::notify::Severity;

/// Reasons a send is refused or ends without a result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("please wait for the current response to finish")]
    AlreadyResponding,

    #[error("{name} is required")]
    MissingRequired { name: String },

    #[error("please wait for the file upload to finish")]
    FilesUploading,

    #[error("{0}")]
    Transport(String),

    #[error("stream closed before a terminal event")]
    StreamClosed,

    #[error("no message to attach feedback to")]
    NoMessage,
}

impl SessionError {
    pub fn severity(&self) -> Severity {
        match self {
            SessionError::AlreadyResponding | SessionError::FilesUploading => Severity::Info,
            SessionError::NoMessage => Severity::Warning,
            _ => Severity::Error,
        }
    }
}
