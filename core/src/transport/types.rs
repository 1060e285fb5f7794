use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How an attached file reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    LocalFile,
    RemoteUrl,
}

/// An attachment sent alongside the inputs (e.g. images for vision models).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    #[serde(rename = "type", default = "default_file_type")]
    pub file_type: String,
    pub transfer_method: TransferMethod,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_file_id: Option<String>,
}

fn default_file_type() -> String {
    "image".to_string()
}

impl AttachedFile {
    /// A local file is still uploading until the backend has assigned an id.
    pub fn is_uploading(&self) -> bool {
        self.transfer_method == TransferMethod::LocalFile && self.upload_file_id.is_none()
    }

    /// Wire form: local files are referenced by upload id only.
    pub fn for_transport(&self) -> Self {
        let mut out = self.clone();
        if out.transfer_method == TransferMethod::LocalFile {
            out.url.clear();
        }
        out
    }
}

/// Body of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RequestPayload {
    pub inputs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<AttachedFile>>,
}

/// Streamed events of a plain completion request.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    Data {
        chunk: String,
        is_first: bool,
        message_id: Option<String>,
        task_id: Option<String>,
    },
    MessageReplace {
        answer: String,
    },
    Completed,
    Error {
        message: String,
    },
}

impl CompletionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionEvent::Completed | CompletionEvent::Error { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Like,
    Dislike,
}

/// Rating recorded against a finished message; `rating: None` clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Feedback {
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}
