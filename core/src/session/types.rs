use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::batch::TaskId;
use crate::config::GENERATION_TIMEOUT_MS;
use crate::trace::ExecutionTrace;
use crate::transport::Feedback;

/// Where one send currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    TimedOut,
    Aborted,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionPhase::Completed
                | SessionPhase::Failed
                | SessionPhase::TimedOut
                | SessionPhase::Aborted
        )
    }
}

/// Run-control view of a session, republished on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub is_responding: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ExecutionTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub is_stopping: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

/// Raw result handed back to the owner of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CompletionPayload {
    Text(String),
    Structured(Value),
}

impl CompletionPayload {
    /// Export form: text as-is, structured payloads as compact JSON.
    pub fn to_export_string(&self) -> String {
        match self {
            CompletionPayload::Text(text) => text.clone(),
            CompletionPayload::Structured(value) => value.to_string(),
        }
    }
}

impl Default for CompletionPayload {
    fn default() -> Self {
        CompletionPayload::Text(String::new())
    }
}

impl From<&str> for CompletionPayload {
    fn from(text: &str) -> Self {
        CompletionPayload::Text(text.to_string())
    }
}

/// The one completion report of a send.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub payload: CompletionPayload,
    pub task_id: Option<TaskId>,
    pub success: bool,
    pub phase: SessionPhase,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Speak the workflow protocol instead of plain completion.
    pub workflow: bool,
    /// Inputs were validated by the scheduler; skip per-send checks.
    pub batch_mode: bool,
    pub task_id: Option<TaskId>,
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            workflow: false,
            batch_mode: false,
            task_id: None,
            timeout: Duration::from_millis(GENERATION_TIMEOUT_MS),
        }
    }
}

impl SessionOptions {
    pub fn workflow(mut self, workflow: bool) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn batch_task(mut self, task_id: TaskId) -> Self {
        self.batch_mode = true;
        self.task_id = Some(task_id);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
