use serde::Serialize;

use super::types::{TaskId, TaskStatus};

/// Progress feed published by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        run_id: String,
        total: usize,
        running: usize,
    },
    TaskStatusChanged {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    TaskPromoted {
        task_id: TaskId,
    },
    BatchCleared,
    RetryRequested {
        signal: u64,
    },
}
