use serde::{Deserialize, Serialize};

use crate::schema::Inputs;

/// 1-based row position of a task inside its batch.
pub type TaskId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct TaskParams {
    pub inputs: Inputs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub params: TaskParams,
}

impl Task {
    pub fn new(id: TaskId, status: TaskStatus, inputs: Inputs) -> Self {
        Self {
            id,
            status,
            params: TaskParams { inputs },
        }
    }
}
