//! Views derived from the task list. Nothing here is stored.

use std::collections::HashMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::types::{Task, TaskId, TaskStatus};
use crate::schema::{display_value, PromptVariable};
use crate::session::CompletionPayload;

pub fn non_pending(tasks: &[Task]) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Pending)
        .collect()
}

pub fn running(tasks: &[Task]) -> Vec<&Task> {
    with_status(tasks, TaskStatus::Running)
}

pub fn succeeded(tasks: &[Task]) -> Vec<&Task> {
    with_status(tasks, TaskStatus::Completed)
}

pub fn failed(tasks: &[Task]) -> Vec<&Task> {
    with_status(tasks, TaskStatus::Failed)
}

/// Every task reached a terminal state. Vacuously true for no tasks.
pub fn all_tasks_run(tasks: &[Task]) -> bool {
    tasks.iter().all(|t| t.status.is_terminal())
}

fn with_status(tasks: &[Task], status: TaskStatus) -> Vec<&Task> {
    tasks.iter().filter(|t| t.status == status).collect()
}

/// One export row: schema-named input columns followed by the result column.
///
/// Column order is preserved when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportRow(pub Vec<(String, String)>);

impl ExportRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }
}

impl Serialize for ExportRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

pub fn export_rows(
    tasks: &[Task],
    schema: &[PromptVariable],
    results: &HashMap<TaskId, CompletionPayload>,
    result_column: &str,
) -> Vec<ExportRow> {
    tasks
        .iter()
        .map(|task| {
            let mut cells: Vec<(String, String)> = schema
                .iter()
                .map(|var| {
                    let value = task.params.inputs.get(&var.key).and_then(Option::as_ref);
                    (var.name.clone(), display_value(value))
                })
                .collect();
            let result = results
                .get(&task.id)
                .map(CompletionPayload::to_export_string)
                .unwrap_or_default();
            cells.push((result_column.to_string(), result));
            ExportRow(cells)
        })
        .collect()
}
