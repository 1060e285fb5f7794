//! User-facing notices.
//!
//! Every failure the caller should see (validation, transport errors, late
//! results after a timeout) travels through one broadcast channel tagged with a
//! severity, instead of error values crossing component boundaries.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::batch::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

/// Cloneable sender side of the notice channel.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn notify(&self, severity: Severity, message: impl Into<String>, task_id: Option<TaskId>) {
        let message = message.into();
        match severity {
            Severity::Error => {
                tracing::error!(target: "genbatch.notice", task_id = ?task_id, "{}", message)
            }
            Severity::Warning => {
                tracing::warn!(target: "genbatch.notice", task_id = ?task_id, "{}", message)
            }
            Severity::Info => {
                tracing::info!(target: "genbatch.notice", task_id = ?task_id, "{}", message)
            }
        }
        // No receivers is fine; notices are best-effort.
        let _ = self.tx.send(Notice {
            severity,
            message,
            task_id,
        });
    }

    pub fn error(&self, message: impl Into<String>, task_id: Option<TaskId>) {
        self.notify(Severity::Error, message, task_id);
    }

    pub fn warning(&self, message: impl Into<String>, task_id: Option<TaskId>) {
        self.notify(Severity::Warning, message, task_id);
    }

    pub fn info(&self, message: impl Into<String>, task_id: Option<TaskId>) {
        self.notify(Severity::Info, message, task_id);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
