use super::types::{NodeTrace, WorkflowFinished};

/// Lifecycle events of a workflow run, as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_run_id: String,
        task_id: String,
    },
    NodeStarted(NodeTrace),
    NodeRetry(NodeTrace),
    NodeFinished(NodeTrace),
    IterationStarted(NodeTrace),
    IterationNext(NodeTrace),
    IterationFinished(NodeTrace),
    LoopStarted(NodeTrace),
    LoopNext(NodeTrace),
    LoopFinished(NodeTrace),
    TextChunk {
        text: String,
    },
    TextReplace {
        text: String,
    },
    WorkflowFinished(WorkflowFinished),
}

impl WorkflowEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowEvent::WorkflowFinished(_))
    }

    /// Remote task id carried by this event, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::WorkflowStarted { task_id, .. } if !task_id.is_empty() => Some(task_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::NodeStarted(_) => "node_started",
            WorkflowEvent::NodeRetry(_) => "node_retry",
            WorkflowEvent::NodeFinished(_) => "node_finished",
            WorkflowEvent::IterationStarted(_) => "iteration_started",
            WorkflowEvent::IterationNext(_) => "iteration_next",
            WorkflowEvent::IterationFinished(_) => "iteration_completed",
            WorkflowEvent::LoopStarted(_) => "loop_started",
            WorkflowEvent::LoopNext(_) => "loop_next",
            WorkflowEvent::LoopFinished(_) => "loop_completed",
            WorkflowEvent::TextChunk { .. } => "text_chunk",
            WorkflowEvent::TextReplace { .. } => "text_replace",
            WorkflowEvent::WorkflowFinished(_) => "workflow_finished",
        }
    }
}
