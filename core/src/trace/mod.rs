//! Execution trace of workflow-typed tasks.
//!
//! The trace is rebuilt by folding lifecycle events one at a time; each fold
//! yields a fresh snapshot so observers never see a half-applied update.

mod event;
mod fold;
mod types;

pub use event::WorkflowEvent;
pub use fold::{apply, fold, output_files, single_text_output, Folded, TraceOutcome, FILE_IDENTITY};
pub use types::{
    ExecutionMetadata, ExecutionTrace, NodeKey, NodeStatus, NodeTrace, TraceStatus,
    WorkflowFinished, WorkflowRunStatus,
};
