use serde_json::{Map, Value};

use super::event::WorkflowEvent;
use super::types::{
    ExecutionTrace, NodeKey, NodeStatus, NodeTrace, TraceStatus, WorkflowFinished,
    WorkflowRunStatus,
};

/// Marker the backend puts on file objects inside workflow outputs.
pub const FILE_IDENTITY: &str = "__dify__file__";

/// Terminal signal produced when the run finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOutcome {
    Succeeded { outputs: Option<Map<String, Value>> },
    Failed { error: String },
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Folded {
    pub trace: ExecutionTrace,
    pub outcome: Option<TraceOutcome>,
}

/// `(trace, event) -> trace`. The input snapshot is left untouched.
pub fn fold(trace: &ExecutionTrace, event: &WorkflowEvent) -> Folded {
    let mut next = trace.clone();
    let outcome = apply(&mut next, event);
    Folded {
        trace: next,
        outcome,
    }
}

/// In-place variant of [`fold`] for callers that own their snapshot.
pub fn apply(trace: &mut ExecutionTrace, event: &WorkflowEvent) -> Option<TraceOutcome> {
    match event {
        WorkflowEvent::WorkflowStarted {
            workflow_run_id,
            task_id,
        } => {
            *trace = ExecutionTrace {
                workflow_run_id: Some(workflow_run_id.clone()),
                task_id: Some(task_id.clone()),
                ..ExecutionTrace::default()
            };
            None
        }
        WorkflowEvent::NodeStarted(node) => {
            start_entry(trace, node, false);
            None
        }
        // Iterations and loops fold identically.
        WorkflowEvent::IterationStarted(node) | WorkflowEvent::LoopStarted(node) => {
            start_entry(trace, node, true);
            None
        }
        WorkflowEvent::IterationNext(node) | WorkflowEvent::LoopNext(node) => {
            next_pass(trace, node);
            None
        }
        WorkflowEvent::NodeFinished(node)
        | WorkflowEvent::IterationFinished(node)
        | WorkflowEvent::LoopFinished(node) => {
            finish_entry(trace, node);
            None
        }
        WorkflowEvent::NodeRetry(node) => {
            retry_entry(trace, node);
            None
        }
        WorkflowEvent::TextChunk { text } => {
            trace.result_text.push_str(text);
            None
        }
        WorkflowEvent::TextReplace { text } => {
            trace.result_text = text.clone();
            None
        }
        WorkflowEvent::WorkflowFinished(data) => Some(finish_workflow(trace, data)),
    }
}

fn start_entry(trace: &mut ExecutionTrace, node: &NodeTrace, grouping: bool) {
    let mut entry = node.clone();
    entry.status = NodeStatus::Running;
    if grouping {
        entry.details = Some(Vec::new());
    }

    match node.group_id() {
        // Body nodes go into the current pass of their grouping entry.
        Some(group_id) => {
            let Some(group) = find_group_mut(&mut trace.nodes, group_id) else {
                return;
            };
            let details = group.details.get_or_insert_with(Vec::new);
            if details.is_empty() {
                details.push(Vec::new());
            }
            if let Some(pass) = details.last_mut() {
                upsert(pass, entry);
            }
        }
        None => {
            entry.expand = true;
            upsert(&mut trace.nodes, entry);
        }
    }
    trace.expanded = true;
}

fn finish_entry(trace: &mut ExecutionTrace, node: &NodeTrace) {
    let seq = match node.group_id() {
        Some(group_id) => {
            let pass = find_group_mut(&mut trace.nodes, group_id)
                .and_then(|g| g.details.as_mut())
                .and_then(|d| d.last_mut());
            match pass {
                Some(pass) => pass,
                None => return,
            }
        }
        None => &mut trace.nodes,
    };

    let Some(pos) = seq.iter().rposition(|n| n.key() == node.key()) else {
        return;
    };

    let previous = std::mem::take(&mut seq[pos]);
    let mut entry = node.clone();
    if entry.extras.is_none() {
        entry.extras = previous.extras;
    }
    if entry.details.is_none() {
        entry.details = previous.details;
    }
    if entry.retry_detail.is_empty() {
        entry.retry_detail = previous.retry_detail;
    }
    entry.expand = entry.has_error();
    let errored = entry.expand;
    seq[pos] = entry;

    if errored {
        trace.expanded = true;
    }
}

fn next_pass(trace: &mut ExecutionTrace, node: &NodeTrace) {
    let key = node.key();
    if let Some(group) = find_mut(&mut trace.nodes, &|n: &NodeTrace| n.key() == key) {
        group.details.get_or_insert_with(Vec::new).push(Vec::new());
    }
}

fn retry_entry(trace: &mut ExecutionTrace, node: &NodeTrace) {
    let key = node.key();
    if let Some(entry) = find_mut(&mut trace.nodes, &|n: &NodeTrace| n.key() == key) {
        let mut attempt = node.clone();
        attempt.status = NodeStatus::Retry;
        entry.retry_detail.push(attempt);
    }
}

fn finish_workflow(trace: &mut ExecutionTrace, data: &WorkflowFinished) -> TraceOutcome {
    if data.status == WorkflowRunStatus::Stopped {
        trace.status = TraceStatus::Stopped;
        stop_live_nodes(&mut trace.nodes);
        return TraceOutcome::Stopped;
    }

    let error = data.error.as_deref().filter(|e| !e.is_empty());
    if error.is_some() || data.status == WorkflowRunStatus::Failed {
        trace.status = TraceStatus::Failed;
        stop_live_nodes(&mut trace.nodes);
        return TraceOutcome::Failed {
            error: error.unwrap_or("workflow run failed").to_string(),
        };
    }

    trace.status = TraceStatus::Succeeded;
    if let Some(outputs) = data.outputs.as_ref() {
        trace.files = output_files(outputs);
        if let Some(text) = single_text_output(outputs) {
            trace.result_text = text.to_string();
        }
    }
    TraceOutcome::Succeeded {
        outputs: data.outputs.clone(),
    }
}

/// Replace the entry with the same identity key, or append.
fn upsert(seq: &mut Vec<NodeTrace>, entry: NodeTrace) {
    let key: NodeKey<'_> = entry.key();
    match seq.iter().position(|n| n.key() == key) {
        Some(pos) => seq[pos] = entry,
        None => seq.push(entry),
    }
}

/// Depth-first search, latest entries first, descending into grouping passes.
fn find_mut<'a, F>(nodes: &'a mut [NodeTrace], pred: &F) -> Option<&'a mut NodeTrace>
where
    F: Fn(&NodeTrace) -> bool,
{
    if let Some(pos) = nodes.iter().rposition(pred) {
        return Some(&mut nodes[pos]);
    }
    for node in nodes.iter_mut().rev() {
        if let Some(details) = node.details.as_mut() {
            for pass in details.iter_mut().rev() {
                if let Some(found) = find_mut(pass, pred) {
                    return Some(found);
                }
            }
        }
    }
    None
}

fn find_group_mut<'a>(nodes: &'a mut [NodeTrace], group_id: &str) -> Option<&'a mut NodeTrace> {
    find_mut(nodes, &|n: &NodeTrace| {
        n.node_id == group_id && n.details.is_some()
    })
}

fn stop_live_nodes(nodes: &mut [NodeTrace]) {
    for node in nodes.iter_mut() {
        if node.status.is_live() {
            node.status = NodeStatus::Stopped;
        }
        if let Some(details) = node.details.as_mut() {
            for pass in details.iter_mut() {
                stop_live_nodes(pass);
            }
        }
        stop_live_nodes(&mut node.retry_detail);
    }
}

/// The text of a workflow with exactly one string-valued output.
pub fn single_text_output(outputs: &Map<String, Value>) -> Option<&str> {
    if outputs.len() != 1 {
        return None;
    }
    outputs.values().next().and_then(Value::as_str)
}

fn is_file_object(value: &Value) -> bool {
    value
        .get("dify_model_identity")
        .and_then(Value::as_str)
        .is_some_and(|id| id == FILE_IDENTITY)
}

/// File objects found among the output values (single or in lists).
pub fn output_files(outputs: &Map<String, Value>) -> Vec<Value> {
    let mut files = Vec::new();
    for value in outputs.values() {
        match value {
            Value::Array(items) => {
                files.extend(items.iter().filter(|v| is_file_object(v)).cloned());
            }
            v if is_file_object(v) => files.push(v.clone()),
            _ => {}
        }
    }
    files
}
