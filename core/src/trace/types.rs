use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Overall state of one workflow execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    NotStart,
    Waiting,
    #[default]
    Running,
    Succeeded,
    Failed,
    Exception,
    Stopped,
    Retry,
    #[serde(other)]
    Unknown,
}

impl NodeStatus {
    pub fn is_error(self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Exception)
    }

    /// Still holding work that a stop must interrupt.
    pub fn is_live(self) -> bool {
        matches!(self, NodeStatus::Running | NodeStatus::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_start_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
}

/// Identity of a node occurrence inside one sequence of the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey<'a> {
    pub node_id: &'a str,
    pub parallel_id: Option<&'a str>,
}

/// One node occurrence; also the payload of node and grouping events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeTrace {
    #[serde(default)]
    pub id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_node_id: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_metadata: Option<ExecutionMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Value>,

    /// UI hint: render this entry opened.
    #[serde(default)]
    pub expand: bool,
    /// Grouping entries only: one inner sequence per iteration/loop pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<Vec<NodeTrace>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_detail: Vec<NodeTrace>,
}

impl NodeTrace {
    pub fn new(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            id: node_id.clone(),
            node_id,
            ..Default::default()
        }
    }

    pub fn parallel_id(&self) -> Option<&str> {
        self.execution_metadata
            .as_ref()
            .and_then(|m| m.parallel_id.as_deref())
    }

    pub fn key(&self) -> NodeKey<'_> {
        NodeKey {
            node_id: &self.node_id,
            parallel_id: self.parallel_id(),
        }
    }

    /// Id of the iteration or loop whose body this occurrence belongs to.
    pub fn group_id(&self) -> Option<&str> {
        let meta = self.execution_metadata.as_ref();
        self.iteration_id
            .as_deref()
            .or(self.loop_id.as_deref())
            .or_else(|| meta.and_then(|m| m.iteration_id.as_deref()))
            .or_else(|| meta.and_then(|m| m.loop_id.as_deref()))
    }

    pub fn has_error(&self) -> bool {
        self.status.is_error() || self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Incrementally built execution tree of a workflow-typed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionTrace {
    pub status: TraceStatus,
    pub nodes: Vec<NodeTrace>,
    pub result_text: String,
    pub expanded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowRunStatus {
    Running,
    Succeeded,
    Failed,
    Stopped,
    PartialSucceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFinished {
    pub status: WorkflowRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
}
