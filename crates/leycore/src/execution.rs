use crate::{Edge, ErrorKind, NodeError, NodeId, NodeSpec, Value, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle of a whole run.
///
/// `Paused` is part of the public model but no engine transition reaches it:
/// step mode and breakpoints are reported, not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeExecutionStatus::Completed
                | NodeExecutionStatus::Failed
                | NodeExecutionStatus::Skipped
        )
    }
}

/// A recorded failure, either against a node or against the run itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionError {
    pub id: String,
    pub node_id: NodeId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Node id used for run-level errors.
pub const SYSTEM_NODE_ID: &str = "system";

impl ExecutionError {
    pub fn for_node(node_id: &str, error: &NodeError) -> Self {
        Self {
            id: format!("{}_error", node_id),
            node_id: node_id.to_string(),
            message: error.to_string(),
            kind: error.kind(),
            timestamp: Utc::now(),
            context: None,
        }
    }

    pub fn system(execution_id: ExecutionId, message: impl Into<String>) -> Self {
        Self {
            id: format!("{}_fatal", execution_id),
            node_id: SYSTEM_NODE_ID.to_string(),
            message: message.into(),
            kind: ErrorKind::RuntimeError,
            timestamp: Utc::now(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<Value>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub total_nodes: usize,
    pub executed_nodes: usize,
    pub failed_nodes: usize,
    pub skipped_nodes: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Mutable state of one run. Owned by the engine's coordinating loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
    pub start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub variables: HashMap<String, Value>,
    pub outputs: BTreeMap<String, Value>,
    pub errors: Vec<ExecutionError>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionContext {
    pub fn new(
        workflow_id: impl Into<WorkflowId>,
        execution_id: ExecutionId,
        nodes: Vec<NodeSpec>,
        edges: Vec<Edge>,
        variables: HashMap<String, Value>,
    ) -> Self {
        let metadata = ExecutionMetadata {
            total_nodes: nodes.len(),
            ..ExecutionMetadata::default()
        };
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            nodes,
            edges,
            start_time: Utc::now(),
            status: ExecutionStatus::Pending,
            variables,
            outputs: BTreeMap::new(),
            errors: Vec::new(),
            metadata,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }
}

/// Per-node progress within one run.
///
/// Transitions are guarded: PENDING → RUNNING → {COMPLETED | FAILED},
/// PENDING → SKIPPED. Terminal states never change again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionState {
    pub node_id: NodeId,
    pub status: NodeExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl NodeExecutionState {
    pub fn pending(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeExecutionStatus::Pending,
            input: None,
            output: None,
            error: None,
            start_time: None,
            end_time: None,
            duration_ms: None,
        }
    }

    pub fn start(&mut self) -> bool {
        if self.status != NodeExecutionStatus::Pending {
            return false;
        }
        self.status = NodeExecutionStatus::Running;
        self.start_time = Some(Utc::now());
        true
    }

    pub fn complete(&mut self, input: Value, output: Value) -> bool {
        if self.status != NodeExecutionStatus::Running {
            return false;
        }
        self.status = NodeExecutionStatus::Completed;
        self.input = Some(input);
        self.output = Some(output);
        self.finish();
        true
    }

    pub fn fail(&mut self, input: Option<Value>, error: ExecutionError) -> bool {
        if self.status != NodeExecutionStatus::Running {
            return false;
        }
        self.status = NodeExecutionStatus::Failed;
        self.input = input;
        self.error = Some(error);
        self.finish();
        true
    }

    pub fn skip(&mut self) -> bool {
        if self.status != NodeExecutionStatus::Pending {
            return false;
        }
        self.status = NodeExecutionStatus::Skipped;
        true
    }

    fn finish(&mut self) {
        let end = Utc::now();
        self.duration_ms = self
            .start_time
            .map(|start| (end - start).num_milliseconds().max(0) as u64);
        self.end_time = Some(end);
    }
}

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionOptions {
    /// Per-call timeout in milliseconds; overrides executor and engine defaults.
    #[serde(rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub debug: bool,
    pub step_mode: bool,
    pub breakpoints: Vec<NodeId>,
    pub variables: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_breakpoint(mut self, node_id: impl Into<NodeId>) -> Self {
        self.breakpoints.push(node_id.into());
        self
    }

    pub fn with_step_mode(mut self, step_mode: bool) -> Self {
        self.step_mode = step_mode;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<WorkflowId>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Explicit id, then `variables.workflowId`, then `"unnamed"`.
    pub fn resolve_workflow_id(&self) -> WorkflowId {
        self.workflow_id
            .clone()
            .or_else(|| {
                self.variables
                    .get("workflowId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unnamed".to_string())
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub context: ExecutionContext,
    pub node_states: HashMap<NodeId, NodeExecutionState>,
    pub final_outputs: BTreeMap<String, Value>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn node_status(&self, node_id: &str) -> Option<NodeExecutionStatus> {
        self.node_states.get(node_id).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_state_rejects_transitions_out_of_terminal() {
        let mut state = NodeExecutionState::pending("a");
        assert!(state.start());
        assert!(state.complete(Value::Null, Value::from(1i64)));
        assert!(!state.fail(None, ExecutionError::for_node("a", &NodeError::Cancelled)));
        assert!(!state.skip());
        assert_eq!(state.status, NodeExecutionStatus::Completed);
    }

    #[test]
    fn skip_only_from_pending() {
        let mut state = NodeExecutionState::pending("a");
        state.start();
        assert!(!state.skip());
    }

    #[test]
    fn workflow_id_resolution_order() {
        let options = ExecutionOptions::new().with_variable("workflowId", "from-vars");
        assert_eq!(options.resolve_workflow_id(), "from-vars");
        assert_eq!(
            options.clone().with_workflow_id("explicit").resolve_workflow_id(),
            "explicit"
        );
        assert_eq!(ExecutionOptions::new().resolve_workflow_id(), "unnamed");
    }

    #[test]
    fn options_accept_authoring_layer_keys() {
        let options: ExecutionOptions = serde_json::from_str(
            r#"{"timeout": 500, "stepMode": true, "breakpoints": ["b"], "variables": {"x": 1}}"#,
        )
        .unwrap();
        assert_eq!(options.timeout_ms, Some(500));
        assert!(options.step_mode);
        assert_eq!(options.breakpoints, vec!["b".to_string()]);
        assert_eq!(options.variables.get("x"), Some(&Value::from(1i64)));
    }
}
