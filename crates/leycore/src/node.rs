use crate::{ExecutionId, NodeError, NodeId, NodeSpec, Value, WorkflowId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Inputs gathered for one node, keyed by target handle name.
pub type NodeInputs = HashMap<String, Value>;

/// Behavior bound to one node type.
///
/// Executors are stateless: everything a call needs arrives through the node,
/// its inputs and the [`NodeContext`]. The only side channel is
/// [`NodeContext::outputs`], reserved for sink-type executors.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Node type discriminator (e.g. "input", "transform")
    fn node_type(&self) -> &str;

    /// Turn inputs into one output value
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: NodeInputs,
        ctx: &NodeContext,
    ) -> Result<Value, NodeError>;

    /// Optional: pre-check run before `execute`; an error fails the node
    fn validate(&self, _node: &NodeSpec) -> Result<(), NodeError> {
        Ok(())
    }

    /// Optional: executor-declared timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

/// Read-only view of the run handed to an executor call.
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,

    /// Seed values supplied with the run
    pub variables: Arc<HashMap<String, Value>>,

    /// Named results channel for sink nodes
    pub outputs: OutputSink,

    /// Fires when the run is cancelled
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(execution_id: ExecutionId, workflow_id: impl Into<WorkflowId>, node_id: impl Into<NodeId>) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            node_id: node_id.into(),
            variables: Arc::new(HashMap::new()),
            outputs: OutputSink::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_variables(mut self, variables: Arc<HashMap<String, Value>>) -> Self {
        self.variables = variables;
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Get a required input or fail with [`NodeError::MissingInput`].
pub fn require_input<'a>(inputs: &'a NodeInputs, name: &str) -> Result<&'a Value, NodeError> {
    inputs
        .get(name)
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))
}

/// Write side of the run's named outputs.
///
/// Entries are drained into the execution context by the engine after each
/// batch settles; a later write to the same name replaces the earlier one.
#[derive(Clone, Default)]
pub struct OutputSink {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
}

impl OutputSink {
    pub fn write(&self, name: impl Into<String>, value: Value) {
        self.entries.lock().push((name.into(), value));
    }

    pub fn drain(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Descriptive data about an executor, used for listings
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}
