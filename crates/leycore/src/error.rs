use crate::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeyError {
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised while building or checking an execution plan.
/// These abort a run as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Circular dependency detected involving node: {0}")]
    CyclicDependency(NodeId),

    #[error("Invalid execution plan generated")]
    InvalidPlan,
}

/// Failure of a single node. Contained to that node by the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node validation failed for {node_id}: {reason}")]
    ValidationFailed { node_id: NodeId, reason: String },

    #[error("No executor found for node type: {0}")]
    UnknownNodeType(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Execution timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Executor panicked: {0}")]
    Panicked(String),
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::InvalidInputType { .. } => ErrorKind::TypeError,
            NodeError::ValidationFailed { .. } => ErrorKind::ValidationError,
            NodeError::Connection(_) => ErrorKind::ConnectionError,
            NodeError::Timeout { .. } => ErrorKind::TimeoutError,
            NodeError::Cancelled => ErrorKind::Cancelled,
            NodeError::MissingInput(_)
            | NodeError::Configuration(_)
            | NodeError::ExecutionFailed(_)
            | NodeError::UnknownNodeType(_)
            | NodeError::Panicked(_) => ErrorKind::RuntimeError,
        }
    }

    pub fn type_mismatch(field: impl Into<String>, expected: &str, actual: &str) -> Self {
        NodeError::InvalidInputType {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Serialized error taxonomy attached to every recorded execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RuntimeError,
    ValidationError,
    ConnectionError,
    TimeoutError,
    MemoryError,
    TypeError,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_have_their_own_kind() {
        let err = NodeError::Timeout { ms: 250 };
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert_eq!(err.to_string(), "Execution timed out after 250ms");
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RuntimeError).unwrap();
        assert_eq!(json, "\"runtime_error\"");
    }
}
