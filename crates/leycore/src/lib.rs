//! Core abstractions for the workflow execution engine
//!
//! Graph model, dynamic values, the error taxonomy, the executor contract and
//! the typed event channel. Everything else in the workspace builds on these.

mod error;
pub mod events;
mod execution;
mod node;
mod value;
mod workflow;

pub use error::{ErrorKind, LeyError, NodeError, PlanError};
pub use events::*;
pub use execution::{
    ExecutionContext, ExecutionError, ExecutionId, ExecutionMetadata, ExecutionOptions,
    ExecutionResult, ExecutionStatus, NodeExecutionState, NodeExecutionStatus, SYSTEM_NODE_ID,
};
pub use node::{
    require_input, ExecutorMetadata, NodeContext, NodeExecutor, NodeInputs, OutputSink,
    PortDefinition,
};
pub use value::Value;
pub use workflow::{
    Edge, NodeData, NodeId, NodeSpec, Workflow, WorkflowId, DEFAULT_SOURCE_HANDLE,
    DEFAULT_TARGET_HANDLE,
};

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, LeyError>;
