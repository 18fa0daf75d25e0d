//! Workflow execution runtime
//!
//! Plans node/edge graphs into dependency-respecting schedules and runs them
//! with bounded parallelism, per-node timeouts and cooperative cancellation,
//! publishing progress on the event bus.

mod config;
mod engine;
mod planner;
mod registry;

pub use config::{
    EngineConfig, DEFAULT_EVENT_BUFFER_SIZE, DEFAULT_MAX_CONCURRENT_NODES, DEFAULT_NODE_TIMEOUT_MS,
};
pub use engine::ExecutionEngine;
pub use planner::ExecutionPlan;
pub use registry::ExecutorRegistry;
