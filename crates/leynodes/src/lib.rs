//! Standard node library
//!
//! Built-in executors for common operations, plus the expression language
//! used by `transform` and `filter`.

mod debug;
pub mod expr;
mod filter;
mod http;
mod input;
mod join;
mod output;
mod time;
mod transform;

pub use debug::DebugNode;
pub use filter::FilterNode;
pub use http::HttpRequestNode;
pub use input::InputNode;
pub use join::JoinNode;
pub use output::OutputNode;
pub use time::DelayNode;
pub use transform::TransformNode;

use leyruntime::ExecutorRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(InputNode));
    registry.register(Arc::new(OutputNode));
    registry.register(Arc::new(TransformNode));
    registry.register(Arc::new(FilterNode));
    registry.register(Arc::new(JoinNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(HttpRequestNode::new()));
}

/// Registry holding every standard node
pub fn standard_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    register_all(&mut registry);
    registry
}
