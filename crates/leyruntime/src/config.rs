use leycore::LeyError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Executions launched together within one scheduling round
pub const DEFAULT_MAX_CONCURRENT_NODES: usize = 5;
/// Timeout applied when neither the call nor the executor names one
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 1000;

/// Configuration for the execution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub max_concurrent_nodes: usize,
    pub default_node_timeout_ms: u64,
    pub event_buffer_size: usize,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, LeyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LeyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn with_max_concurrent_nodes(mut self, max: usize) -> Self {
        self.max_concurrent_nodes = max;
        self
    }

    pub fn with_default_node_timeout(mut self, timeout: Duration) -> Self {
        self.default_node_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn default_node_timeout(&self) -> Duration {
        Duration::from_millis(self.default_node_timeout_ms)
    }

    /// Batch size actually used by the scheduler; never zero.
    pub fn batch_size(&self) -> usize {
        self.max_concurrent_nodes.max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: DEFAULT_MAX_CONCURRENT_NODES,
            default_node_timeout_ms: DEFAULT_NODE_TIMEOUT_MS,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}
