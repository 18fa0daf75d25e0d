use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};
use tokio::time::{sleep, Duration};

/// Waits `delayMs` milliseconds, then passes `input` through
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, ctx: &NodeContext) -> Result<Value, NodeError> {
        let delay_ms = node
            .property("delayMs")
            .and_then(Value::as_f64)
            .unwrap_or(1000.0)
            .max(0.0) as u64;

        tracing::debug!(node_id = %node.id, delay_ms, "Delaying");

        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
            _ = sleep(Duration::from_millis(delay_ms)) => {
                Ok(inputs.get("input").cloned().unwrap_or_default())
            }
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![PortDefinition::optional("input", "Value to pass through")],
            outputs: vec![PortDefinition::optional("output", "The input, unchanged")],
        }
    }
}
