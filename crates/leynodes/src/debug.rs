use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};

/// Simple debug node that logs its inputs and passes `input` through
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    fn node_type(&self) -> &str {
        "debug"
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, ctx: &NodeContext) -> Result<Value, NodeError> {
        let message = node.property_str("message").unwrap_or("(no message)");
        tracing::info!(
            execution_id = %ctx.execution_id,
            node_id = %node.id,
            "DEBUG: {}",
            message
        );

        let mut handles: Vec<&String> = inputs.keys().collect();
        handles.sort();
        for handle in handles {
            tracing::info!(node_id = %node.id, "  {}: {}", handle, inputs[handle]);
        }

        Ok(inputs.get("input").cloned().unwrap_or_default())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::optional("input", "Value to log")],
            outputs: vec![PortDefinition::optional("output", "The input, unchanged")],
        }
    }
}
