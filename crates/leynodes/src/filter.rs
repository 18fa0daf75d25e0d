use crate::expr::{compile_property, Scope};
use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Splits its `input` by a condition into `{passed, failed}`.
///
/// Arrays are split item by item. A scalar lands whole on one side, with
/// `null` on the other.
pub struct FilterNode;

#[async_trait]
impl NodeExecutor for FilterNode {
    fn node_type(&self) -> &str {
        "filter"
    }

    fn validate(&self, node: &NodeSpec) -> Result<(), NodeError> {
        compile_property(node, "condition").map(|_| ())
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, ctx: &NodeContext) -> Result<Value, NodeError> {
        let condition = compile_property(node, "condition")?;
        let input = inputs.get("input").cloned().unwrap_or_default();
        let base = Scope::for_node(ctx);

        let test = |item: &Value, index: usize| -> Result<bool, NodeError> {
            let scope = base
                .clone()
                .with("item", item.clone())
                .with("input", item.clone())
                .with("index", index);
            condition
                .eval(&scope)
                .map(|v| v.is_truthy())
                .map_err(|e| NodeError::ExecutionFailed(format!("Filter execution failed: {}", e)))
        };

        let (passed, failed) = match input {
            Value::Array(items) => {
                let mut passed = Vec::new();
                let mut failed = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if test(&item, i)? {
                        passed.push(item);
                    } else {
                        failed.push(item);
                    }
                }
                (Value::Array(passed), Value::Array(failed))
            }
            scalar if test(&scalar, 0)? => (scalar, Value::Null),
            scalar => (Value::Null, scalar),
        };

        tracing::debug!(node_id = %node.id, condition = condition.source(), "Filter applied");

        let mut result = BTreeMap::new();
        result.insert("passed".to_string(), passed);
        result.insert("failed".to_string(), failed);
        Ok(Value::Object(result))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(3))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Split data into passed and failed by a condition".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("input", "Value or array to test")],
            outputs: vec![
                PortDefinition::required("passed", "Items matching the condition"),
                PortDefinition::required("failed", "Items not matching the condition"),
            ],
        }
    }
}
