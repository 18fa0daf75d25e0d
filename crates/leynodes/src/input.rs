use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Seeds a run with a value taken from the run variables.
///
/// The variable is looked up by the node's label (or id); when absent the
/// `defaultValue` property is used. The value is then coerced to `dataType`.
pub struct InputNode;

#[async_trait]
impl NodeExecutor for InputNode {
    fn node_type(&self) -> &str {
        "input"
    }

    async fn execute(&self, node: &NodeSpec, _inputs: NodeInputs, ctx: &NodeContext) -> Result<Value, NodeError> {
        let name = node.label();
        let raw = ctx
            .variable(name)
            .filter(|v| !v.is_null())
            .or_else(|| node.property("defaultValue"))
            .cloned()
            .unwrap_or_default();

        let data_type = node.property_str("dataType").unwrap_or("string");
        tracing::debug!(node_id = %node.id, variable = name, data_type, "Resolving input");
        coerce(raw, data_type)
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Provides a run variable or default value".to_string(),
            category: "io".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition::required("output", "Coerced value")],
        }
    }
}

fn coerce(value: Value, data_type: &str) -> Result<Value, NodeError> {
    match data_type {
        "number" => match &value {
            Value::Number(n) => Ok(Value::Number(*n)),
            v if !v.is_truthy() => Ok(Value::Number(0.0)),
            Value::Bool(_) => Ok(Value::Number(1.0)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| NodeError::type_mismatch("input", "number", s)),
            other => Err(NodeError::type_mismatch("input", "number", other.type_name())),
        },
        "boolean" => Ok(Value::Bool(
            value == Value::Bool(true) || value.as_str() == Some("true"),
        )),
        "array" => Ok(match value {
            Value::Array(_) => value,
            v if v.is_truthy() => Value::Array(vec![v]),
            _ => Value::Array(vec![]),
        }),
        "object" => Ok(match value {
            Value::Object(_) | Value::Array(_) => value,
            _ => Value::Object(BTreeMap::new()),
        }),
        _ => Ok(Value::String(if value.is_truthy() {
            value.to_string()
        } else {
            String::new()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn ctx_with(name: &str, value: Value) -> NodeContext {
        let mut vars = HashMap::new();
        vars.insert(name.to_string(), value);
        NodeContext::new(Uuid::new_v4(), "wf", "n").with_variables(Arc::new(vars))
    }

    #[tokio::test]
    async fn reads_variable_by_label() {
        let node = NodeSpec::new("n", "input")
            .with_label("threshold")
            .with_property("dataType", "number");
        let out = InputNode
            .execute(&node, NodeInputs::new(), &ctx_with("threshold", Value::from("12.5")))
            .await
            .unwrap();
        assert_eq!(out, Value::Number(12.5));
    }

    #[tokio::test]
    async fn falls_back_to_default_value() {
        let node = NodeSpec::new("n", "input").with_property("defaultValue", "hello");
        let out = InputNode
            .execute(&node, NodeInputs::new(), &ctx_with("other", Value::Null))
            .await
            .unwrap();
        assert_eq!(out, Value::from("hello"));
    }

    #[test]
    fn coercions() {
        assert_eq!(coerce(Value::Null, "number").unwrap(), Value::Number(0.0));
        assert!(coerce(Value::from("abc"), "number").is_err());
        assert_eq!(coerce(Value::from("true"), "boolean").unwrap(), Value::Bool(true));
        assert_eq!(coerce(Value::from("yes"), "boolean").unwrap(), Value::Bool(false));
        assert_eq!(coerce(Value::from(3i64), "array").unwrap(), Value::Array(vec![Value::from(3i64)]));
        assert_eq!(coerce(Value::Null, "array").unwrap(), Value::Array(vec![]));
        assert_eq!(coerce(Value::from(1i64), "object").unwrap(), Value::Object(BTreeMap::new()));
        assert_eq!(coerce(Value::Null, "string").unwrap(), Value::from(""));
        assert_eq!(coerce(Value::from(42i64), "string").unwrap(), Value::from("42"));
    }
}
