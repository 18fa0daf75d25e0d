use async_trait::async_trait;
use leycore::{
    require_input, ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec,
    PortDefinition, Value,
};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// How a join node combines its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinType {
    Concat,
    Inner,
    Left,
    Right,
    Full,
    /// Object of every input keyed by handle
    Merge,
    /// Unrecognized kind: `{input1, input2}`
    Pair,
}

impl JoinType {
    fn parse(kind: &str) -> Self {
        match kind {
            "concat" => JoinType::Concat,
            "inner" => JoinType::Inner,
            "left" => JoinType::Left,
            "right" => JoinType::Right,
            "full" => JoinType::Full,
            "merge" => JoinType::Merge,
            _ => JoinType::Pair,
        }
    }
}

/// Combines two data streams (`input1`, `input2`), or every input for `merge`.
pub struct JoinNode;

#[async_trait]
impl NodeExecutor for JoinNode {
    fn node_type(&self) -> &str {
        "join"
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let join_type = JoinType::parse(node.property_str("joinType").unwrap_or("inner"));
        tracing::debug!(node_id = %node.id, ?join_type, inputs = inputs.len(), "Joining inputs");

        if join_type == JoinType::Merge {
            return Ok(Value::Object(inputs.into_iter().collect()));
        }

        let left = require_input(&inputs, "input1")?;
        let right = require_input(&inputs, "input2")?;

        match join_type {
            JoinType::Concat => Ok(concat(left, right)),
            JoinType::Pair => {
                let mut pair = BTreeMap::new();
                pair.insert("input1".to_string(), left.clone());
                pair.insert("input2".to_string(), right.clone());
                Ok(Value::Object(pair))
            }
            relational => {
                let key = node
                    .property_str("joinKey")
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        NodeError::Configuration("Join key is required for relational joins".to_string())
                    })?;
                let left = left
                    .as_array()
                    .ok_or_else(|| NodeError::type_mismatch("input1", "array", left.type_name()))?;
                let right = right
                    .as_array()
                    .ok_or_else(|| NodeError::type_mismatch("input2", "array", right.type_name()))?;
                Ok(Value::Array(relational_join(left, right, key, relational)))
            }
        }
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(4))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Join two streams: concat, inner, left, right, full or merge".to_string(),
            category: "transform".to_string(),
            inputs: vec![
                PortDefinition::required("input1", "Left side"),
                PortDefinition::required("input2", "Right side"),
            ],
            outputs: vec![PortDefinition::required("output", "Joined data")],
        }
    }
}

fn concat(left: &Value, right: &Value) -> Value {
    let mut out = Vec::new();
    for side in [left, right] {
        match side {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Value::Array(out)
}

/// Right-hand fields win on conflict; non-objects contribute nothing.
fn merge_rows(left: &Value, right: &Value) -> Value {
    let mut row = left.as_object().cloned().unwrap_or_default();
    if let Some(fields) = right.as_object() {
        row.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Value::Object(row)
}

fn relational_join(left: &[Value], right: &[Value], key: &str, join_type: JoinType) -> Vec<Value> {
    // rows without the key never match
    let matches = |l: &Value, r: &Value| l.get(key).is_some_and(|k| r.get(key) == Some(k));
    let mut out = Vec::new();

    match join_type {
        JoinType::Inner => {
            for l in left {
                for r in right.iter().filter(|r| matches(l, r)) {
                    out.push(merge_rows(l, r));
                }
            }
        }
        JoinType::Left => {
            for l in left {
                let before = out.len();
                for r in right.iter().filter(|r| matches(l, r)) {
                    out.push(merge_rows(l, r));
                }
                if out.len() == before {
                    out.push(l.clone());
                }
            }
        }
        JoinType::Right => {
            for r in right {
                let before = out.len();
                for l in left.iter().filter(|l| matches(l, r)) {
                    out.push(merge_rows(l, r));
                }
                if out.len() == before {
                    out.push(r.clone());
                }
            }
        }
        _ => {
            let mut used_left = HashSet::new();
            let mut used_right = HashSet::new();
            for (i, l) in left.iter().enumerate() {
                for (j, r) in right.iter().enumerate() {
                    if matches(l, r) {
                        out.push(merge_rows(l, r));
                        used_left.insert(i);
                        used_right.insert(j);
                    }
                }
            }
            out.extend(
                left.iter()
                    .enumerate()
                    .filter(|(i, _)| !used_left.contains(i))
                    .map(|(_, l)| l.clone()),
            );
            out.extend(
                right
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| !used_right.contains(j))
                    .map(|(_, r)| r.clone()),
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    async fn join(join_type: &str, input1: serde_json::Value, input2: serde_json::Value) -> Result<Value, NodeError> {
        let node = NodeSpec::new("j", "join")
            .with_property("joinType", join_type)
            .with_property("joinKey", "id");
        let mut inputs = NodeInputs::new();
        inputs.insert("input1".to_string(), input1.into());
        inputs.insert("input2".to_string(), input2.into());
        JoinNode
            .execute(&node, inputs, &NodeContext::new(Uuid::new_v4(), "wf", "j"))
            .await
    }

    fn value(json: serde_json::Value) -> Value {
        json.into()
    }

    fn users() -> serde_json::Value {
        json!([{"id": 1, "name": "Ada"}, {"id": 2, "name": "Linus"}])
    }

    fn orders() -> serde_json::Value {
        json!([{"id": 1, "total": 10}, {"id": 3, "total": 7}])
    }

    #[tokio::test]
    async fn inner_join_merges_matches() {
        let out = join("inner", users(), orders()).await.unwrap();
        assert_eq!(out, value(json!([{"id": 1, "name": "Ada", "total": 10}])));
    }

    #[tokio::test]
    async fn outer_joins_keep_unmatched_rows() {
        let left = join("left", users(), orders()).await.unwrap();
        assert_eq!(left.as_array().map(Vec::len), Some(2));

        let right = join("right", users(), orders()).await.unwrap();
        assert_eq!(right, value(json!([{"id": 1, "name": "Ada", "total": 10}, {"id": 3, "total": 7}])));

        let full = join("full", users(), orders()).await.unwrap();
        assert_eq!(full.as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn concat_flattens_arrays() {
        let out = join("concat", json!([1, 2]), json!(3)).await.unwrap();
        assert_eq!(out, value(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn unknown_kind_pairs_inputs() {
        let out = join("zip", json!(1), json!(2)).await.unwrap();
        assert_eq!(out, value(json!({"input1": 1, "input2": 2})));
    }

    #[tokio::test]
    async fn merge_takes_every_handle() {
        let node = NodeSpec::new("j", "join").with_property("joinType", "merge");
        let mut inputs = NodeInputs::new();
        for (handle, value) in [("in1", 1i64), ("in2", 2), ("in3", 3)] {
            inputs.insert(handle.to_string(), Value::from(value));
        }
        let out = JoinNode
            .execute(&node, inputs, &NodeContext::new(Uuid::new_v4(), "wf", "j"))
            .await
            .unwrap();
        assert_eq!(out, value(json!({"in1": 1, "in2": 2, "in3": 3})));
    }

    #[tokio::test]
    async fn missing_side_and_missing_key_fail() {
        let node = NodeSpec::new("j", "join").with_property("joinType", "concat");
        let mut inputs = NodeInputs::new();
        inputs.insert("input1".to_string(), Value::from(1i64));
        let err = JoinNode
            .execute(&node, inputs, &NodeContext::new(Uuid::new_v4(), "wf", "j"))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::MissingInput("input2".to_string()));

        let keyless = NodeSpec::new("j", "join").with_property("joinType", "inner");
        let mut inputs = NodeInputs::new();
        inputs.insert("input1".to_string(), users().into());
        inputs.insert("input2".to_string(), orders().into());
        let err = JoinNode
            .execute(&keyless, inputs, &NodeContext::new(Uuid::new_v4(), "wf", "j"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }

    #[tokio::test]
    async fn relational_join_needs_arrays() {
        let err = join("inner", json!({"id": 1}), orders()).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidInputType { .. }));
    }
}
