use crate::expr::{compile_property, Expression, Scope};
use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

/// Applies an expression to its `input`.
///
/// `transformType` picks how: `map`, `filter`, `reduce`, `sort`, `group` walk
/// arrays item by item; `custom` (and any scalar input) evaluates once.
pub struct TransformNode;

#[async_trait]
impl NodeExecutor for TransformNode {
    fn node_type(&self) -> &str {
        "transform"
    }

    fn validate(&self, node: &NodeSpec) -> Result<(), NodeError> {
        compile_property(node, "expression").map(|_| ())
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, ctx: &NodeContext) -> Result<Value, NodeError> {
        let expression = compile_property(node, "expression")?;
        let transform_type = node.property_str("transformType").unwrap_or("map");
        let input = inputs.get("input").cloned().unwrap_or_default();

        tracing::debug!(
            node_id = %node.id,
            transform_type,
            expression = expression.source(),
            "Applying transform"
        );

        let transform = Transform {
            expression: &expression,
            scope: Scope::for_node(ctx),
        };
        transform
            .apply(transform_type, input)
            .map_err(|e| NodeError::ExecutionFailed(format!("Transform execution failed: {}", e)))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Map, filter, reduce, sort or group data with an expression".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::required("input", "Value or array to transform")],
            outputs: vec![PortDefinition::required("output", "Transformed value")],
        }
    }
}

struct Transform<'a> {
    expression: &'a Expression,
    scope: Scope,
}

impl Transform<'_> {
    fn apply(&self, transform_type: &str, input: Value) -> Result<Value, NodeError> {
        let items = match input {
            Value::Array(items) => items,
            scalar => return self.apply_scalar(transform_type, scalar),
        };

        match transform_type {
            "map" => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.eval_item(item, i))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            "filter" => {
                let mut kept = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    if self.eval_item(item.clone(), i)?.is_truthy() {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            "reduce" => {
                let mut acc = Value::Null;
                for (i, item) in items.into_iter().enumerate() {
                    let mut frame = BTreeMap::new();
                    frame.insert("acc".to_string(), acc.clone());
                    frame.insert("item".to_string(), item.clone());
                    frame.insert("index".to_string(), Value::from(i));
                    let scope = self
                        .scope
                        .clone()
                        .with("input", frame)
                        .with("acc", acc)
                        .with("item", item)
                        .with("index", i);
                    acc = self.expression.eval(&scope)?;
                }
                Ok(acc)
            }
            "sort" => {
                let mut compare = |a: &Value, b: &Value| self.compare(a, b);
                merge_sort(items, &mut compare).map(Value::Array)
            }
            "group" => {
                let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
                for (i, item) in items.into_iter().enumerate() {
                    let key = self.eval_item(item.clone(), i)?.to_string();
                    groups.entry(key).or_default().push(item);
                }
                Ok(Value::Object(
                    groups.into_iter().map(|(k, v)| (k, Value::Array(v))).collect(),
                ))
            }
            _ => self.eval_input(Value::Array(items)),
        }
    }

    fn apply_scalar(&self, transform_type: &str, input: Value) -> Result<Value, NodeError> {
        match transform_type {
            "filter" => Ok(if self.eval_input(input.clone())?.is_truthy() {
                input
            } else {
                Value::Null
            }),
            "sort" => Ok(input),
            "group" => {
                let key = self.eval_input(input.clone())?.to_string();
                let mut groups = BTreeMap::new();
                groups.insert(key, Value::Array(vec![input]));
                Ok(Value::Object(groups))
            }
            _ => self.eval_input(input),
        }
    }

    fn eval_input(&self, input: Value) -> Result<Value, NodeError> {
        Ok(self.expression.eval(&self.scope.clone().with("input", input))?)
    }

    /// Items are visible as both `input` and `item`.
    fn eval_item(&self, item: Value, index: usize) -> Result<Value, NodeError> {
        let scope = self
            .scope
            .clone()
            .with("input", item.clone())
            .with("item", item)
            .with("index", index);
        Ok(self.expression.eval(&scope)?)
    }

    /// Comparator expressions see `a` and `b` and return a number whose sign
    /// orders them.
    fn compare(&self, a: &Value, b: &Value) -> Result<Ordering, NodeError> {
        let mut pair = BTreeMap::new();
        pair.insert("a".to_string(), a.clone());
        pair.insert("b".to_string(), b.clone());
        let scope = self
            .scope
            .clone()
            .with("input", pair)
            .with("a", a.clone())
            .with("b", b.clone());

        let verdict = match self.expression.eval(&scope)? {
            Value::Number(n) => n,
            Value::Bool(true) => 1.0,
            _ => 0.0,
        };
        Ok(verdict.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
    }
}

/// Stable merge sort with a comparator that may fail.
fn merge_sort<F>(mut items: Vec<Value>, compare: &mut F) -> Result<Vec<Value>, NodeError>
where
    F: FnMut(&Value, &Value) -> Result<Ordering, NodeError>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        let next = if compare(r, l)? == Ordering::Less {
            right.next()
        } else {
            left.next()
        };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn run(transform_type: &str, expression: &str, input: serde_json::Value) -> Result<Value, NodeError> {
        let node = NodeSpec::new("t", "transform")
            .with_property("transformType", transform_type)
            .with_property("expression", expression);
        let mut inputs = NodeInputs::new();
        inputs.insert("input".to_string(), input.into());
        TransformNode
            .execute(&node, inputs, &NodeContext::new(Uuid::new_v4(), "wf", "t"))
            .await
    }

    fn json(value: serde_json::Value) -> Value {
        value.into()
    }

    #[tokio::test]
    async fn map_over_array_and_scalar() {
        let doubled = run("map", "return input * 2;", serde_json::json!([1, 2, 3])).await.unwrap();
        assert_eq!(doubled, json(serde_json::json!([2, 4, 6])));
        let scalar = run("map", "input + index", serde_json::json!(5)).await;
        assert!(scalar.is_err(), "index is only bound for array items");
    }

    #[tokio::test]
    async fn filter_keeps_truthy_items() {
        let kept = run("filter", "item.age >= 18", serde_json::json!([{"age": 12}, {"age": 30}])).await.unwrap();
        assert_eq!(kept, json(serde_json::json!([{"age": 30}])));
        assert_eq!(run("filter", "input > 10", serde_json::json!(3)).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn reduce_starts_from_null() {
        let total = run("reduce", "(acc ?? 0) + item", serde_json::json!([1, 2, 3, 4])).await.unwrap();
        assert_eq!(total, Value::from(10i64));
        let via_input = run("reduce", "(input.acc ?? 0) + input.item", serde_json::json!([5, 5])).await.unwrap();
        assert_eq!(via_input, Value::from(10i64));
    }

    #[tokio::test]
    async fn sort_is_stable() {
        let sorted = run(
            "sort",
            "a.rank - b.rank",
            serde_json::json!([{"rank": 2, "id": "x"}, {"rank": 1, "id": "y"}, {"rank": 2, "id": "z"}]),
        )
        .await
        .unwrap();
        assert_eq!(
            sorted,
            json(serde_json::json!([{"rank": 1, "id": "y"}, {"rank": 2, "id": "x"}, {"rank": 2, "id": "z"}]))
        );
    }

    #[tokio::test]
    async fn group_by_key() {
        let groups = run("group", "item.kind", serde_json::json!([{"kind": "a"}, {"kind": "b"}, {"kind": "a"}]))
            .await
            .unwrap();
        assert_eq!(groups.get("a").and_then(Value::as_array).map(Vec::len), Some(2));
        assert_eq!(groups.get("b").and_then(Value::as_array).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn custom_sees_whole_input_and_variables() {
        let node = NodeSpec::new("t", "transform")
            .with_property("transformType", "custom")
            .with_property("expression", "len(input) * variables.factor");
        let mut vars = std::collections::HashMap::new();
        vars.insert("factor".to_string(), Value::from(10i64));
        let ctx = NodeContext::new(Uuid::new_v4(), "wf", "t").with_variables(std::sync::Arc::new(vars));
        let mut inputs = NodeInputs::new();
        inputs.insert("input".to_string(), json(serde_json::json!([1, 2])));

        assert_eq!(TransformNode.execute(&node, inputs, &ctx).await.unwrap(), Value::from(20i64));
    }

    #[tokio::test]
    async fn runtime_errors_are_wrapped() {
        let err = run("map", "input.missing.deeper", serde_json::json!([{}])).await.unwrap_err();
        assert!(err.to_string().contains("Transform execution failed"));
    }

    #[test]
    fn validation_requires_a_parsable_expression() {
        assert!(TransformNode.validate(&NodeSpec::new("t", "transform")).is_err());
        let broken = NodeSpec::new("t", "transform").with_property("expression", "input +");
        assert!(TransformNode.validate(&broken).is_err());
        let fine = NodeSpec::new("t", "transform").with_property("expression", "input");
        assert!(TransformNode.validate(&fine).is_ok());
    }
}
