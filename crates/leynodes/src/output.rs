use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};
use std::time::Duration;

/// Sink: publishes its `input` as a named run output and returns it
/// formatted per the `format` property.
pub struct OutputNode;

#[async_trait]
impl NodeExecutor for OutputNode {
    fn node_type(&self) -> &str {
        "output"
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, ctx: &NodeContext) -> Result<Value, NodeError> {
        let input = inputs.get("input").cloned().unwrap_or_default();
        let name = node.label();
        ctx.outputs.write(name, input.clone());

        let format = node.property_str("format").unwrap_or("json");
        tracing::debug!(node_id = %node.id, output = name, format, "Writing output");

        Ok(match format {
            "json" => Value::String(input.to_json_pretty()),
            "csv" => Value::String(match &input {
                Value::Array(rows) => to_csv(rows),
                other => other.to_string(),
            }),
            "text" => Value::String(input.to_string()),
            "xml" => Value::String(to_xml(&input)),
            _ => input,
        })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(2))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Publishes a named run output (json, csv, text or xml)".to_string(),
            category: "io".to_string(),
            inputs: vec![PortDefinition::required("input", "Value to publish")],
            outputs: vec![PortDefinition::optional("output", "Formatted value")],
        }
    }
}

/// Header row from the first row's keys.
fn to_csv(rows: &[Value]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let headers: Vec<&String> = first.as_object().map(|m| m.keys().collect()).unwrap_or_default();

    let mut lines = vec![headers.iter().map(|h| h.as_str()).collect::<Vec<_>>().join(",")];
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| match row.get(h) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) if s.contains(',') || s.contains('"') => {
                    format!("\"{}\"", s.replace('"', "\"\""))
                }
                Some(other) => other.to_string(),
            })
            .collect();
        lines.push(cells.join(","));
    }
    lines.join("\n")
}

fn to_xml(value: &Value) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_xml(value, "root", &mut out);
    out
}

/// Array items become `item0`, `item1`, ... without a wrapping element.
fn write_xml(value: &Value, tag: &str, out: &mut String) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                write_xml(item, &format!("item{}", i), out);
            }
        }
        Value::Object(map) => {
            out.push_str(&format!("<{}>", tag));
            for (key, child) in map {
                write_xml(child, key, out);
            }
            out.push_str(&format!("</{}>", tag));
        }
        scalar => out.push_str(&format!("<{tag}>{}</{tag}>", escape_xml(&scalar.to_string()))),
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
