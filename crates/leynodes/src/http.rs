use async_trait::async_trait;
use leycore::{
    ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeInputs, NodeSpec, PortDefinition,
    Value,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// HTTP request node.
///
/// Returns `{status, body, headers}`; a JSON response body is parsed, any
/// other body is returned as text. Non-2xx statuses are not errors.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http"
    }

    fn validate(&self, node: &NodeSpec) -> Result<(), NodeError> {
        match node.property_str("url") {
            Some(url) if !url.is_empty() => Ok(()),
            _ => Err(NodeError::Configuration("property 'url' is required".to_string())),
        }
    }

    async fn execute(&self, node: &NodeSpec, inputs: NodeInputs, _ctx: &NodeContext) -> Result<Value, NodeError> {
        let url = inputs
            .get("url")
            .and_then(Value::as_str)
            .or_else(|| node.property_str("url"))
            .ok_or_else(|| NodeError::MissingInput("url".to_string()))?;
        let method = node.property_str("method").unwrap_or("GET").to_uppercase();

        tracing::info!(node_id = %node.id, "{} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            "DELETE" => self.client.delete(url),
            _ => return Err(NodeError::Configuration(format!("Unsupported method: {}", method))),
        };

        if let Some(Value::Object(headers)) = node.property("headers") {
            for (key, value) in headers {
                request = request.header(key.as_str(), value.to_string());
            }
        }

        request = match inputs.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(body) => request.json(&body.to_json()),
        };

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::Connection(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.to_str().unwrap_or(""))))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from)
            .unwrap_or(Value::String(text));

        tracing::info!(node_id = %node.id, status, "Response received");

        let mut result = BTreeMap::new();
        result.insert("status".to_string(), Value::from(status as i64));
        result.insert("body".to_string(), body);
        result.insert("headers".to_string(), Value::Object(headers));
        Ok(Value::Object(result))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            inputs: vec![
                PortDefinition::optional("url", "Overrides the url property"),
                PortDefinition::optional("body", "Request body; strings are sent raw, anything else as JSON"),
            ],
            outputs: vec![PortDefinition::required("output", "{status, body, headers}")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn url_is_required() {
        let node = HttpRequestNode::new();
        assert!(node.validate(&NodeSpec::new("h", "http")).is_err());
        let ok = NodeSpec::new("h", "http").with_property("url", "http://localhost:1");
        assert!(node.validate(&ok).is_ok());
    }

    #[tokio::test]
    async fn rejects_unknown_methods() {
        let node = NodeSpec::new("h", "http")
            .with_property("url", "http://localhost:1")
            .with_property("method", "brew");
        let err = HttpRequestNode::new()
            .execute(&node, NodeInputs::new(), &NodeContext::new(Uuid::new_v4(), "wf", "h"))
            .await
            .unwrap_err();
        assert_eq!(err, NodeError::Configuration("Unsupported method: BREW".to_string()));
    }
}
