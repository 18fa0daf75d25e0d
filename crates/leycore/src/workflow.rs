use crate::{LeyError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

pub type WorkflowId = String;
pub type NodeId = String;

/// Handle name used when an edge does not name its source handle.
pub const DEFAULT_SOURCE_HANDLE: &str = "output";
/// Handle name used when an edge does not name its target handle.
pub const DEFAULT_TARGET_HANDLE: &str = "input";

/// A node/edge graph as produced by the authoring layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LeyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LeyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Connect two nodes through named handles.
    pub fn connect(
        &mut self,
        source: impl Into<NodeId>,
        source_handle: impl Into<String>,
        target: impl Into<NodeId>,
        target_handle: impl Into<String>,
    ) -> &Edge {
        let edge = Edge::new(source, target).with_handles(source_handle, target_handle);
        self.edges.push(edge);
        &self.edges[self.edges.len() - 1]
    }

    /// Connect two nodes through the default handles.
    pub fn link(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> &Edge {
        self.edges.push(Edge::new(source, target));
        &self.edges[self.edges.len() - 1]
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A unit of work. Its `node_type` selects the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: NodeData::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = Some(label.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.data.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(Value::as_str)
    }

    /// Display/binding name: `data.label`, then `properties.label`, then the id.
    pub fn label(&self) -> &str {
        self.data
            .label
            .as_deref()
            .filter(|l| !l.is_empty())
            .or_else(|| self.property_str("label").filter(|l| !l.is_empty()))
            .unwrap_or(&self.id)
    }
}

/// Directed dependency from `source`'s output to `target`'s input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_handles(
        mut self,
        source_handle: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        self.source_handle = Some(source_handle.into());
        self.target_handle = Some(target_handle.into());
        self.id = format!("{}:{}", self.id, self.target_handle());
        self
    }

    pub fn source_handle(&self) -> &str {
        self.source_handle.as_deref().unwrap_or(DEFAULT_SOURCE_HANDLE)
    }

    pub fn target_handle(&self) -> &str {
        self.target_handle.as_deref().unwrap_or(DEFAULT_TARGET_HANDLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_default_their_handles() {
        let edge = Edge::new("a", "b");
        assert_eq!(edge.source_handle(), "output");
        assert_eq!(edge.target_handle(), "input");
    }

    #[test]
    fn parses_authoring_layer_json() {
        let workflow = Workflow::from_json(
            r#"{
                "id": "wf-1",
                "name": "demo",
                "nodes": [
                    {"id": "a", "type": "input", "data": {"label": "seed", "properties": {"dataType": "number"}}},
                    {"id": "b", "type": "output"}
                ],
                "edges": [{"id": "e1", "source": "a", "target": "b", "targetHandle": "input"}]
            }"#,
        )
        .unwrap();

        assert_eq!(workflow.nodes[0].label(), "seed");
        assert_eq!(workflow.nodes[1].label(), "b");
        assert_eq!(workflow.edges[0].target_handle(), "input");
        assert_eq!(workflow.edges[0].source_handle(), "output");
    }

    #[test]
    fn label_falls_back_to_property() {
        let node = NodeSpec::new("n1", "input").with_property("label", "threshold");
        assert_eq!(node.label(), "threshold");
    }
}
