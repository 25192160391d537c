//! Workflow definition as exchanged with the automation engine.
//!
//! Fields the engine manages on its own (ids, timestamps, version stamps, UI layout) are
//! carried so a fetched definition can be sent back unchanged, but they never take part
//! in comparison. See [`crate::workflow::normalize`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Node type tag of the engine's HTTP request node.
pub const HTTP_REQUEST_NODE: &str = "n8n-nodes-base.httpRequest";

/// Credential type used for header-based API authentication.
pub const HTTP_HEADER_AUTH: &str = "httpHeaderAuth";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Connections,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub type_version: f64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BTreeMap<String, CredentialHandle>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_once: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_in_flow: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    /// Engine fields this crate does not model (`onError`, `maxTries`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn is_http_request(&self) -> bool {
        self.node_type == HTTP_REQUEST_NODE
    }

    /// Target address of an HTTP request node, if it has one.
    pub fn url(&self) -> Option<&str> {
        self.parameters.get("url").and_then(Value::as_str)
    }
}

/// Reference to a secret held by the engine. The id is optional because the
/// engine regenerates it freely; the name is the stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHandle {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl CredentialHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: name.into(),
        }
    }
}

/// Source node name -> output kind (`main`, ...) -> output index -> targets.
pub type Connections = BTreeMap<String, BTreeMap<String, Vec<Vec<ConnectionTarget>>>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
}

/// Engine ids are strings in current versions and integers in older ones.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Structural problems that make a definition unfit for deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("workflow '{workflow}' contains more than one node named '{node}'")]
    DuplicateNodeName { workflow: String, node: String },

    #[error("connection from '{source_node}' references unknown node '{missing_node}'")]
    DanglingConnection {
        source_node: String,
        missing_node: String,
    },

    #[error("workflow definition could not be decoded: {0}")]
    Malformed(String),
}

impl WorkflowDefinition {
    pub fn from_json(value: Value) -> Result<Self, DefinitionError> {
        serde_json::from_value(value).map_err(|e| DefinitionError::Malformed(e.to_string()))
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Checks that node names are unique and every connection endpoint exists.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut names = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(DefinitionError::DuplicateNodeName {
                    workflow: self.name.clone(),
                    node: node.name.clone(),
                });
            }
        }

        for (source, outputs) in &self.connections {
            if !names.contains(source.as_str()) {
                return Err(DefinitionError::DanglingConnection {
                    source_node: source.clone(),
                    missing_node: source.clone(),
                });
            }
            let targets = outputs.values().flatten().flatten();
            for target in targets {
                if !names.contains(target.node.as_str()) {
                    return Err(DefinitionError::DanglingConnection {
                        source_node: source.clone(),
                        missing_node: target.node.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
