//! Canonical form of a workflow definition.
//!
//! Two definitions that the engine would execute identically normalize to the same
//! canonical form: engine-managed metadata is dropped, nodes are projected onto the
//! fields that affect execution, historical spellings of HTTP parameters are collapsed
//! and every collection whose order carries no meaning is sorted.

use serde_json::{json, Map, Value};

use super::definition::{Connections, Node, WorkflowDefinition};

/// Legacy HTTP request parameter names and the key they collapse into.
const HTTP_PARAMETER_ALIASES: &[(&str, &str)] = &[
    ("bodyContentType", "contentType"),
    ("bodyParametersJson", "jsonBody"),
];

/// Flags from older HTTP node versions that carry no meaning once aliases are folded.
const HTTP_OBSOLETE_PARAMETERS: &[&str] = &["jsonParameters"];

/// Normalized, order-independent representation used for equality checks.
///
/// Object keys are kept sorted by `serde_json`'s default map, so the compact
/// serialization is a stable fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalForm(Value);

impl CanonicalForm {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Compact serialization used as the comparison key.
    pub fn fingerprint(&self) -> String {
        self.0.to_string()
    }
}

pub fn normalize(definition: &WorkflowDefinition) -> CanonicalForm {
    let mut nodes: Vec<&Node> = definition.nodes.iter().collect();
    nodes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = Map::new();
    out.insert("name".to_string(), Value::String(definition.name.clone()));
    out.insert(
        "nodes".to_string(),
        Value::Array(nodes.into_iter().map(normalize_node).collect()),
    );

    let connections = normalize_connections(&definition.connections);
    if !connections.is_empty() {
        out.insert("connections".to_string(), Value::Object(connections));
    }

    if let Some(settings) = definition.settings.as_ref().and_then(|s| prune(s.clone())) {
        out.insert("settings".to_string(), settings);
    }

    CanonicalForm(Value::Object(out))
}

fn normalize_node(node: &Node) -> Value {
    let mut out = Map::new();
    out.insert("name".to_string(), Value::String(node.name.clone()));
    out.insert("type".to_string(), Value::String(node.node_type.clone()));
    out.insert("typeVersion".to_string(), json!(node.type_version));

    let mut parameters = prune_map(&node.parameters);
    if node.is_http_request() {
        fold_http_parameters(&mut parameters);
    }
    if !parameters.is_empty() {
        out.insert("parameters".to_string(), Value::Object(parameters));
    }

    let flags = [
        ("disabled", node.disabled),
        ("executeOnce", node.execute_once),
        ("continueOnFail", node.continue_on_fail),
        ("retryOnFail", node.retry_on_fail),
    ];
    for (key, flag) in flags {
        if flag.unwrap_or(false) {
            out.insert(key.to_string(), Value::Bool(true));
        }
    }

    // Credential ids are regenerated by the engine; only the name is stable.
    if let Some(credentials) = node.credentials.as_ref().filter(|c| !c.is_empty()) {
        let refs: Map<String, Value> = credentials
            .iter()
            .map(|(kind, handle)| (kind.clone(), json!({ "name": handle.name })))
            .collect();
        out.insert("credentials".to_string(), Value::Object(refs));
    }

    Value::Object(out)
}

/// Collapses historical HTTP parameter shapes onto the current one.
fn fold_http_parameters(parameters: &mut Map<String, Value>) {
    for (alias, canonical) in HTTP_PARAMETER_ALIASES {
        if let Some(value) = parameters.remove(*alias) {
            if !parameters.contains_key(*canonical) {
                parameters.insert(canonical.to_string(), value);
            }
        }
    }
    for key in HTTP_OBSOLETE_PARAMETERS {
        parameters.remove(*key);
    }

    if has_json_body(parameters) {
        parameters.insert("sendBody".to_string(), Value::Bool(true));
        parameters.insert("specifyBody".to_string(), Value::String("json".to_string()));
    } else if parameters.get("specifyBody").and_then(Value::as_str) == Some("json") {
        parameters.remove("specifyBody");
    }
}

fn has_json_body(parameters: &Map<String, Value>) -> bool {
    match parameters.get("jsonBody") {
        Some(Value::String(body)) => !body.trim().is_empty(),
        Some(Value::Object(body)) => !body.is_empty(),
        Some(Value::Array(body)) => !body.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn normalize_connections(connections: &Connections) -> Map<String, Value> {
    let mut out = Map::new();
    for (source, outputs) in connections {
        let mut kinds = Map::new();
        for (kind, slots) in outputs {
            let mut slots: Vec<Value> = slots
                .iter()
                .map(|targets| json!(targets))
                .collect();
            // An empty trailing slot is how the engine spells "no connection".
            while slots
                .last()
                .map_or(false, |s| s.as_array().map_or(false, Vec::is_empty))
            {
                slots.pop();
            }
            if !slots.is_empty() {
                kinds.insert(kind.clone(), Value::Array(slots));
            }
        }
        if !kinds.is_empty() {
            out.insert(source.clone(), Value::Object(kinds));
        }
    }
    out
}

/// Drops nulls and empty objects so "never set" and "cleared" compare equal.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned = prune_map(&map);
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        Value::Array(items) => Some(Value::Array(
            items
                .into_iter()
                .map(|item| prune(item).unwrap_or(Value::Null))
                .collect(),
        )),
        other => Some(other),
    }
}

fn prune_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter_map(|(k, v)| prune(v.clone()).map(|v| (k.clone(), v)))
        .collect()
}
