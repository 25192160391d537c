//! Structural comparison of workflow definitions.
//!
//! [`are_different`] is the only notion of "changed" used by the reconciler.
//! [`explain`] is a diagnostic aid and never feeds back into that decision.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use super::definition::WorkflowDefinition;
use super::normalize::{normalize, CanonicalForm};

/// One observed difference between two canonical forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Difference {
    pub field: String,
    pub description: String,
}

impl Difference {
    fn new(field: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.description)
    }
}

pub fn are_different(a: &WorkflowDefinition, b: &WorkflowDefinition) -> bool {
    normalize(a).fingerprint() != normalize(b).fingerprint()
}

/// Lists what differs between `a` and `b`. Empty when they are not different.
pub fn explain(a: &WorkflowDefinition, b: &WorkflowDefinition) -> Vec<Difference> {
    let left = normalize(a);
    let right = normalize(b);
    if left.fingerprint() == right.fingerprint() {
        return Vec::new();
    }

    let mut diffs = structural_differences(&left, &right);
    if diffs.is_empty() {
        for key in differing_keys(left.as_value(), right.as_value()) {
            diffs.push(Difference::new(
                key,
                "canonical serializations differ outside the compared structure",
            ));
        }
    }
    diffs
}

fn structural_differences(left: &CanonicalForm, right: &CanonicalForm) -> Vec<Difference> {
    let (l, r) = (left.as_value(), right.as_value());
    let mut diffs = Vec::new();

    if l["name"] != r["name"] {
        diffs.push(Difference::new(
            "name",
            format!("{} != {}", l["name"], r["name"]),
        ));
    }

    let empty = Vec::new();
    let left_nodes = l["nodes"].as_array().unwrap_or(&empty);
    let right_nodes = r["nodes"].as_array().unwrap_or(&empty);
    if left_nodes.len() != right_nodes.len() {
        diffs.push(Difference::new(
            "nodes",
            format!(
                "node count {} != {} (delta {})",
                left_nodes.len(),
                right_nodes.len(),
                right_nodes.len() as i64 - left_nodes.len() as i64
            ),
        ));
    }

    // Nodes are sorted by name, so positional pairing lines up identical sets.
    for (index, (ln, rn)) in left_nodes.iter().zip(right_nodes).enumerate() {
        diffs.extend(node_differences(index, ln, rn));
    }

    if l.get("connections") != r.get("connections") {
        diffs.push(Difference::new(
            "connections",
            describe_connections(l.get("connections"), r.get("connections")),
        ));
    }

    if l.get("settings") != r.get("settings") {
        let keys = differing_keys(
            l.get("settings").unwrap_or(&Value::Null),
            r.get("settings").unwrap_or(&Value::Null),
        );
        let description = if keys.is_empty() {
            "settings differ".to_string()
        } else {
            format!("settings keys differ: {}", keys.join(", "))
        };
        diffs.push(Difference::new("settings", description));
    }

    diffs
}

fn node_differences(index: usize, left: &Value, right: &Value) -> Vec<Difference> {
    let mut diffs = Vec::new();
    let field = |suffix: &str| format!("nodes[{}].{}", index, suffix);

    if left["name"] != right["name"] {
        diffs.push(Difference::new(
            field("name"),
            format!("{} != {}", left["name"], right["name"]),
        ));
        // Different nodes; comparing their contents only adds noise.
        return diffs;
    }
    let name = left["name"].as_str().unwrap_or_default();

    if left["type"] != right["type"] {
        diffs.push(Difference::new(
            field("type"),
            format!("'{}': {} != {}", name, left["type"], right["type"]),
        ));
    }
    if left["typeVersion"] != right["typeVersion"] {
        diffs.push(Difference::new(
            field("typeVersion"),
            format!("'{}': {} != {}", name, left["typeVersion"], right["typeVersion"]),
        ));
    }

    for flag in ["disabled", "executeOnce", "continueOnFail", "retryOnFail"] {
        if left.get(flag) != right.get(flag) {
            diffs.push(Difference::new(
                field(flag),
                format!("'{}': flag toggled", name),
            ));
        }
    }

    if left.get("credentials") != right.get("credentials") {
        diffs.push(Difference::new(
            field("credentials"),
            format!("'{}': credential references differ", name),
        ));
    }

    let empty = Map::new();
    let lp = left["parameters"].as_object().unwrap_or(&empty);
    let rp = right["parameters"].as_object().unwrap_or(&empty);
    let lkeys: BTreeSet<&String> = lp.keys().collect();
    let rkeys: BTreeSet<&String> = rp.keys().collect();

    let only_left: Vec<&str> = lkeys.difference(&rkeys).map(|k| k.as_str()).collect();
    let only_right: Vec<&str> = rkeys.difference(&lkeys).map(|k| k.as_str()).collect();
    if !only_left.is_empty() || !only_right.is_empty() {
        diffs.push(Difference::new(
            field("parameters"),
            format!(
                "'{}': keys only on left [{}], only on right [{}]",
                name,
                only_left.join(", "),
                only_right.join(", ")
            ),
        ));
    }

    let changed: Vec<&str> = lkeys
        .intersection(&rkeys)
        .filter(|k| lp.get(k.as_str()) != rp.get(k.as_str()))
        .map(|k| k.as_str())
        .collect();
    if !changed.is_empty() {
        diffs.push(Difference::new(
            field("parameters"),
            format!("'{}': values differ for [{}]", name, changed.join(", ")),
        ));
    }

    diffs
}

fn describe_connections(left: Option<&Value>, right: Option<&Value>) -> String {
    let sources = |v: Option<&Value>| -> BTreeSet<String> {
        v.and_then(Value::as_object)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    };
    let (ls, rs) = (sources(left), sources(right));
    let mut changed: Vec<String> = ls.symmetric_difference(&rs).cloned().collect();
    for source in ls.intersection(&rs) {
        if left.map(|v| &v[source]) != right.map(|v| &v[source]) {
            changed.push(source.clone());
        }
    }
    changed.sort();
    format!("edges differ for source nodes [{}]", changed.join(", "))
}

/// Top-level keys whose values differ between two JSON objects.
fn differing_keys(left: &Value, right: &Value) -> Vec<String> {
    let empty = Map::new();
    let lm = left.as_object().unwrap_or(&empty);
    let rm = right.as_object().unwrap_or(&empty);
    let keys: BTreeSet<&String> = lm.keys().chain(rm.keys()).collect();
    keys.into_iter()
        .filter(|k| lm.get(k.as_str()) != rm.get(k.as_str()))
        .cloned()
        .collect()
}
