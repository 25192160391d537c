//! Rewrites definitions so they call the current API deployment and authenticate
//! through a credential held by the engine instead of an inlined token.
//!
//! Both operations borrow their input and return a new definition.

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use super::definition::{CredentialHandle, Node, WorkflowDefinition, HTTP_HEADER_AUTH};

/// Placeholder spellings that templates and older workflows use for the API address.
const API_URL_PLACEHOLDERS: &[&str] = &[
    "{{ $env.API_URL }}",
    "{{$env.API_URL}}",
    "{{ $env[\"API_URL\"] }}",
    "{{ API_URL }}",
    "{{API_URL}}",
];

/// Hosts a local or in-cluster API deployment answers on, on any port.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "[::1]"];

/// What may follow the path prefix for it to count as a whole path segment.
const PREFIX_END: &str = r#"(?:[/?#"'\s]|$)"#;

#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("invalid API base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid stale API origin '{0}', expected http(s)://host[:port]")]
    StaleOrigin(String),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone)]
pub struct Injector {
    base_url: String,
    /// Absolute URLs on the base origin, a loopback host or a configured stale origin.
    own_api: Regex,
    /// Expression URLs whose host is itself an expression, e.g. `={{ $env.API_URL }}/...`.
    expression_api: Regex,
}

impl Injector {
    /// `base_url` is the canonical address of the API deployment, `path_prefix` the
    /// path under which its strategy endpoints live (e.g. `/api/v1/strategies`).
    /// `stale_origins` lists former deployments (`https://old.example.com`) whose
    /// URLs are repointed; loopback hosts are always treated as stale.
    pub fn new(
        base_url: &str,
        path_prefix: &str,
        stale_origins: &[String],
    ) -> Result<Self, InjectorError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let path_prefix = format!("/{}", path_prefix.trim_matches('/'));

        let base = Url::parse(&base_url).map_err(|source| InjectorError::BaseUrl {
            url: base_url.clone(),
            source,
        })?;
        let mut origins = vec![regex::escape(&base.origin().ascii_serialization())];
        origins.extend(
            LOOPBACK_HOSTS
                .iter()
                .map(|host| format!(r"https?://{}(?::\d+)?", regex::escape(host))),
        );
        for origin in stale_origins.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
            origins.push(regex::escape(&http_origin(origin)?));
        }

        let prefix = regex::escape(&path_prefix);
        let own_api = Regex::new(&format!(
            r#"(?P<origin>{})(?P<mount>(?:/[^\s"'{{}}?#]*?)?)(?P<path>{})(?P<tail>{})"#,
            origins.join("|"),
            prefix,
            PREFIX_END,
        ))?;
        let expression_api = Regex::new(&format!(
            r#"^=?\s*\{{\{{[^{{}}]*\}}\}}(?:/[^\s"'{{}}?#]*?)?{}{}"#,
            prefix, PREFIX_END,
        ))?;

        Ok(Self {
            base_url,
            own_api,
            expression_api,
        })
    }

    /// Points every reference to this system's API at the canonical base address.
    pub fn inject_endpoint(&self, definition: &WorkflowDefinition) -> WorkflowDefinition {
        let mut out = definition.clone();
        for node in &mut out.nodes {
            for value in node.parameters.values_mut().chain(node.extra.values_mut()) {
                self.rewrite_strings(value);
            }
        }
        for value in [out.settings.as_mut(), out.static_data.as_mut()]
            .into_iter()
            .flatten()
        {
            self.rewrite_strings(value);
        }
        out
    }

    /// Replaces inlined bearer tokens on calls to this system's API with a
    /// header-auth credential reference. Literal bearer headers on other HTTP
    /// nodes are dropped so the result carries no raw secret.
    pub fn inject_credential(
        &self,
        definition: &WorkflowDefinition,
        credential_id: &str,
        credential_name: &str,
    ) -> WorkflowDefinition {
        self.inject_credential_handle(definition, &CredentialHandle::new(credential_id, credential_name))
    }

    /// Like [`Injector::inject_credential`] with a prepared handle. A handle without an
    /// id is enough to compute the expected shape of a definition for comparison.
    pub fn inject_credential_handle(
        &self,
        definition: &WorkflowDefinition,
        handle: &CredentialHandle,
    ) -> WorkflowDefinition {
        let mut out = definition.clone();
        for node in out.nodes.iter_mut().filter(|n| n.is_http_request()) {
            if self.is_own_api_call(node) {
                attach_header_credential(node, handle);
            } else {
                drop_literal_bearer(node);
            }
        }
        out
    }

    /// Whether `node` is an HTTP request against this system's API.
    pub fn is_own_api_call(&self, node: &Node) -> bool {
        node.is_http_request() && node.url().map_or(false, |url| self.targets_own_api(url))
    }

    /// Only the leading address counts; an API URL embedded in a third-party query
    /// string does not make the call our own.
    pub fn targets_own_api(&self, url: &str) -> bool {
        let leading = |start: usize| url[..start].trim_start_matches('=').trim().is_empty();
        self.own_api.find(url).map_or(false, |m| leading(m.start())) || self.expression_api.is_match(url)
    }

    fn rewrite_strings(&self, value: &mut Value) {
        match value {
            Value::String(s) => {
                if let Some(rewritten) = self.rewrite_endpoint(s) {
                    *s = rewritten;
                }
            }
            Value::Array(items) => items.iter_mut().for_each(|v| self.rewrite_strings(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.rewrite_strings(v)),
            _ => {}
        }
    }

    /// Returns the rewritten string, or `None` when nothing needed to change.
    fn rewrite_endpoint(&self, input: &str) -> Option<String> {
        let mut text = input.to_string();
        for placeholder in API_URL_PLACEHOLDERS {
            if text.contains(placeholder) {
                text = text.replace(placeholder, &self.base_url);
            }
        }
        // A bare "=" expression marker with nothing left to evaluate is plain text.
        if text != input && text.starts_with('=') && !text.contains("{{") {
            text.remove(0);
        }

        let text = self
            .own_api
            .replace_all(&text, |caps: &Captures| {
                if format!("{}{}", &caps["origin"], &caps["mount"]) == self.base_url {
                    caps[0].to_string()
                } else {
                    format!("{}{}{}", self.base_url, &caps["path"], &caps["tail"])
                }
            })
            .into_owned();

        (text != input).then_some(text)
    }
}

/// Reduces a configured origin to `scheme://host[:port]`.
fn http_origin(raw: &str) -> Result<String, InjectorError> {
    let url = Url::parse(raw).map_err(|_| InjectorError::StaleOrigin(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(InjectorError::StaleOrigin(raw.to_string()));
    }
    Ok(url.origin().ascii_serialization())
}

/// Which `Authorization` headers a node loses.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Strip {
    All,
    LiteralBearer,
}

impl Strip {
    fn matches(self, name: &str, value: Option<&Value>) -> bool {
        name.trim().eq_ignore_ascii_case("authorization")
            && match self {
                Strip::All => true,
                Strip::LiteralBearer => value.and_then(Value::as_str).map_or(false, is_literal_bearer),
            }
    }
}

fn is_literal_bearer(value: &str) -> bool {
    let value = value.trim_start_matches('=').trim();
    !value.contains("{{")
        && value
            .get(..7)
            .map_or(false, |scheme| scheme.eq_ignore_ascii_case("bearer "))
}

#[derive(Debug, Default, Clone, Copy)]
struct Stripped {
    removed: bool,
    remaining: bool,
}

impl Stripped {
    fn merge(self, other: Stripped) -> Stripped {
        Stripped {
            removed: self.removed || other.removed,
            remaining: self.remaining || other.remaining,
        }
    }
}

fn attach_header_credential(node: &mut Node, handle: &CredentialHandle) {
    let params = &mut node.parameters;

    if !strip_headers(params, Strip::All).remaining {
        params.remove("sendHeaders");
        params.remove("specifyHeaders");
    }

    params.remove("nodeCredentialType");
    params.insert(
        "authentication".to_string(),
        Value::String("genericCredentialType".to_string()),
    );
    params.insert(
        "genericAuthType".to_string(),
        Value::String(HTTP_HEADER_AUTH.to_string()),
    );

    node.credentials
        .get_or_insert_with(Default::default)
        .insert(HTTP_HEADER_AUTH.to_string(), handle.clone());
}

/// Third-party calls keep their headers and auth mode; only inlined tokens go.
fn drop_literal_bearer(node: &mut Node) {
    let params = &mut node.parameters;
    let stripped = strip_headers(params, Strip::LiteralBearer);
    if stripped.removed && !stripped.remaining {
        params.remove("sendHeaders");
        params.remove("specifyHeaders");
    }
}

fn strip_headers(params: &mut Map<String, Value>, strip: Strip) -> Stripped {
    strip_header_list(params, "headerParameters", "parameters", strip)
        .merge(strip_header_list(params, "headerParametersUi", "parameter", strip))
        .merge(strip_header_json(params, "jsonHeaders", strip))
        .merge(strip_header_json(params, "headerParametersJson", strip))
}

/// Removes matching entries from a `{container: {list: [{name, value}]}}` header block.
fn strip_header_list(
    params: &mut Map<String, Value>,
    container: &str,
    list: &str,
    strip: Strip,
) -> Stripped {
    let Some(block) = params.get_mut(container) else {
        return Stripped::default();
    };
    let (removed, remaining) = match block.get_mut(list).and_then(Value::as_array_mut) {
        Some(entries) => {
            let before = entries.len();
            entries.retain(|entry| {
                let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
                !strip.matches(name, entry.get("value"))
            });
            (entries.len() != before, !entries.is_empty())
        }
        None => (false, false),
    };
    if !remaining && (removed || strip == Strip::All) {
        params.remove(container);
    }
    Stripped { removed, remaining }
}

/// Same as [`strip_header_list`] for headers given as a JSON document string.
fn strip_header_json(params: &mut Map<String, Value>, key: &str, strip: Strip) -> Stripped {
    let Some(raw) = params.get(key).and_then(Value::as_str) else {
        return Stripped::default();
    };
    let (marker, body) = match raw.strip_prefix('=') {
        Some(rest) => ("=", rest),
        None => ("", raw),
    };

    match serde_json::from_str::<Map<String, Value>>(body) {
        Ok(mut headers) => {
            let before = headers.len();
            headers.retain(|name, value| !strip.matches(name, Some(value)));
            let removed = headers.len() != before;
            if headers.is_empty() {
                if removed || strip == Strip::All {
                    params.remove(key);
                }
            } else if removed {
                let rendered = format!("{}{}", marker, Value::Object(headers.clone()));
                params.insert(key.to_string(), Value::String(rendered));
            }
            Stripped {
                removed,
                remaining: !headers.is_empty(),
            }
        }
        Err(_) if strip == Strip::All && raw.to_ascii_lowercase().contains("bearer") => {
            // Unparseable expression that still carries a token; drop it wholesale.
            params.remove(key);
            Stripped {
                removed: true,
                remaining: false,
            }
        }
        Err(_) => Stripped {
            removed: false,
            remaining: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://api.strategyflow.io";

    const PREFIX: &str = "/api/v1/strategies";

    fn injector() -> Injector {
        let stale = ["https://old.example.com/".to_string(), "http://apiserver:3001".to_string()];
        Injector::new(BASE, PREFIX, &stale).unwrap()
    }

    fn def(nodes: Value) -> WorkflowDefinition {
        WorkflowDefinition::from_json(json!({ "name": "wf", "nodes": nodes })).unwrap()
    }

    fn http(name: &str, parameters: Value) -> Value {
        json!({ "name": name, "type": "n8n-nodes-base.httpRequest", "typeVersion": 4.2, "parameters": parameters })
    }

    #[test]
    fn test_placeholder_is_replaced() {
        let d = def(json!([http("Call", json!({ "url": "={{ $env.API_URL }}/api/v1/strategies/4/analyze" }))]));
        let out = injector().inject_endpoint(&d);
        assert_eq!(
            out.nodes[0].url(),
            Some("https://api.strategyflow.io/api/v1/strategies/4/analyze")
        );
        // input untouched
        assert_eq!(
            d.nodes[0].url(),
            Some("={{ $env.API_URL }}/api/v1/strategies/4/analyze")
        );
    }

    #[test]
    fn test_placeholder_inside_live_expression_keeps_marker() {
        let d = def(json!([http("Call", json!({
            "url": "={{API_URL}}/api/v1/strategies/{{ $json.id }}/analyze"
        }))]));
        let out = injector().inject_endpoint(&d);
        assert_eq!(
            out.nodes[0].url(),
            Some("=https://api.strategyflow.io/api/v1/strategies/{{ $json.id }}/analyze")
        );
    }

    #[test]
    fn test_stale_hosts_are_repointed() {
        let d = def(json!([
            http("Local", json!({ "url": "http://localhost:3001/api/v1/strategies/4/context" })),
            http("Old", json!({ "url": "https://old.example.com/backend/api/v1/strategies/4/analyze?x=1" })),
            http("Other", json!({ "url": "https://data.vendor.com/v2/quotes" }))
        ]));
        let out = injector().inject_endpoint(&d);
        assert_eq!(out.nodes[0].url(), Some("https://api.strategyflow.io/api/v1/strategies/4/context"));
        assert_eq!(
            out.nodes[1].url(),
            Some("https://api.strategyflow.io/api/v1/strategies/4/analyze?x=1")
        );
        assert_eq!(out.nodes[2].url(), Some("https://data.vendor.com/v2/quotes"));
    }

    #[test]
    fn test_partner_hosts_are_not_own_api() {
        let d = def(json!([
            http("Partner", json!({ "url": "https://partner.example.com/api/v1/strategies/4" })),
            http("Redirect", json!({ "url": "https://partner.example.com/hook?next=/api/v1/strategies/4" })),
            http("Query", json!({ "url": "https://partner.example.com/cb?u=http://localhost:3001/api/v1/strategiesX" })),
            http("Embedded", json!({ "url": "https://partner.example.com/cb?u=http://localhost:3001/api/v1/strategies/4" })),
            http("Archive", json!({ "url": "https://api.strategyflow.io/api/v1/strategies-archive/4" })),
            http("Expr", json!({ "url": "={{ $json.partnerUrl }}/v2/strategies/4" }))
        ]));
        let inj = Injector::new(BASE, PREFIX, &[]).unwrap();

        let repointed = inj.inject_endpoint(&d);
        assert_eq!(
            repointed.nodes[3].url(),
            Some("https://partner.example.com/cb?u=https://api.strategyflow.io/api/v1/strategies/4")
        );
        for (i, (before, after)) in d.nodes.iter().zip(&repointed.nodes).enumerate() {
            if i != 3 {
                assert_eq!(before, after);
            }
        }
        assert!(d.nodes.iter().all(|n| !inj.is_own_api_call(n)));
        let out = inj.inject_credential(&d, "cred-1", "key");
        assert!(out.nodes.iter().all(|n| n.credentials.is_none()));
    }

    #[test]
    fn test_unconfigured_origin_is_not_repointed() {
        let d = def(json!([http("Old", json!({
            "url": "https://old.example.com/backend/api/v1/strategies/4/analyze"
        }))]));
        let inj = Injector::new(BASE, PREFIX, &[]).unwrap();
        assert_eq!(inj.inject_endpoint(&d), d);
    }

    #[test]
    fn test_invalid_stale_origin_is_rejected() {
        for origin in ["ftp://old.example.com", "old.example.com"] {
            let err = Injector::new(BASE, PREFIX, &[origin.to_string()]).unwrap_err();
            assert!(matches!(err, InjectorError::StaleOrigin(_)), "{origin}: {err}");
        }
        assert!(matches!(
            Injector::new("not a url", PREFIX, &[]),
            Err(InjectorError::BaseUrl { .. })
        ));
    }

    #[test]
    fn test_static_data_is_visited() {
        let mut d = def(json!([http("Call", json!({ "url": "https://example.org" }))]));
        d.static_data = Some(json!({ "node:Poll": { "callback": "http://localhost:3001/api/v1/strategies/4/poll" } }));
        let out = injector().inject_endpoint(&d);
        assert_eq!(
            out.static_data.unwrap()["node:Poll"]["callback"],
            json!("https://api.strategyflow.io/api/v1/strategies/4/poll")
        );
    }

    #[test]
    fn test_nested_strings_and_settings_are_visited() {
        let mut d = def(json!([http("Call", json!({
            "url": "https://example.org",
            "options": { "redirect": { "target": "http://apiserver:3001/api/v1/strategies/1" } }
        }))]));
        d.settings = Some(json!({ "errorWorkflowUrl": "{{API_URL}}/api/v1/strategies/errors" }));
        let out = injector().inject_endpoint(&d);
        assert_eq!(
            out.nodes[0].parameters["options"]["redirect"]["target"],
            json!("https://api.strategyflow.io/api/v1/strategies/1")
        );
        assert_eq!(
            out.settings.unwrap()["errorWorkflowUrl"],
            json!("https://api.strategyflow.io/api/v1/strategies/errors")
        );
    }

    #[test]
    fn test_inject_endpoint_is_idempotent() {
        let d = def(json!([
            http("A", json!({ "url": "={{ $env.API_URL }}/api/v1/strategies/4" })),
            http("B", json!({ "url": "http://127.0.0.1:8080/api/v1/strategies/4/x" }))
        ]));
        let inj = injector();
        let once = inj.inject_endpoint(&d);
        assert_eq!(inj.inject_endpoint(&once), once);
    }

    #[test]
    fn test_base_with_mount_path_is_stable() {
        let inj = Injector::new("https://host.io/backend/", "api/v1/strategies/", &[]).unwrap();
        let d = def(json!([http("A", json!({ "url": "https://host.io/backend/api/v1/strategies/9" }))]));
        assert_eq!(inj.inject_endpoint(&d), d);
    }

    #[test]
    fn test_credential_replaces_bearer_header() {
        let d = def(json!([
            http("Own", json!({
                "url": "https://api.strategyflow.io/api/v1/strategies/4/analyze",
                "sendHeaders": true,
                "headerParameters": { "parameters": [
                    { "name": "Authorization", "value": "Bearer sk_live_123" }
                ] }
            })),
            http("Json", json!({
                "url": "{{API_URL}}/api/v1/strategies/4/context",
                "sendHeaders": true,
                "specifyHeaders": "json",
                "jsonHeaders": "{\"authorization\": \"Bearer sk_live_123\", \"X-Trace\": \"1\"}"
            })),
            http("Foreign", json!({
                "url": "https://data.vendor.com/quotes",
                "sendHeaders": true,
                "headerParameters": { "parameters": [
                    { "name": "Authorization", "value": "Bearer vendor_secret" },
                    { "name": "Accept", "value": "application/json" }
                ] }
            }))
        ]));

        let out = injector().inject_credential(&d, "cred-1", "strategyflow-api-user-7");

        let own = &out.nodes[0];
        assert_eq!(own.parameters["authentication"], json!("genericCredentialType"));
        assert_eq!(own.parameters["genericAuthType"], json!("httpHeaderAuth"));
        assert!(own.parameters.get("headerParameters").is_none());
        assert!(own.parameters.get("sendHeaders").is_none());
        let handle = &own.credentials.as_ref().unwrap()["httpHeaderAuth"];
        assert_eq!(handle.id.as_deref(), Some("cred-1"));
        assert_eq!(handle.name, "strategyflow-api-user-7");

        let json_node = &out.nodes[1];
        assert_eq!(json_node.parameters["sendHeaders"], json!(true));
        assert_eq!(json_node.parameters["jsonHeaders"], json!("{\"X-Trace\":\"1\"}"));

        let foreign = &out.nodes[2];
        assert!(foreign.credentials.is_none());
        assert!(foreign.parameters.get("authentication").is_none());
        assert_eq!(foreign.parameters["sendHeaders"], json!(true));
        assert_eq!(
            foreign.parameters["headerParameters"]["parameters"],
            json!([{ "name": "Accept", "value": "application/json" }])
        );

        let rendered = serde_json::to_string(&out).unwrap();
        assert!(!rendered.contains("sk_live_123"));
        assert!(!rendered.contains("vendor_secret"));
        assert!(!rendered.to_lowercase().contains("bearer"));
    }

    #[test]
    fn test_expression_url_with_bearer_is_wired() {
        let d = def(json!([http("Expr", json!({
            "url": "={{ $json.apiBase }}/api/v1/strategies/{{ $json.id }}/analyze",
            "sendHeaders": true,
            "headerParameters": { "parameters": [
                { "name": "Authorization", "value": "=Bearer {{ $json.token }}" }
            ] }
        }))]));

        let out = injector().inject_credential(&d, "cred-1", "key");

        let node = &out.nodes[0];
        assert_eq!(node.parameters["genericAuthType"], json!("httpHeaderAuth"));
        assert!(node.parameters.get("headerParameters").is_none());
        assert!(node.credentials.as_ref().unwrap().contains_key("httpHeaderAuth"));
        assert!(!serde_json::to_string(&out).unwrap().to_lowercase().contains("bearer"));
    }

    #[test]
    fn test_name_only_handle_compares_equal_to_wired_definition() {
        let d = def(json!([http("Own", json!({
            "url": "https://api.strategyflow.io/api/v1/strategies/4/analyze"
        }))]));
        let inj = injector();
        let expected = inj.inject_credential_handle(
            &d,
            &CredentialHandle { id: None, name: "key".to_string() },
        );
        let wired = inj.inject_credential(&d, "cred-9", "key");

        assert!(expected.nodes[0].credentials.as_ref().unwrap()["httpHeaderAuth"].id.is_none());
        assert!(!crate::workflow::are_different(&expected, &wired));
    }

    #[test]
    fn test_inject_credential_is_stable() {
        let d = def(json!([http("Own", json!({
            "url": "https://api.strategyflow.io/api/v1/strategies/4/analyze",
            "headerParameters": { "parameters": [
                { "name": "Authorization", "value": "Bearer abc" },
                { "name": "Accept", "value": "application/json" }
            ] }
        }))]));
        let inj = injector();
        let once = inj.inject_credential(&d, "1", "key");
        assert_eq!(inj.inject_credential(&once, "1", "key"), once);
        assert_eq!(
            once.nodes[0].parameters["headerParameters"]["parameters"],
            json!([{ "name": "Accept", "value": "application/json" }])
        );
    }
}
