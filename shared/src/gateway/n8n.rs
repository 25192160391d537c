//! n8n public API (v1) adapter.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

use super::transport::{Transport, TransportResponse};
use super::{RemoteWorkflowState, RemoteWorkflowSummary, WorkflowGateway};
use crate::error::GatewayError;
use crate::workflow::{WorkflowDefinition, HTTP_HEADER_AUTH};

const WORKFLOWS: &str = "/api/v1/workflows";
const CREDENTIALS: &str = "/api/v1/credentials";

pub struct N8nGateway<T> {
    transport: T,
}

impl<T: Transport> N8nGateway<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        resource: &str,
    ) -> Result<Value, GatewayError> {
        let response = self.transport.request(method, path, body).await?;
        check_status(response, resource)
    }

    async fn find_credential(&self, name: &str) -> Result<Option<String>, GatewayError> {
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        loop {
            let path = match &cursor {
                Some(c) => format!(
                    "{}?cursor={}",
                    CREDENTIALS,
                    form_urlencoded::byte_serialize(c.as_bytes()).collect::<String>()
                ),
                None => CREDENTIALS.to_string(),
            };
            let page = self.call(Method::GET, &path, None, CREDENTIALS).await?;

            let found = page
                .get("data")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .find(|c| c.get("name").and_then(Value::as_str) == Some(name))
                .and_then(|c| c.get("id"))
                .and_then(id_string);
            if found.is_some() {
                return Ok(found);
            }

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            match &cursor {
                None => return Ok(None),
                Some(c) if !seen.insert(c.clone()) => {
                    return Err(GatewayError::Decode(format!(
                        "credential listing repeated cursor '{}'",
                        c
                    )))
                }
                Some(_) => {}
            }
        }
    }
}

#[async_trait]
impl<T: Transport> WorkflowGateway for N8nGateway<T> {
    async fn create(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<RemoteWorkflowSummary, GatewayError> {
        let body = self
            .call(Method::POST, WORKFLOWS, Some(workflow_payload(definition)?), WORKFLOWS)
            .await?;
        summary_from(&body)
    }

    async fn get_full(&self, remote_id: &str) -> Result<RemoteWorkflowState, GatewayError> {
        let path = format!("{}/{}", WORKFLOWS, remote_id);
        let body = self.call(Method::GET, &path, None, remote_id).await?;

        let active = body.get("active").and_then(Value::as_bool).unwrap_or(false);
        let definition: WorkflowDefinition =
            serde_json::from_value(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(RemoteWorkflowState {
            remote_id: remote_id.to_string(),
            active,
            definition,
        })
    }

    async fn update(
        &self,
        remote_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<RemoteWorkflowSummary, GatewayError> {
        let path = format!("{}/{}", WORKFLOWS, remote_id);
        let body = self
            .call(Method::PUT, &path, Some(workflow_payload(definition)?), remote_id)
            .await?;
        summary_from(&body)
    }

    async fn activate(&self, remote_id: &str) -> Result<(), GatewayError> {
        let path = format!("{}/{}/activate", WORKFLOWS, remote_id);
        self.call(Method::POST, &path, None, remote_id).await?;
        Ok(())
    }

    async fn deactivate(&self, remote_id: &str) -> Result<(), GatewayError> {
        let path = format!("{}/{}/deactivate", WORKFLOWS, remote_id);
        self.call(Method::POST, &path, None, remote_id).await?;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> Result<(), GatewayError> {
        let path = format!("{}/{}", WORKFLOWS, remote_id);
        self.call(Method::DELETE, &path, None, remote_id).await?;
        Ok(())
    }

    async fn upsert_credential(&self, name: &str, secret: &str) -> Result<String, GatewayError> {
        let payload = json!({
            "name": name,
            "type": HTTP_HEADER_AUTH,
            "data": { "name": "Authorization", "value": format!("Bearer {}", secret) },
        });

        let body = match self.find_credential(name).await? {
            Some(id) => {
                let path = format!("{}/{}", CREDENTIALS, id);
                let body = self.call(Method::PATCH, &path, Some(payload), name).await?;
                // Some engine versions answer an update with an empty body.
                if body.get("id").is_none() {
                    return Ok(id);
                }
                body
            }
            None => self.call(Method::POST, CREDENTIALS, Some(payload), name).await?,
        };

        body.get("id")
            .and_then(id_string)
            .ok_or_else(|| GatewayError::Decode(format!("credential '{}' response has no id", name)))
    }
}

fn check_status(response: TransportResponse, resource: &str) -> Result<Value, GatewayError> {
    match response.status {
        _ if response.is_success() => Ok(response.body),
        404 => Err(GatewayError::NotFound(resource.to_string())),
        status @ 400..=499 => Err(GatewayError::RemoteRejected {
            status,
            message: response.message(),
        }),
        status => Err(GatewayError::Unavailable {
            status,
            message: response.message(),
        }),
    }
}

/// Only the fields the engine accepts on write; everything it manages itself
/// (id, active, version, timestamps) is left out.
fn workflow_payload(definition: &WorkflowDefinition) -> Result<Value, GatewayError> {
    let mut payload = Map::new();
    payload.insert("name".to_string(), Value::String(definition.name.clone()));
    payload.insert("nodes".to_string(), encode(&definition.nodes)?);
    payload.insert("connections".to_string(), encode(&definition.connections)?);
    payload.insert(
        "settings".to_string(),
        definition.settings.clone().unwrap_or_else(|| json!({})),
    );
    if let Some(static_data) = &definition.static_data {
        payload.insert("staticData".to_string(), static_data.clone());
    }
    if let Some(tags) = definition.tags.as_ref().filter(|t| !t.is_empty()) {
        payload.insert("tags".to_string(), Value::Array(tags.clone()));
    }
    Ok(Value::Object(payload))
}

fn encode<S: Serialize>(value: &S) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn summary_from(body: &Value) -> Result<RemoteWorkflowSummary, GatewayError> {
    let remote_id = body
        .get("id")
        .and_then(id_string)
        .ok_or_else(|| GatewayError::Decode("workflow response has no id".to_string()))?;

    Ok(RemoteWorkflowSummary {
        remote_id,
        name: body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        active: body.get("active").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Engine ids are strings in current versions and numbers in older ones.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
