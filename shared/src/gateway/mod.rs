//! Contract with the external automation engine that runs strategy workflows.

mod n8n;
mod transport;

pub use n8n::N8nGateway;
pub use transport::{ReqwestTransport, Transport, TransportResponse};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::GatewayError;
use crate::workflow::WorkflowDefinition;

/// What the engine reports back after a create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteWorkflowSummary {
    pub remote_id: String,
    pub name: String,
    pub active: bool,
}

/// A workflow as currently deployed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteWorkflowState {
    pub remote_id: String,
    pub active: bool,
    pub definition: WorkflowDefinition,
}

#[async_trait]
pub trait WorkflowGateway: Send + Sync {
    async fn create(&self, definition: &WorkflowDefinition)
        -> Result<RemoteWorkflowSummary, GatewayError>;

    /// Fails with [`GatewayError::NotFound`] when the id is unknown to the engine.
    async fn get_full(&self, remote_id: &str) -> Result<RemoteWorkflowState, GatewayError>;

    /// Full replace; there is no partial patch.
    async fn update(
        &self,
        remote_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<RemoteWorkflowSummary, GatewayError>;

    async fn activate(&self, remote_id: &str) -> Result<(), GatewayError>;

    async fn deactivate(&self, remote_id: &str) -> Result<(), GatewayError>;

    async fn delete(&self, remote_id: &str) -> Result<(), GatewayError>;

    /// Creates or replaces the named credential and returns its id.
    async fn upsert_credential(&self, name: &str, secret: &str) -> Result<String, GatewayError>;
}
