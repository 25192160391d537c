//! Error taxonomy of the workflow reconciler.

use sea_orm::DbErr;
use thiserror::Error;

use crate::models::ModelError;
use crate::templates::TemplateError;
use crate::workflow::DefinitionError;

/// Failures reported by a [`crate::gateway::WorkflowGateway`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote engine does not know the workflow (or credential).
    #[error("remote resource '{0}' not found")]
    NotFound(String),

    /// The engine refused the request, typically because of the payload shape.
    #[error("remote engine rejected the request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    /// The engine failed on its side.
    #[error("remote engine unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response from remote engine: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Failures of the local strategy store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("strategy {0} not found")]
    NotFound(u64),

    #[error(transparent)]
    InvalidRecord(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A workflow cannot be created without an identity to bind its credential to.
    #[error("strategy {strategy_id} has no usable workflow and no auth token to create one")]
    MissingCredential { strategy_id: u64 },

    /// Raised after the compensating delete of the freshly created workflow.
    #[error("failed to record workflow '{remote_id}' for strategy {strategy_id}: {source}")]
    LocalPersistence {
        strategy_id: u64,
        remote_id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}
