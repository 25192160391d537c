pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod models;
pub mod repositories;
pub mod services;
pub mod templates;
pub mod workflow;

pub use config::Config;
pub use database::get_db_connection;
pub use error::{GatewayError, StoreError, SyncError};
pub use models::*;
pub use services::{SyncEvent, SyncObserver, SyncReport, TracingObserver, WorkflowService};
pub use templates::WorkflowTemplates;
