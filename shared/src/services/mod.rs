pub mod events;
pub mod workflow_service;

pub use events::{SyncEvent, SyncObserver, SyncReport, TracingObserver};
pub use workflow_service::{Reconciled, SyncOutcome, WorkflowService};
