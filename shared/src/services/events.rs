//! Observations emitted while reconciling workflows.
//!
//! The reconciler reports what it did through [`SyncObserver`] instead of logging
//! inline, so tests can assert on events and deployments decide how to render them.

use serde::Serialize;

use crate::workflow::Difference;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub already_synced: usize,
    pub created_or_updated: usize,
    pub errored: usize,
}

impl SyncReport {
    pub fn total(&self) -> usize {
        self.already_synced + self.created_or_updated + self.errored
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The recorded workflow no longer exists on the engine.
    RemoteMissing { strategy_id: u64, remote_id: String },
    Created { strategy_id: u64, remote_id: String },
    CredentialWired { strategy_id: u64, remote_id: String },
    EndpointRefreshed { strategy_id: u64, remote_id: String },
    /// The deployed workflow already matches the template.
    Unchanged { strategy_id: u64, remote_id: String },
    Rebuilt {
        strategy_id: u64,
        remote_id: String,
        differences: Vec<Difference>,
    },
    ActivationApplied {
        strategy_id: u64,
        remote_id: String,
        active: bool,
    },
    /// A non-critical step failed; the strategy keeps running on its current workflow.
    PartialDegradation {
        strategy_id: u64,
        remote_id: String,
        reason: String,
    },
    /// The workflow created for a strategy was deleted after local persistence failed.
    Compensated { strategy_id: u64, remote_id: String },
    CompensationFailed {
        strategy_id: u64,
        remote_id: String,
        reason: String,
    },
    RecordFailed { strategy_id: u64, reason: String },
    BatchFinished { report: SyncReport },
}

pub trait SyncObserver: Send + Sync {
    fn observe(&self, event: &SyncEvent);
}

/// Renders events as `tracing` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn observe(&self, event: &SyncEvent) {
        match event {
            SyncEvent::RemoteMissing { strategy_id, remote_id } => {
                tracing::warn!(strategy_id, %remote_id, "Workflow missing on engine, recreating");
            }
            SyncEvent::Created { strategy_id, remote_id } => {
                tracing::info!(strategy_id, %remote_id, "Workflow created");
            }
            SyncEvent::CredentialWired { strategy_id, remote_id } => {
                tracing::info!(strategy_id, %remote_id, "Workflow credential updated");
            }
            SyncEvent::EndpointRefreshed { strategy_id, remote_id } => {
                tracing::info!(strategy_id, %remote_id, "Workflow endpoint refreshed");
            }
            SyncEvent::Unchanged { strategy_id, remote_id } => {
                tracing::debug!(strategy_id, %remote_id, "Workflow up to date");
            }
            SyncEvent::Rebuilt { strategy_id, remote_id, differences } => {
                for diff in differences {
                    tracing::debug!(strategy_id, %remote_id, field = %diff.field, "{}", diff.description);
                }
                tracing::info!(strategy_id, %remote_id, changes = differences.len(), "Workflow rebuilt from template");
            }
            SyncEvent::ActivationApplied { strategy_id, remote_id, active } => {
                tracing::info!(strategy_id, %remote_id, active, "Workflow activation applied");
            }
            SyncEvent::PartialDegradation { strategy_id, remote_id, reason } => {
                tracing::warn!(strategy_id, %remote_id, %reason, "Workflow partially reconciled");
            }
            SyncEvent::Compensated { strategy_id, remote_id } => {
                tracing::warn!(strategy_id, %remote_id, "Deleted workflow after failing to record it");
            }
            SyncEvent::CompensationFailed { strategy_id, remote_id, reason } => {
                tracing::error!(strategy_id, %remote_id, %reason, "Orphaned workflow left on engine");
            }
            SyncEvent::RecordFailed { strategy_id, reason } => {
                tracing::error!(strategy_id, %reason, "Failed to reconcile strategy workflow");
            }
            SyncEvent::BatchFinished { report } => {
                tracing::info!(
                    already_synced = report.already_synced,
                    created_or_updated = report.created_or_updated,
                    errored = report.errored,
                    "Workflow sync pass finished"
                );
            }
        }
    }
}
