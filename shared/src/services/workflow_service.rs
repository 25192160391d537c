use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{GatewayError, SyncError};
use crate::gateway::{N8nGateway, RemoteWorkflowState, ReqwestTransport, WorkflowGateway};
use crate::models::{StrategyRecord, StrategyStatus};
use crate::repositories::{StrategyRepository, StrategyStore};
use crate::services::events::{SyncEvent, SyncObserver, SyncReport, TracingObserver};
use crate::templates::WorkflowTemplates;
use crate::workflow::{
    are_different, explain, CredentialHandle, Difference, Injector, WorkflowDefinition,
};

/// What a single reconciliation did to the remote workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Unchanged,
    Updated,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciled {
    pub remote_id: String,
    pub outcome: SyncOutcome,
}

/// Keeps each strategy's remote workflow in line with its rendered template.
pub struct WorkflowService {
    gateway: Arc<dyn WorkflowGateway>,
    store: Arc<dyn StrategyStore>,
    injector: Injector,
    templates: WorkflowTemplates,
    credential_prefix: String,
    observer: Arc<dyn SyncObserver>,
}

impl WorkflowService {
    pub fn new(
        gateway: Arc<dyn WorkflowGateway>,
        store: Arc<dyn StrategyStore>,
        injector: Injector,
        templates: WorkflowTemplates,
        credential_prefix: &str,
    ) -> Self {
        Self {
            gateway,
            store,
            injector,
            templates,
            credential_prefix: credential_prefix.to_string(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Wires the n8n gateway and the MySQL store from configuration.
    pub fn from_config(config: &Config, db: Arc<DatabaseConnection>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(
            &config.n8n_api_url,
            &config.n8n_api_key,
            config.n8n_request_timeout_secs,
        )
        .context("Failed to build n8n HTTP client")?;
        let injector = Injector::new(
            &config.api_base_url,
            &config.api_path_prefix,
            &config.stale_api_origins,
        )
        .context("Invalid API_BASE_URL, API_PATH_PREFIX or STALE_API_ORIGINS")?;

        Ok(Self::new(
            Arc::new(N8nGateway::new(transport)),
            Arc::new(StrategyRepository::new(db)),
            injector,
            WorkflowTemplates::new(&config.api_path_prefix),
            &config.credential_name_prefix,
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &Arc<dyn StrategyStore> {
        &self.store
    }

    /// One engine credential per owner, shared by all of their strategies.
    pub fn credential_name(&self, record: &StrategyRecord) -> String {
        format!("{}-user-{}", self.credential_prefix, record.user_id)
    }

    /// Returns the id of a remote workflow serving `record`, creating it if needed.
    pub async fn ensure_workflow_exists(
        &self,
        record: &StrategyRecord,
        auth_token: Option<&str>,
    ) -> Result<String, SyncError> {
        self.reconcile(record, auth_token)
            .await
            .map(|reconciled| reconciled.remote_id)
    }

    /// Same as [`WorkflowService::ensure_workflow_exists`], reporting what changed.
    pub async fn reconcile(
        &self,
        record: &StrategyRecord,
        auth_token: Option<&str>,
    ) -> Result<Reconciled, SyncError> {
        if let Some(remote_id) = record.remote_workflow_id.as_deref() {
            match self.gateway.get_full(remote_id).await {
                Ok(state) => {
                    let changed = self.repair(record, state, auth_token).await?;
                    let outcome = if changed {
                        SyncOutcome::Updated
                    } else {
                        self.emit(SyncEvent::Unchanged {
                            strategy_id: record.id,
                            remote_id: remote_id.to_string(),
                        });
                        SyncOutcome::Unchanged
                    };
                    return Ok(Reconciled {
                        remote_id: remote_id.to_string(),
                        outcome,
                    });
                }
                Err(GatewayError::NotFound(_)) => self.emit(SyncEvent::RemoteMissing {
                    strategy_id: record.id,
                    remote_id: remote_id.to_string(),
                }),
                Err(e) => return Err(e.into()),
            }
        }

        let auth_token = auth_token.ok_or(SyncError::MissingCredential {
            strategy_id: record.id,
        })?;
        let remote_id = self.create(record, auth_token).await?;
        Ok(Reconciled {
            remote_id,
            outcome: SyncOutcome::Created,
        })
    }

    /// Reconciles every stored strategy in turn. Per-strategy failures are counted,
    /// only a failure to list strategies aborts the pass.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_all", %run_id);

        async move {
            let records = self.store.list_all().await?;
            tracing::info!(strategies = records.len(), "Starting workflow sync pass");

            let mut report = SyncReport::default();
            for record in &records {
                match self.reconcile(record, None).await {
                    Ok(Reconciled {
                        outcome: SyncOutcome::Unchanged,
                        ..
                    }) => report.already_synced += 1,
                    Ok(_) => report.created_or_updated += 1,
                    Err(e) => {
                        report.errored += 1;
                        self.emit(SyncEvent::RecordFailed {
                            strategy_id: record.id,
                            reason: e.to_string(),
                        });
                    }
                }
            }

            self.emit(SyncEvent::BatchFinished {
                report: report.clone(),
            });
            Ok::<_, SyncError>(report)
        }
        .instrument(span)
        .await
    }

    /// Redeploys the latest template for `record` if it differs from what is running.
    pub async fn rebuild_from_template(
        &self,
        record: &StrategyRecord,
        auth_token: &str,
    ) -> Result<RemoteWorkflowState, SyncError> {
        let Some(remote_id) = record.remote_workflow_id.as_deref() else {
            return self.recreate_and_fetch(record, auth_token).await;
        };

        let deployed = match self.gateway.get_full(remote_id).await {
            Ok(state) => state,
            Err(GatewayError::NotFound(_)) => {
                self.emit(SyncEvent::RemoteMissing {
                    strategy_id: record.id,
                    remote_id: remote_id.to_string(),
                });
                return self.recreate_and_fetch(record, auth_token).await;
            }
            Err(e) => return Err(e.into()),
        };

        let expected = self.expected_definition(record)?;
        if !are_different(&expected, &deployed.definition) {
            self.emit(SyncEvent::Unchanged {
                strategy_id: record.id,
                remote_id: remote_id.to_string(),
            });
            return Ok(deployed);
        }
        let differences = explain(&deployed.definition, &expected);

        let credential_name = self.credential_name(record);
        let credential_id = self
            .gateway
            .upsert_credential(&credential_name, auth_token)
            .await?;
        let mut desired = self.injector.inject_credential(
            &self.injector.inject_endpoint(&self.templates.render(record)?),
            &credential_id,
            &credential_name,
        );
        carry_over_node_identity(&mut desired, &deployed.definition);
        desired.validate()?;

        self.replace(record, remote_id, &desired, deployed.active)
            .await?;
        self.emit(SyncEvent::Rebuilt {
            strategy_id: record.id,
            remote_id: remote_id.to_string(),
            differences,
        });

        Ok(RemoteWorkflowState {
            remote_id: remote_id.to_string(),
            active: deployed.active,
            definition: desired,
        })
    }

    /// Starts or pauses scheduled execution, creating the workflow first if needed.
    pub async fn set_execution_enabled(
        &self,
        record: &StrategyRecord,
        enabled: bool,
        auth_token: Option<&str>,
    ) -> Result<String, SyncError> {
        let remote_id = self.ensure_workflow_exists(record, auth_token).await?;
        if enabled {
            self.gateway.activate(&remote_id).await?;
        } else {
            self.gateway.deactivate(&remote_id).await?;
        }
        self.emit(SyncEvent::ActivationApplied {
            strategy_id: record.id,
            remote_id: remote_id.clone(),
            active: enabled,
        });
        Ok(remote_id)
    }

    /// What a rebuild would change, or `None` when no workflow is deployed.
    pub async fn explain_drift(
        &self,
        record: &StrategyRecord,
    ) -> Result<Option<Vec<Difference>>, SyncError> {
        let Some(remote_id) = record.remote_workflow_id.as_deref() else {
            return Ok(None);
        };
        let deployed = match self.gateway.get_full(remote_id).await {
            Ok(state) => state,
            Err(GatewayError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let expected = self.expected_definition(record)?;
        Ok(Some(explain(&deployed.definition, &expected)))
    }

    /// The template as it would be deployed, with a credential handle that only
    /// carries the name. Comparison ignores credential ids, so no remote call is needed.
    fn expected_definition(&self, record: &StrategyRecord) -> Result<WorkflowDefinition, SyncError> {
        let rendered = self.templates.render(record)?;
        let handle = CredentialHandle {
            id: None,
            name: self.credential_name(record),
        };
        Ok(self
            .injector
            .inject_credential_handle(&self.injector.inject_endpoint(&rendered), &handle))
    }

    /// Brings an existing workflow up to date. Returns whether it was updated.
    async fn repair(
        &self,
        record: &StrategyRecord,
        state: RemoteWorkflowState,
        auth_token: Option<&str>,
    ) -> Result<bool, SyncError> {
        let RemoteWorkflowState {
            remote_id,
            active,
            definition,
        } = state;
        let mut current = definition;
        let mut changed = false;

        if let Some(token) = auth_token {
            match self.rewire_credential(record, &remote_id, &current, active, token).await {
                Ok(Some(updated)) => {
                    current = updated;
                    changed = true;
                    self.emit(SyncEvent::CredentialWired {
                        strategy_id: record.id,
                        remote_id: remote_id.clone(),
                    });
                }
                Ok(None) => {}
                Err(e) => self.emit(SyncEvent::PartialDegradation {
                    strategy_id: record.id,
                    remote_id: remote_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        let refreshed = self.injector.inject_endpoint(&current);
        if are_different(&current, &refreshed) {
            self.replace(record, &remote_id, &refreshed, active).await?;
            changed = true;
            self.emit(SyncEvent::EndpointRefreshed {
                strategy_id: record.id,
                remote_id,
            });
        }

        Ok(changed)
    }

    /// Points own-API nodes at the owner's credential. Returns the updated definition
    /// when the remote one had to change.
    async fn rewire_credential(
        &self,
        record: &StrategyRecord,
        remote_id: &str,
        current: &WorkflowDefinition,
        active: bool,
        auth_token: &str,
    ) -> Result<Option<WorkflowDefinition>, SyncError> {
        let credential_name = self.credential_name(record);
        let credential_id = self
            .gateway
            .upsert_credential(&credential_name, auth_token)
            .await?;
        let wired = self
            .injector
            .inject_credential(current, &credential_id, &credential_name);

        // A recreated credential keeps its name but not its id.
        if !are_different(current, &wired) && credential_refs(current) == credential_refs(&wired) {
            return Ok(None);
        }

        wired.validate()?;
        self.replace(record, remote_id, &wired, active).await?;
        Ok(Some(wired))
    }

    async fn create(&self, record: &StrategyRecord, auth_token: &str) -> Result<String, SyncError> {
        let credential_name = self.credential_name(record);
        let rendered = self.injector.inject_endpoint(&self.templates.render(record)?);
        let credential_id = self
            .gateway
            .upsert_credential(&credential_name, auth_token)
            .await?;
        let desired = self
            .injector
            .inject_credential(&rendered, &credential_id, &credential_name);
        desired.validate()?;

        let summary = self.gateway.create(&desired).await?;
        let remote_id = summary.remote_id;

        if let Err(source) = self
            .store
            .set_remote_workflow_id(record.id, Some(&remote_id))
            .await
        {
            match self.gateway.delete(&remote_id).await {
                Ok(()) => self.emit(SyncEvent::Compensated {
                    strategy_id: record.id,
                    remote_id: remote_id.clone(),
                }),
                Err(e) => self.emit(SyncEvent::CompensationFailed {
                    strategy_id: record.id,
                    remote_id: remote_id.clone(),
                    reason: e.to_string(),
                }),
            }
            return Err(SyncError::LocalPersistence {
                strategy_id: record.id,
                remote_id,
                source,
            });
        }
        self.emit(SyncEvent::Created {
            strategy_id: record.id,
            remote_id: remote_id.clone(),
        });

        if record.status == StrategyStatus::Active && !summary.active {
            match self.gateway.activate(&remote_id).await {
                Ok(()) => self.emit(SyncEvent::ActivationApplied {
                    strategy_id: record.id,
                    remote_id: remote_id.clone(),
                    active: true,
                }),
                Err(e) => self.emit(SyncEvent::PartialDegradation {
                    strategy_id: record.id,
                    remote_id: remote_id.clone(),
                    reason: format!("activation failed: {}", e),
                }),
            }
        }

        Ok(remote_id)
    }

    /// Full replace followed by re-applying the activation flag the workflow had.
    async fn replace(
        &self,
        record: &StrategyRecord,
        remote_id: &str,
        definition: &WorkflowDefinition,
        was_active: bool,
    ) -> Result<(), SyncError> {
        let summary = self.gateway.update(remote_id, definition).await?;

        if was_active {
            self.gateway.activate(remote_id).await?;
        } else if summary.active {
            self.gateway.deactivate(remote_id).await?;
        } else {
            return Ok(());
        }
        self.emit(SyncEvent::ActivationApplied {
            strategy_id: record.id,
            remote_id: remote_id.to_string(),
            active: was_active,
        });
        Ok(())
    }

    async fn recreate_and_fetch(
        &self,
        record: &StrategyRecord,
        auth_token: &str,
    ) -> Result<RemoteWorkflowState, SyncError> {
        let fresh = StrategyRecord {
            remote_workflow_id: None,
            ..record.clone()
        };
        let remote_id = self.ensure_workflow_exists(&fresh, Some(auth_token)).await?;
        Ok(self.gateway.get_full(&remote_id).await?)
    }

    fn emit(&self, event: SyncEvent) {
        self.observer.observe(&event);
    }
}

fn credential_refs(
    definition: &WorkflowDefinition,
) -> Vec<Option<&BTreeMap<String, CredentialHandle>>> {
    definition
        .nodes
        .iter()
        .map(|node| node.credentials.as_ref())
        .collect()
}

/// Keeps engine-assigned node ids and webhook ids for nodes that survive a rebuild, so
/// webhook addresses stay stable.
fn carry_over_node_identity(desired: &mut WorkflowDefinition, deployed: &WorkflowDefinition) {
    for node in &mut desired.nodes {
        if let Some(previous) = deployed.node(&node.name) {
            if previous.node_type != node.node_type {
                continue;
            }
            if node.id.is_none() {
                node.id = previous.id.clone();
            }
            if node.webhook_id.is_none() {
                node.webhook_id = previous.webhook_id.clone();
            }
        }
    }
}
