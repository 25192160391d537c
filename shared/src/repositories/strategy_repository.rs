use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};

use crate::entity::strategies;
use crate::error::StoreError;
use crate::models::StrategyRecord;

/// Local persistence the reconciler needs from the strategy subsystem.
#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Every strategy that can be reconciled. Rows that fail to parse are skipped.
    async fn list_all(&self) -> Result<Vec<StrategyRecord>, StoreError>;

    async fn find_by_id(&self, id: u64) -> Result<Option<StrategyRecord>, StoreError>;

    /// Sets (or clears) the remote workflow id in a single-statement transaction.
    async fn set_remote_workflow_id(
        &self,
        id: u64,
        remote_workflow_id: Option<&str>,
    ) -> Result<(), StoreError>;
}

pub struct StrategyRepository {
    db: Arc<DatabaseConnection>,
}

impl StrategyRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StrategyStore for StrategyRepository {
    async fn list_all(&self) -> Result<Vec<StrategyRecord>, StoreError> {
        let models = strategies::Entity::find()
            .all(self.db.as_ref())
            .await?;

        let mut records = Vec::with_capacity(models.len());
        for model in models {
            let id = model.id;
            match StrategyRecord::try_from(model) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping strategy {} with invalid row: {}", id, e),
            }
        }
        Ok(records)
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<StrategyRecord>, StoreError> {
        let model = strategies::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?;
        Ok(model.map(StrategyRecord::try_from).transpose()?)
    }

    async fn set_remote_workflow_id(
        &self,
        id: u64,
        remote_workflow_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        let result = strategies::Entity::update_many()
            .col_expr(
                strategies::Column::RemoteWorkflowId,
                Expr::value(remote_workflow_id.map(str::to_string)),
            )
            .col_expr(strategies::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(strategies::Column::Id.eq(id))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(StoreError::NotFound(id));
        }

        txn.commit().await?;
        Ok(())
    }
}
