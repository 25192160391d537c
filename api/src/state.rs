use std::sync::Arc;

use shared::{get_db_connection, Config, WorkflowService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, anyhow::Error> {
        let db = get_db_connection(&config.database_url).await?;
        tracing::info!("Connected to database successfully");

        let service = WorkflowService::from_config(config, Arc::new(db))?;

        Ok(AppState {
            service: Arc::new(service),
        })
    }
}
