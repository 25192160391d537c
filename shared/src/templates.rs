use askama::Template;
use serde_json::json;
use thiserror::Error;

use crate::models::StrategyRecord;
use crate::workflow::{DefinitionError, WorkflowDefinition};

/// Placeholder the template uses for the API address; replaced by
/// [`crate::workflow::Injector::inject_endpoint`].
pub const API_URL_PLACEHOLDER: &str = "{{ $env.API_URL }}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to render workflow template: {0}")]
    Render(#[from] askama::Error),

    #[error("failed to encode template value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

#[derive(Template)]
#[template(path = "strategy_workflow.json", escape = "none")]
struct StrategyWorkflowTemplate<'a> {
    workflow_name: String,
    strategy_id: u64,
    api_url: &'a str,
    path_prefix: &'a str,
    schedule_field: &'a str,
    schedule_key: &'a str,
    schedule_count: u32,
    predictions_body: String,
}

/// Renders the workflow a strategy is expected to have deployed.
#[derive(Debug, Clone)]
pub struct WorkflowTemplates {
    path_prefix: String,
}

impl WorkflowTemplates {
    pub fn new(path_prefix: &str) -> Self {
        Self {
            path_prefix: format!("/{}", path_prefix.trim_matches('/')),
        }
    }

    pub fn workflow_name(record: &StrategyRecord) -> String {
        format!("Strategy {} - {}", record.id, record.name)
    }

    pub fn render(&self, record: &StrategyRecord) -> Result<WorkflowDefinition, TemplateError> {
        let (schedule_field, schedule_key, schedule_count) = record.frequency.schedule_rule();

        // jsonBody is itself a string holding a JSON document.
        let body = json!({
            "strategyId": record.id,
            "frequency": record.frequency.to_string(),
            "parameters": record.parameters,
        });
        let predictions_body = serde_json::to_string(&body.to_string())?;

        let rendered = StrategyWorkflowTemplate {
            workflow_name: serde_json::to_string(&Self::workflow_name(record))?,
            strategy_id: record.id,
            api_url: API_URL_PLACEHOLDER,
            path_prefix: &self.path_prefix,
            schedule_field,
            schedule_key,
            schedule_count,
            predictions_body,
        }
        .render()?;

        let definition: WorkflowDefinition = serde_json::from_str(&rendered)
            .map_err(|e| DefinitionError::Malformed(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, StrategyStatus};
    use crate::workflow::Injector;

    fn record() -> StrategyRecord {
        StrategyRecord {
            id: 42,
            user_id: 7,
            name: "Dividend \"Growth\"".to_string(),
            frequency: Frequency::Hours(4),
            status: StrategyStatus::Active,
            parameters: json!({ "risk_level": "low", "max_positions": 5 }),
            remote_workflow_id: None,
        }
    }

    #[test]
    fn test_render_produces_valid_definition() {
        let def = WorkflowTemplates::new("/api/v1/strategies").render(&record()).unwrap();
        assert_eq!(def.name, "Strategy 42 - Dividend \"Growth\"");
        assert_eq!(def.nodes.len(), 5);

        let trigger = def.node("Schedule Trigger").unwrap();
        assert_eq!(
            trigger.parameters["rule"]["interval"][0],
            json!({ "field": "hours", "hoursInterval": 4 })
        );

        let predictions = def.node("Generate Predictions").unwrap();
        assert_eq!(
            predictions.url(),
            Some("={{ $env.API_URL }}/api/v1/strategies/42/predictions")
        );
        let body: serde_json::Value =
            serde_json::from_str(predictions.parameters["jsonBody"].as_str().unwrap()).unwrap();
        assert_eq!(body["parameters"]["max_positions"], 5);

        let record_run = def.node("Record Run").unwrap();
        assert_eq!(record_run.parameters["jsonBody"], json!("={{ JSON.stringify($json) }}"));
        assert_eq!(record_run.continue_on_fail, Some(true));
    }

    #[test]
    fn test_rendered_urls_target_own_api() {
        let def = WorkflowTemplates::new("api/v1/strategies").render(&record()).unwrap();
        let injector = Injector::new("https://api.example.com", "/api/v1/strategies", &[]).unwrap();
        let own: Vec<&str> = def
            .nodes
            .iter()
            .filter(|n| injector.is_own_api_call(n))
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(own, vec!["Fetch Strategy Context", "Generate Predictions", "Record Run"]);

        let injected = injector.inject_endpoint(&def);
        assert_eq!(
            injected.node("Fetch Strategy Context").unwrap().url(),
            Some("https://api.example.com/api/v1/strategies/42/context")
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let templates = WorkflowTemplates::new("/api/v1/strategies");
        assert_eq!(
            templates.render(&record()).unwrap(),
            templates.render(&record()).unwrap()
        );
    }
}
