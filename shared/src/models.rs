use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entity::strategies;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unsupported execution frequency '{0}'")]
    InvalidFrequency(String),

    #[error("unknown strategy status '{0}'")]
    InvalidStatus(String),

    #[error("strategy {id} has malformed parameters: {message}")]
    InvalidParameters { id: u64, message: String },
}

/// How often a strategy's workflow fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Minutes(u32),
    Hours(u32),
    Days(u32),
    Weeks(u32),
}

impl Frequency {
    /// Interval unit and interval key understood by the engine's schedule trigger.
    pub fn schedule_rule(&self) -> (&'static str, &'static str, u32) {
        match *self {
            Frequency::Minutes(n) => ("minutes", "minutesInterval", n),
            Frequency::Hours(n) => ("hours", "hoursInterval", n),
            Frequency::Days(n) => ("days", "daysInterval", n),
            Frequency::Weeks(n) => ("weeks", "weeksInterval", n),
        }
    }
}

impl FromStr for Frequency {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_lowercase();
        match raw.as_str() {
            "hourly" => return Ok(Frequency::Hours(1)),
            "twice_daily" => return Ok(Frequency::Hours(12)),
            "daily" => return Ok(Frequency::Days(1)),
            "weekly" => return Ok(Frequency::Weeks(1)),
            _ => {}
        }

        let invalid = || ModelError::InvalidFrequency(s.to_string());
        let (split, _) = raw.char_indices().last().ok_or_else(invalid)?;
        let (count, unit) = raw.split_at(split);
        let count: u32 = count.parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }

        match unit {
            "m" => Ok(Frequency::Minutes(count)),
            "h" => Ok(Frequency::Hours(count)),
            "d" => Ok(Frequency::Days(count)),
            "w" => Ok(Frequency::Weeks(count)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Minutes(n) => write!(f, "{}m", n),
            Frequency::Hours(n) => write!(f, "{}h", n),
            Frequency::Days(n) => write!(f, "{}d", n),
            Frequency::Weeks(n) => write!(f, "{}w", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
}

impl FromStr for StrategyStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(StrategyStatus::Active),
            "paused" => Ok(StrategyStatus::Paused),
            "stopped" => Ok(StrategyStatus::Stopped),
            _ => Err(ModelError::InvalidStatus(s.to_string())),
        }
    }
}

/// A strategy as seen by the workflow reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: u64,
    pub user_id: i64,
    pub name: String,
    pub frequency: Frequency,
    pub status: StrategyStatus,
    pub parameters: Value,
    pub remote_workflow_id: Option<String>,
}

impl TryFrom<strategies::Model> for StrategyRecord {
    type Error = ModelError;

    fn try_from(model: strategies::Model) -> Result<Self, Self::Error> {
        let parameters = match model.content.as_deref().map(str::trim) {
            None | Some("") => Value::Object(Default::default()),
            Some(content) => {
                serde_json::from_str(content).map_err(|e| ModelError::InvalidParameters {
                    id: model.id,
                    message: e.to_string(),
                })?
            }
        };

        Ok(StrategyRecord {
            id: model.id,
            user_id: model.user_id,
            name: model.name,
            frequency: model.frequency.parse()?,
            status: model.status.parse()?,
            parameters,
            remote_workflow_id: model.remote_workflow_id.filter(|id| !id.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_parsing() {
        assert_eq!("5m".parse::<Frequency>().unwrap(), Frequency::Minutes(5));
        assert_eq!("4H".parse::<Frequency>().unwrap(), Frequency::Hours(4));
        assert_eq!("daily".parse::<Frequency>().unwrap(), Frequency::Days(1));
        assert_eq!("1w".parse::<Frequency>().unwrap(), Frequency::Weeks(1));
        assert!("0m".parse::<Frequency>().is_err());
        assert!("".parse::<Frequency>().is_err());
        assert!("10x".parse::<Frequency>().is_err());
        assert_eq!(Frequency::Hours(4).to_string(), "4h");
    }

    #[test]
    fn test_record_from_model() {
        let model = strategies::Model {
            id: 3,
            user_id: 11,
            name: "Momentum".to_string(),
            description: None,
            frequency: "1h".to_string(),
            status: "active".to_string(),
            content: Some(r#"{"risk_level":"medium"}"#.to_string()),
            remote_workflow_id: Some(String::new()),
            created_at: None,
            updated_at: None,
        };
        let record = StrategyRecord::try_from(model).unwrap();
        assert_eq!(record.frequency, Frequency::Hours(1));
        assert_eq!(record.status, StrategyStatus::Active);
        assert_eq!(record.parameters["risk_level"], "medium");
        assert_eq!(record.remote_workflow_id, None);
    }
}
