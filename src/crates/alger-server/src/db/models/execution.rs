//! Execution and execution-event models.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use sqlx::FromRow;

/// Lifecycle state of an execution.
///
/// Transitions only run `queued|running -> finished|failed|stopped`;
/// terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Finished,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Finished => "finished",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Finished | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "finished" => Ok(ExecutionStatus::Finished),
            "failed" => Ok(ExecutionStatus::Failed),
            "stopped" => Ok(ExecutionStatus::Stopped),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// One pipeline run and its persisted outcome.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: String,
    pub pipeline_id: Option<String>,
    /// `db` or `payload`
    pub source: String,
    pub graph: Option<String>,
    pub params: Option<String>,
    pub status: String,
    pub requested_by: Option<String>,
    pub output_file: Option<String>,
    pub output_content: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl Execution {
    /// Parsed status; unknown text maps to `Failed`.
    pub fn status(&self) -> ExecutionStatus {
        self.status.parse().unwrap_or(ExecutionStatus::Failed)
    }

    /// Decoded graph payload, `{}` when unset.
    pub fn graph_json(&self) -> Json {
        self.graph
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}))
    }

    /// Decoded params object, `{}` when unset.
    pub fn params_json(&self) -> Json {
        self.params
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}))
    }
}

/// Append-only event attached to an execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionEvent {
    pub id: i64,
    pub execution_id: Option<String>,
    pub event_type: String,
    pub description: Option<String>,
    pub payload: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "running".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::Running
        );
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Finished.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Stopped.is_terminal());
    }
}
