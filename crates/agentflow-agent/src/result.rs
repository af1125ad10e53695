use chrono::{DateTime, Utc};
use serde::Serialize;

use agentflow_core::error::WorkflowExecutionError;

/// How a single node or sequential step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
    /// Was in flight when a sibling failed or the run was cancelled.
    Cancelled,
}

/// Diagnostics for one step of a run.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub node_id: String,
    /// Agent invoked by the step; `None` when the step never ran.
    pub agent_id: Option<String>,
    pub status: StepStatus,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl StepReport {
    pub(crate) fn completed(
        node_id: &str,
        agent_id: &str,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            agent_id: Some(agent_id.to_string()),
            status: StepStatus::Completed,
            error: None,
            skip_reason: None,
            started_at,
            elapsed_ms,
        }
    }

    pub(crate) fn failed(
        node_id: &str,
        agent_id: &str,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        error: impl ToString,
    ) -> Self {
        Self {
            status: StepStatus::Failed,
            error: Some(error.to_string()),
            ..Self::completed(node_id, agent_id, started_at, elapsed_ms)
        }
    }

    pub(crate) fn cancelled(node_id: &str, agent_id: &str, started_at: DateTime<Utc>) -> Self {
        let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        Self {
            status: StepStatus::Cancelled,
            ..Self::completed(node_id, agent_id, started_at, elapsed_ms)
        }
    }

    pub(crate) fn skipped(node_id: &str, reason: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            agent_id: None,
            status: StepStatus::Skipped,
            error: None,
            skip_reason: Some(reason.into()),
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }
}

/// Final output of a workflow run plus per-step diagnostics.
///
/// Diagnostics are kept even when the run fails. The outcome never carries
/// partial outputs: a failed run has no value.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub outcome: Result<serde_json::Value, WorkflowExecutionError>,
    /// Steps in the order they resolved.
    pub steps: Vec<StepReport>,
    pub steps_executed: usize,
    pub total_elapsed_ms: u64,
}

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn output(&self) -> Option<&serde_json::Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&WorkflowExecutionError> {
        self.outcome.as_ref().err()
    }

    pub fn into_output(self) -> Result<serde_json::Value, WorkflowExecutionError> {
        self.outcome
    }

    /// The last report for `node_id`.
    pub fn step(&self, node_id: &str) -> Option<&StepReport> {
        self.steps.iter().rev().find(|s| s.node_id == node_id)
    }

    /// Ids of steps that completed, in completion order.
    pub fn executed_nodes(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.node_id.as_str())
            .collect()
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
