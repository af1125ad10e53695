use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use agentflow_core::error::WorkflowExecutionError;
use agentflow_core::event::EventBus;
use agentflow_core::traits::Agent;
use agentflow_core::types::AgentEvent;

use crate::result::{OrchestrationResult, StepReport};

/// Runs agents one after another, feeding each output unchanged into the next
/// agent. Stops at the first failure.
#[derive(Default)]
pub struct SequentialRunner {
    cancel: CancellationToken,
    event_bus: Option<Arc<EventBus>>,
}

impl SequentialRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub async fn execute(
        &self,
        steps: &[Arc<dyn Agent>],
        initial_input: Value,
    ) -> Result<Value, WorkflowExecutionError> {
        self.run(steps, initial_input).await.outcome
    }

    pub async fn run(
        &self,
        steps: &[Arc<dyn Agent>],
        initial_input: Value,
    ) -> OrchestrationResult {
        let start = Instant::now();
        let mut reports = Vec::with_capacity(steps.len());
        let mut executed = 0;
        let outcome = self
            .drive(steps, initial_input, &mut reports, &mut executed)
            .await;
        let total_elapsed_ms = start.elapsed().as_millis() as u64;
        if let Err(e) = &outcome {
            error!(error = %e, total_elapsed_ms, "Sequential workflow failed");
        }
        OrchestrationResult {
            outcome,
            steps: reports,
            steps_executed: executed,
            total_elapsed_ms,
        }
    }

    async fn drive(
        &self,
        steps: &[Arc<dyn Agent>],
        initial_input: Value,
        reports: &mut Vec<StepReport>,
        executed: &mut usize,
    ) -> Result<Value, WorkflowExecutionError> {
        if steps.is_empty() {
            return Err(WorkflowExecutionError::EmptySequence);
        }

        let mut current = initial_input;
        for (index, agent) in steps.iter().enumerate() {
            let id = agent.id();
            info!(step = index, agent = %id, total = steps.len(), "Running sequential step");
            self.emit(AgentEvent::NodeStarted {
                node_id: id.to_string(),
            });

            let started_at = Utc::now();
            let step_start = Instant::now();
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = agent.run(current) => Some(result),
            };
            let elapsed_ms = step_start.elapsed().as_millis() as u64;

            match result {
                None => {
                    reports.push(StepReport::cancelled(id, id, started_at));
                    return Err(WorkflowExecutionError::Cancelled);
                }
                Some(Ok(output)) => {
                    *executed += 1;
                    reports.push(StepReport::completed(id, id, started_at, elapsed_ms));
                    self.emit(AgentEvent::NodeCompleted {
                        node_id: id.to_string(),
                        elapsed_ms,
                    });
                    current = output;
                }
                Some(Err(e)) => {
                    *executed += 1;
                    reports.push(StepReport::failed(id, id, started_at, elapsed_ms, &e));
                    self.emit(AgentEvent::NodeFailed {
                        node_id: id.to_string(),
                        error: e.to_string(),
                    });
                    return Err(WorkflowExecutionError::NodeFailure {
                        node_id: id.to_string(),
                        source: e,
                    });
                }
            }
        }
        Ok(current)
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::error::AgentError;
    use agentflow_test_utils::RecordingAgent;
    use serde_json::json;

    #[tokio::test]
    async fn empty_sequence_is_an_error() {
        let err = SequentialRunner::new()
            .execute(&[], json!("x"))
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowExecutionError::EmptySequence);
    }

    #[tokio::test]
    async fn single_step() {
        let only: Arc<dyn Agent> = Arc::new(RecordingAgent::new("upper", |v| {
            Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))
        }));
        let out = SequentialRunner::new()
            .execute(&[only], json!("shout"))
            .await
            .unwrap();
        assert_eq!(out, json!("SHOUT"));
    }

    #[tokio::test]
    async fn failure_report_names_the_step() {
        let bad: Arc<dyn Agent> = Arc::new(RecordingAgent::failing(
            "bad",
            AgentError::ProviderError {
                iteration: 0,
                message: "503".into(),
            },
        ));
        let result = SequentialRunner::new().run(&[bad], json!(null)).await;
        assert_eq!(result.error().and_then(|e| e.node_id()), Some("bad"));
        assert_eq!(result.steps_executed, 1);
        assert!(result.step("bad").unwrap().error.as_deref().unwrap().contains("503"));
    }
}
