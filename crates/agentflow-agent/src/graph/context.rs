use std::collections::{BTreeSet, HashMap};

use agentflow_core::error::WorkflowExecutionError;

/// Per-run state of a DAG execution: node outputs, skipped nodes and the
/// step counter.
///
/// Outputs are write-once. A node id is either in `outputs`, in `skipped`, or
/// neither (not resolved yet).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    outputs: HashMap<String, serde_json::Value>,
    skipped: BTreeSet<String>,
    steps_executed: usize,
    max_steps: usize,
}

impl ExecutionContext {
    pub fn new(max_steps: usize) -> Self {
        Self {
            outputs: HashMap::new(),
            skipped: BTreeSet::new(),
            steps_executed: 0,
            max_steps,
        }
    }

    /// Store a node's output. Writing twice is an error.
    pub fn record_output(
        &mut self,
        node_id: &str,
        output: serde_json::Value,
    ) -> Result<(), WorkflowExecutionError> {
        if self.outputs.contains_key(node_id) {
            return Err(WorkflowExecutionError::OutputAlreadyWritten(
                node_id.to_string(),
            ));
        }
        self.outputs.insert(node_id.to_string(), output);
        Ok(())
    }

    pub fn output(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.outputs.get(node_id)
    }

    pub fn outputs(&self) -> &HashMap<String, serde_json::Value> {
        &self.outputs
    }

    pub fn mark_skipped(&mut self, node_id: &str) {
        self.skipped.insert(node_id.to_string());
    }

    pub fn is_skipped(&self, node_id: &str) -> bool {
        self.skipped.contains(node_id)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.skipped.iter().map(|s| s.as_str())
    }

    /// Completed or skipped.
    pub fn is_resolved(&self, node_id: &str) -> bool {
        self.outputs.contains_key(node_id) || self.skipped.contains(node_id)
    }

    /// Count one finished node invocation.
    pub fn record_step(&mut self) -> Result<usize, WorkflowExecutionError> {
        self.steps_executed += 1;
        if self.steps_executed > self.max_steps {
            return Err(WorkflowExecutionError::StepLimitExceeded {
                max_steps: self.max_steps,
            });
        }
        Ok(self.steps_executed)
    }

    pub fn steps_executed(&self) -> usize {
        self.steps_executed
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Consume the context, returning a node's output.
    pub fn take_output(mut self, node_id: &str) -> Option<serde_json::Value> {
        self.outputs.remove(node_id)
    }
}
