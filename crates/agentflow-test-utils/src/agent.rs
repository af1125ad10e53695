use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use agentflow_core::error::AgentError;
use agentflow_core::traits::Agent;

type Behavior =
    Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value, AgentError> + Send + Sync>;

/// Tracks how many agent runs overlap.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest number of simultaneously running agents seen so far.
    pub fn max_observed(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(self.current.clone())
    }
}

struct ProbeGuard(Arc<AtomicUsize>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Agent double that records every input and answers from a fixed value, a
/// fixed error, or a closure.
pub struct RecordingAgent {
    id: String,
    behavior: Behavior,
    delay: Option<Duration>,
    probe: Option<ConcurrencyProbe>,
    inputs: Mutex<Vec<serde_json::Value>>,
    finished: AtomicUsize,
}

impl RecordingAgent {
    pub fn new<F>(id: impl Into<String>, behavior: F) -> Self
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, AgentError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            behavior: Arc::new(behavior),
            delay: None,
            probe: None,
            inputs: Mutex::new(vec![]),
            finished: AtomicUsize::new(0),
        }
    }

    /// Always answers with `output`.
    pub fn returning(id: impl Into<String>, output: serde_json::Value) -> Self {
        Self::new(id, move |_| Ok(output.clone()))
    }

    /// Always fails with `error`.
    pub fn failing(id: impl Into<String>, error: AgentError) -> Self {
        Self::new(id, move |_| Err(error.clone()))
    }

    /// Echo the input back unchanged.
    pub fn echo(id: impl Into<String>) -> Self {
        Self::new(id, Ok)
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_probe(mut self, probe: ConcurrencyProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn inputs(&self) -> Vec<serde_json::Value> {
        self.inputs.lock().unwrap().clone()
    }

    /// Runs started, including ones dropped before finishing.
    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    /// Runs that got past the delay and produced a result.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Agent for RecordingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, AgentError>> {
        Box::pin(async move {
            self.inputs.lock().unwrap().push(input.clone());
            let _guard = self.probe.as_ref().map(|p| p.enter());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            } else {
                // Give sibling nodes a chance to overlap.
                tokio::task::yield_now().await;
            }
            let result = (self.behavior)(input);
            self.finished.fetch_add(1, Ordering::SeqCst);
            result
        })
    }
}
