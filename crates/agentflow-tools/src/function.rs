use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use agentflow_core::error::ToolInvocationError;
use agentflow_core::traits::Tool;

type Handler = Arc<
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolInvocationError>>
        + Send
        + Sync,
>;

/// A tool backed by an async closure.
///
/// Required parameters come from the schema's `required` array and are
/// enforced by the registry before the closure runs.
pub struct FunctionTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    timeout_secs: u64,
    handler: Handler,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolInvocationError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            timeout_secs: 30,
            handler: Arc::new(move |input| handler(input).boxed()),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, ToolInvocationError>> {
        (self.handler)(input)
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
