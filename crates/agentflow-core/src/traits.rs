use futures::future::BoxFuture;

use crate::error::{AgentError, MemoryError, ProviderError, ToolInvocationError};
use crate::types::*;

/// Completion collaborator. One call returns one assistant message; the core
/// never retries it.
pub trait LlmProvider: Send + Sync + 'static {
    fn complete(
        &self,
        messages: Vec<Message>,
        tools: &[ToolSpec],
        options: &CompletionOptions,
    ) -> BoxFuture<'_, Result<Message, ProviderError>>;
}

/// A callable tool exposed to the model.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Parameter names that must be present in every call.
    ///
    /// Defaults to the schema's top-level `required` array.
    fn required_parameters(&self) -> Vec<String> {
        self.input_schema()
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Execute the tool. Errors classify themselves as recoverable or fatal.
    fn execute(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, ToolInvocationError>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
            required_parameters: self.required_parameters(),
        }
    }
}

/// Selects messages from a `Memory`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryQuery {
    /// Free-text relevance hint; backends may ignore it.
    pub text: Option<String>,
    /// Return at most this many messages (the most recent ones).
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn recent(limit: usize) -> Self {
        Self {
            text: None,
            limit: Some(limit),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Memory collaborator. Context assembly only, never the source of truth for
/// the live transcript.
pub trait Memory: Send + Sync + 'static {
    fn add(&self, message: Message) -> BoxFuture<'_, Result<(), MemoryError>>;

    /// Ordered (oldest first) messages matching the query.
    fn get(&self, query: &MemoryQuery) -> BoxFuture<'_, Result<Vec<Message>, MemoryError>>;

    fn clear(&self) -> BoxFuture<'_, Result<(), MemoryError>>;
}

/// A unit of work a workflow node or sequential step invokes.
pub trait Agent: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn run(
        &self,
        input: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value, AgentError>>;
}
