use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            tool_name: tool_name.into(),
            parameters,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A single entry of a conversation transcript.
///
/// `tool_calls` is only populated on assistant messages and `tool_call_id` only
/// on tool messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: vec![],
            tool_call_id: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, text)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Tool description sent to the model alongside the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool parameters.
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub required_parameters: Vec<String>,
}

/// Per-request options forwarded to the completion collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Lifecycle of one agent run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Mutable state of a single reasoning loop run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub messages: Vec<Message>,
    /// Completed completion round-trips that requested tools.
    pub current_iteration: usize,
    pub status: AgentStatus,
    #[serde(default)]
    pub last_tool_call: Option<ToolCall>,
    #[serde(default)]
    pub last_tool_result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return to a fresh idle state, dropping the transcript.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Content of the most recent assistant message.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// Event broadcast to all subscribers of an `EventBus`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Reasoning loop started.
    RunStarted { agent_id: String },
    /// A completion came back from the provider.
    CompletionReceived {
        agent_id: String,
        iteration: usize,
        tool_calls: usize,
    },
    /// Tool execution started.
    ToolStart {
        agent_id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Tool execution finished.
    ToolEnd {
        agent_id: String,
        name: String,
        is_error: bool,
    },
    /// Reasoning loop completed.
    RunComplete { agent_id: String, iterations: usize },
    /// Reasoning loop failed.
    RunFailed { agent_id: String, error: String },
    /// Workflow node dispatched.
    NodeStarted { node_id: String },
    /// Workflow node produced its output.
    NodeCompleted { node_id: String, elapsed_ms: u64 },
    /// Workflow node deactivated by a condition or upstream skip.
    NodeSkipped { node_id: String, reason: String },
    /// Workflow node failed.
    NodeFailed { node_id: String, error: String },
}

/// Render a JSON value as agent input text: strings as-is, everything else as
/// compact JSON.
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
