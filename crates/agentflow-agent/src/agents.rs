use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use agentflow_core::config::{AgentConfig, AgentKind, MemoryConfig};
use agentflow_core::error::{AgentError, AgentFlowError, Result};
use agentflow_core::event::EventBus;
use agentflow_core::traits::{Agent, LlmProvider, Memory};
use agentflow_core::types::{value_to_text, AgentState};
use agentflow_memory::MessageMemory;
use agentflow_tools::ToolRegistry;

use crate::agent_loop::ReasoningLoop;

/// Collaborators injected into every agent built from config.
#[derive(Clone, Default)]
pub struct AgentDeps {
    /// Completion providers keyed by the name used in `AgentConfig::provider`.
    pub providers: HashMap<String, Arc<dyn LlmProvider>>,
    pub tools: ToolRegistry,
    pub event_bus: Option<Arc<EventBus>>,
}

impl AgentDeps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }
}

/// Build the agent described by `config`.
///
/// Every kind runs on a `ReasoningLoop`: `react` with its configured tools,
/// `conversational` and `planner` as a single tool-free completion.
pub fn build_agent(config: &AgentConfig, deps: &AgentDeps) -> Result<Arc<dyn Agent>> {
    Ok(Arc::new(ReasoningAgent::from_config(config, deps)?))
}

/// An `Agent` backed by a reasoning loop.
///
/// Each run starts from a fresh state; the state of the latest run is kept
/// for inspection.
pub struct ReasoningAgent {
    kind: AgentKind,
    reasoning: ReasoningLoop,
    last_state: Mutex<Option<AgentState>>,
}

impl ReasoningAgent {
    pub fn from_config(config: &AgentConfig, deps: &AgentDeps) -> Result<Self> {
        let provider = deps.providers.get(&config.provider).cloned().ok_or_else(|| {
            AgentFlowError::Config(format!(
                "agent '{}' uses unknown provider '{}'",
                config.id, config.provider
            ))
        })?;

        let mut loop_config = config.clone();
        if config.kind != AgentKind::React {
            loop_config.tools.clear();
            loop_config.max_iterations = 0;
        }

        let mut reasoning = ReasoningLoop::new(loop_config, provider, &deps.tools);
        if let Some(bus) = &deps.event_bus {
            reasoning = reasoning.with_event_bus(bus.clone());
        }
        match config.memory {
            MemoryConfig::None => {}
            MemoryConfig::Message { max_messages } => {
                let memory: Arc<dyn Memory> = match max_messages {
                    Some(max) => Arc::new(MessageMemory::with_capacity(max)),
                    None => Arc::new(MessageMemory::new()),
                };
                reasoning = reasoning.with_memory(memory);
            }
        }

        debug!(
            agent = %config.id,
            kind = ?config.kind,
            tools = reasoning.tools().len(),
            "Built agent"
        );
        Ok(Self {
            kind: config.kind,
            reasoning,
            last_state: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn reasoning(&self) -> &ReasoningLoop {
        &self.reasoning
    }

    pub async fn last_state(&self) -> Option<AgentState> {
        self.last_state.lock().await.clone()
    }
}

impl Agent for ReasoningAgent {
    fn id(&self) -> &str {
        &self.reasoning.config().id
    }

    fn run(&self, input: Value) -> BoxFuture<'_, std::result::Result<Value, AgentError>> {
        Box::pin(async move {
            let run = self.reasoning.run(&value_to_text(&input)).await;
            *self.last_state.lock().await = Some(run.state);
            let content = run.result?;
            Ok(match self.kind {
                AgentKind::Planner => parse_plan(&content),
                AgentKind::React | AgentKind::Conversational => Value::String(content),
            })
        })
    }
}

fn json_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*\n(.*?)\n\s*```").expect("valid regex"))
}

/// Extract a plan from a fenced JSON block. Without one, the whole answer
/// becomes a single-step plan; a block that fails to parse is reported in
/// `parsing_error`.
pub fn parse_plan(content: &str) -> Value {
    let fallback = || {
        json!({
            "description": "Generated plan",
            "steps": [{"description": content}],
        })
    };
    let Some(block) = json_block().captures(content).and_then(|c| c.get(1)) else {
        return fallback();
    };
    match serde_json::from_str::<Value>(block.as_str()) {
        Ok(plan) => plan,
        Err(e) => {
            let mut plan = fallback();
            plan["parsing_error"] = Value::String(e.to_string());
            plan
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::types::{AgentStatus, Message, Role};
    use agentflow_test_utils::{add_tool, tool_call_message, ScriptedProvider};

    fn deps(provider: Arc<ScriptedProvider>) -> AgentDeps {
        let mut tools = ToolRegistry::new();
        tools.register(add_tool());
        AgentDeps::new()
            .with_provider("scripted", provider)
            .with_tools(tools)
    }

    #[tokio::test]
    async fn react_agent_uses_tools() {
        let provider = Arc::new(ScriptedProvider::new([
            tool_call_message(vec![("add", json!({"a": 2, "b": 3}))]),
            Message::assistant_text("The result is 5"),
        ]));
        let config = AgentConfig::new("calc", "scripted", "m").with_tools(vec!["add".into()]);
        let agent = build_agent(&config, &deps(provider.clone())).unwrap();

        assert_eq!(agent.id(), "calc");
        assert_eq!(agent.run(json!("Compute 2+3")).await.unwrap(), json!("The result is 5"));
        assert_eq!(provider.requests()[0].tool_names, vec!["add"]);
    }

    #[tokio::test]
    async fn conversational_agent_gets_no_tools() {
        let provider = Arc::new(ScriptedProvider::new([Message::assistant_text("Hello!")]));
        let config = AgentConfig::new("chat", "scripted", "m")
            .with_kind(AgentKind::Conversational)
            .with_tools(vec!["add".into()]);
        let agent = build_agent(&config, &deps(provider.clone())).unwrap();

        assert_eq!(agent.run(json!("hi")).await.unwrap(), json!("Hello!"));
        assert!(provider.requests()[0].tool_names.is_empty());
    }

    #[tokio::test]
    async fn non_string_input_is_rendered() {
        let provider = Arc::new(ScriptedProvider::new([Message::assistant_text("ok")]));
        let config = AgentConfig::new("a", "scripted", "m");
        let agent = build_agent(&config, &deps(provider.clone())).unwrap();
        agent.run(json!({"topic": "rust"})).await.unwrap();

        let sent = &provider.requests()[0].messages;
        assert_eq!(sent[0].role, Role::User);
        assert_eq!(sent[0].content, r#"{"topic":"rust"}"#);
    }

    #[tokio::test]
    async fn planner_parses_json_block() {
        let answer = "Here is the plan:\n```json\n{\"description\": \"Trip\", \"steps\": [{\"description\": \"Book\"}]}\n```";
        let provider = Arc::new(ScriptedProvider::new([Message::assistant_text(answer)]));
        let config = AgentConfig::new("plan", "scripted", "m").with_kind(AgentKind::Planner);
        let agent = build_agent(&config, &deps(provider)).unwrap();

        let plan = agent.run(json!("plan a trip")).await.unwrap();
        assert_eq!(plan["description"], "Trip");
        assert_eq!(plan["steps"][0]["description"], "Book");
    }

    #[test]
    fn plan_fallbacks() {
        let plan = parse_plan("Just do it.");
        assert_eq!(plan["description"], "Generated plan");
        assert_eq!(plan["steps"][0]["description"], "Just do it.");
        assert!(plan.get("parsing_error").is_none());

        let plan = parse_plan("```json\n{not json}\n```");
        assert_eq!(plan["description"], "Generated plan");
        assert!(plan["parsing_error"].is_string());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = AgentConfig::new("a", "missing", "m");
        let err = build_agent(&config, &AgentDeps::new()).err().unwrap();
        assert!(matches!(err, AgentFlowError::Config(ref msg) if msg.contains("missing")));
    }

    #[tokio::test]
    async fn agent_failure_surfaces_and_state_is_kept() {
        let provider = Arc::new(ScriptedProvider::default().then_error("rate limited"));
        let config = AgentConfig::new("a", "scripted", "m");
        let agent = ReasoningAgent::from_config(&config, &deps(provider)).unwrap();
        assert!(agent.last_state().await.is_none());

        let err = agent.run(json!("hi")).await.unwrap_err();
        assert!(matches!(err, AgentError::ProviderError { iteration: 0, .. }));

        let state = agent.last_state().await.unwrap();
        assert_eq!(state.status, AgentStatus::Failed);
        assert!(state.error.as_deref().is_some_and(|e| e.contains("rate limited")));
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "hi");
    }

    #[tokio::test]
    async fn message_memory_is_attached() {
        let provider = Arc::new(ScriptedProvider::new([
            Message::assistant_text("first"),
            Message::assistant_text("second"),
        ]));
        let config = AgentConfig::new("a", "scripted", "m").with_memory(MemoryConfig::Message {
            max_messages: Some(10),
        });
        let agent = build_agent(&config, &deps(provider.clone())).unwrap();
        agent.run(json!("one")).await.unwrap();
        agent.run(json!("two")).await.unwrap();

        // The second request carries the first exchange as context.
        assert_eq!(provider.requests()[1].messages.len(), 3);
    }
}
