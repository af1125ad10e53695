use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use agentflow_core::config::AgentConfig;
use agentflow_core::error::{AgentError, ToolInvocationError};
use agentflow_core::event::EventBus;
use agentflow_core::traits::{LlmProvider, Memory, MemoryQuery};
use agentflow_core::types::*;
use agentflow_tools::ToolRegistry;

/// Where a reasoning loop run currently stands.
///
/// `Idle -> AwaitingCompletion -> (ExecutingTool -> AwaitingCompletion)* ->
/// Completed | Failed`
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    AwaitingCompletion,
    /// Calls from the latest assistant message, in the order received.
    ExecutingTool(Vec<ToolCall>),
    /// Final assistant content.
    Completed(String),
    Failed(AgentError),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed(_) | Phase::Failed(_))
    }
}

/// A finished run: the final state and the answer or error.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub state: AgentState,
    pub result: Result<String, AgentError>,
}

/// Bounded observe/decide/act loop for one agent.
///
/// Each completion that requests tools costs one iteration once all of its
/// calls have replies; a run fails as soon as the count exceeds
/// `max_iterations`. Tool calls run one at a time in the order the model
/// listed them.
pub struct ReasoningLoop {
    config: AgentConfig,
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    memory: Option<Arc<dyn Memory>>,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
    context_limit: usize,
}

impl ReasoningLoop {
    /// The loop only sees the registry tools named in `config.tools`.
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        tools: &ToolRegistry,
    ) -> Self {
        let tools = tools.subset(&config.tools);
        Self {
            config,
            provider,
            tools,
            memory: None,
            event_bus: None,
            cancel: CancellationToken::new(),
            context_limit: 20,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// How many remembered messages are prepended to each completion request.
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = limit;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run to completion on a fresh state.
    pub async fn run(&self, input: &str) -> AgentRun {
        let mut state = AgentState::new();
        let result = self.run_with_state(&mut state, input).await;
        AgentRun { state, result }
    }

    /// Run to completion on a caller-owned state, continuing its transcript.
    /// Call `AgentState::reset` first for a clean run.
    pub async fn run_with_state(
        &self,
        state: &mut AgentState,
        input: &str,
    ) -> Result<String, AgentError> {
        let mut phase = self.begin(state, input).await;
        loop {
            phase = match phase {
                Phase::Completed(content) => return Ok(content),
                Phase::Failed(e) => return Err(e),
                other => self.advance(state, other).await,
            };
        }
    }

    /// `Idle -> AwaitingCompletion`: append `input` as a user message.
    pub async fn begin(&self, state: &mut AgentState, input: &str) -> Phase {
        state.status = AgentStatus::Running;
        state.current_iteration = 0;
        state.error = None;

        info!(agent = %self.config.id, "Agent run started");
        self.emit(AgentEvent::RunStarted {
            agent_id: self.config.id.clone(),
        });

        if state.messages.is_empty() && !self.config.system_prompt.is_empty() {
            self.record(state, Message::system(&self.config.system_prompt))
                .await;
        }
        self.record(state, Message::user(input)).await;
        Phase::AwaitingCompletion
    }

    /// Perform one transition. Terminal phases are returned unchanged.
    ///
    /// `Idle` resumes a state whose transcript already ends with the input.
    pub async fn advance(&self, state: &mut AgentState, phase: Phase) -> Phase {
        let next = match phase {
            Phase::Idle => {
                state.status = AgentStatus::Running;
                Phase::AwaitingCompletion
            }
            Phase::AwaitingCompletion => self.await_completion(state).await,
            Phase::ExecutingTool(calls) => self.execute_tools(state, calls).await,
            terminal => return terminal,
        };
        if next.is_terminal() {
            self.finish(state, &next);
        }
        next
    }

    async fn await_completion(&self, state: &mut AgentState) -> Phase {
        let iteration = state.current_iteration;
        if self.cancel.is_cancelled() {
            return Phase::Failed(AgentError::Cancelled { iteration });
        }
        let messages = self.prompt(state).await;
        let specs = self.tools.specs();
        let options = self.config.completion_options();

        debug!(
            agent = %self.config.id,
            iteration,
            messages = messages.len(),
            tools = specs.len(),
            "Requesting completion"
        );

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Phase::Failed(AgentError::Cancelled { iteration });
            }
            response = self.provider.complete(messages, &specs, &options) => response,
        };

        let mut message = match response {
            Ok(message) => message,
            Err(e) => {
                return Phase::Failed(AgentError::ProviderError {
                    iteration,
                    message: e.to_string(),
                })
            }
        };
        if message.role != Role::Assistant {
            return Phase::Failed(AgentError::InvalidResponse {
                iteration,
                message: format!("expected an assistant message, got {:?}", message.role),
            });
        }

        // Replies are paired by id, so ids must be present and distinct.
        let mut seen = HashSet::new();
        for call in &mut message.tool_calls {
            if call.id.is_empty() || seen.contains(&call.id) {
                call.id = format!("call_{}", Uuid::new_v4().simple());
            }
            seen.insert(call.id.clone());
        }

        self.emit(AgentEvent::CompletionReceived {
            agent_id: self.config.id.clone(),
            iteration,
            tool_calls: message.tool_calls.len(),
        });

        let calls = message.tool_calls.clone();
        let content = message.content.clone();
        self.record(state, message).await;

        if calls.is_empty() {
            Phase::Completed(content)
        } else {
            debug!(
                agent = %self.config.id,
                iteration,
                calls = calls.len(),
                "Model requested tools"
            );
            Phase::ExecutingTool(calls)
        }
    }

    async fn execute_tools(&self, state: &mut AgentState, calls: Vec<ToolCall>) -> Phase {
        let iteration = state.current_iteration;

        for call in calls {
            self.emit(AgentEvent::ToolStart {
                agent_id: self.config.id.clone(),
                name: call.tool_name.clone(),
                input: call.parameters.clone(),
            });
            state.last_tool_call = Some(call.clone());

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Phase::Failed(AgentError::Cancelled { iteration });
                }
                result = self.tools.execute(&call.tool_name, call.parameters.clone()) => result,
            };

            let (content, failure) = match result {
                Ok(value) => (value_to_text(&value), None),
                Err(e) => {
                    warn!(
                        agent = %self.config.id,
                        tool = %call.tool_name,
                        iteration,
                        error = %e,
                        "Tool call failed"
                    );
                    (error_payload(&call.tool_name, &e), Some(e))
                }
            };

            self.emit(AgentEvent::ToolEnd {
                agent_id: self.config.id.clone(),
                name: call.tool_name.clone(),
                is_error: failure.is_some(),
            });
            state.last_tool_result = Some(content.clone());
            self.record(state, Message::tool_result(call.id.clone(), content))
                .await;

            if let Some(e) = failure.filter(|e| e.is_fatal()) {
                return Phase::Failed(AgentError::FatalToolError {
                    iteration,
                    source: e,
                });
            }
        }

        state.current_iteration += 1;
        if state.current_iteration > self.config.max_iterations {
            return Phase::Failed(AgentError::IterationLimitExceeded {
                max_iterations: self.config.max_iterations,
            });
        }
        Phase::AwaitingCompletion
    }

    /// System messages, then remembered context not already in the
    /// transcript, then the live transcript.
    async fn prompt(&self, state: &AgentState) -> Vec<Message> {
        let mut prompt: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .cloned()
            .collect();

        if let Some(memory) = &self.memory {
            match memory.get(&MemoryQuery::recent(self.context_limit)).await {
                Ok(remembered) => {
                    let context = answered_groups(
                        remembered
                            .into_iter()
                            .filter(|m| m.role != Role::System && !state.messages.contains(m)),
                    );
                    if !context.is_empty() {
                        debug!(
                            agent = %self.config.id,
                            context = context.len(),
                            "Added memory context"
                        );
                    }
                    prompt.extend(context);
                }
                Err(e) => warn!(agent = %self.config.id, error = %e, "Memory read failed"),
            }
        }

        prompt.extend(
            state
                .messages
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );
        prompt
    }

    /// Append to the transcript and, best-effort, to memory.
    async fn record(&self, state: &mut AgentState, message: Message) {
        state.messages.push(message.clone());
        if let Some(memory) = &self.memory {
            if let Err(e) = memory.add(message).await {
                warn!(agent = %self.config.id, error = %e, "Memory write failed");
            }
        }
    }

    fn finish(&self, state: &mut AgentState, phase: &Phase) {
        match phase {
            Phase::Completed(_) => {
                state.status = AgentStatus::Completed;
                info!(
                    agent = %self.config.id,
                    iterations = state.current_iteration,
                    "Agent run complete"
                );
                self.emit(AgentEvent::RunComplete {
                    agent_id: self.config.id.clone(),
                    iterations: state.current_iteration,
                });
            }
            Phase::Failed(e) => {
                state.status = AgentStatus::Failed;
                state.error = Some(e.to_string());
                error!(agent = %self.config.id, error = %e, "Agent run failed");
                self.emit(AgentEvent::RunFailed {
                    agent_id: self.config.id.clone(),
                    error: e.to_string(),
                });
            }
            _ => {}
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Keep only tool exchanges that are complete: an assistant message with
/// tool calls survives only when the tool messages right after it answer
/// every call exactly once. Partial groups and stray tool replies are
/// dropped, wherever they sit in the window.
fn answered_groups(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    let mut kept = Vec::new();
    let mut messages = messages.into_iter().peekable();
    while let Some(message) = messages.next() {
        match message.role {
            Role::Tool => continue,
            Role::Assistant if message.has_tool_calls() => {
                let mut replies = Vec::new();
                while let Some(reply) = messages.next_if(|m| m.role == Role::Tool) {
                    replies.push(reply);
                }
                let mut outstanding: HashSet<&str> =
                    message.tool_calls.iter().map(|c| c.id.as_str()).collect();
                let complete = replies.len() == outstanding.len()
                    && replies.iter().all(|r| {
                        r.tool_call_id
                            .as_deref()
                            .is_some_and(|id| outstanding.remove(id))
                    });
                if complete {
                    kept.push(message);
                    kept.extend(replies);
                }
            }
            _ => kept.push(message),
        }
    }
    kept
}

/// Tool-role content reporting a failed call to the model.
fn error_payload(tool: &str, error: &ToolInvocationError) -> String {
    serde_json::json!({
        "error": {
            "kind": error.kind(),
            "tool": tool,
            "message": error.to_string(),
        }
    })
    .to_string()
}
