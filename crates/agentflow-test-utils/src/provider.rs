use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use agentflow_core::error::ProviderError;
use agentflow_core::traits::LlmProvider;
use agentflow_core::types::{CompletionOptions, Message, ToolSpec};

/// What the provider was asked, captured per call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
    pub options: CompletionOptions,
}

/// Completion provider that replays a fixed script of responses in order.
///
/// Once the script runs out every call fails with a `ProviderError`.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<Message, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: impl IntoIterator<Item = Message>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(vec![]),
        }
    }

    /// Append a response.
    pub fn then(self, message: Message) -> Self {
        self.script.lock().unwrap().push_back(Ok(message));
        self
    }

    /// Append a failing call.
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ProviderError(message.into())));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn complete(
        &self,
        messages: Vec<Message>,
        tools: &[ToolSpec],
        options: &CompletionOptions,
    ) -> BoxFuture<'_, Result<Message, ProviderError>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages,
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            options: options.clone(),
        });
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError("script exhausted".into())));
        Box::pin(async move { next })
    }
}
