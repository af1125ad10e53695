use std::collections::VecDeque;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::debug;

use agentflow_core::error::MemoryError;
use agentflow_core::traits::{Memory, MemoryQuery};
use agentflow_core::types::{Message, Role};

/// Ordered in-process message store.
///
/// With a capacity, the oldest non-system messages are evicted first so the
/// system prompt survives long conversations.
#[derive(Debug, Default)]
pub struct MessageMemory {
    messages: RwLock<VecDeque<Message>>,
    max_messages: Option<usize>,
}

impl MessageMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_messages: usize) -> Self {
        Self {
            messages: RwLock::new(VecDeque::new()),
            max_messages: Some(max_messages),
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    /// The most recent `max` messages, oldest first.
    pub async fn conversation_history(&self, max: Option<usize>) -> Vec<Message> {
        let messages = self.messages.read().await;
        let skip = max.map_or(0, |m| messages.len().saturating_sub(m));
        messages.iter().skip(skip).cloned().collect()
    }

    pub async fn system_message(&self) -> Option<Message> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.role == Role::System)
            .cloned()
    }

    async fn push(&self, message: Message) {
        let mut messages = self.messages.write().await;
        messages.push_back(message);

        let Some(max) = self.max_messages else {
            return;
        };
        while messages.len() > max {
            let victim = messages
                .iter()
                .position(|m| m.role != Role::System)
                .unwrap_or(0);
            messages.remove(victim);
            debug!(max, "Evicted oldest message from memory");
        }
    }
}

impl Memory for MessageMemory {
    fn add(&self, message: Message) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            self.push(message).await;
            Ok(())
        })
    }

    fn get(&self, query: &MemoryQuery) -> BoxFuture<'_, Result<Vec<Message>, MemoryError>> {
        let needle = query.text.as_ref().map(|t| t.to_lowercase());
        let limit = query.limit;
        Box::pin(async move {
            let messages = self.messages.read().await;
            let mut matched: Vec<Message> = messages
                .iter()
                .filter(|m| match &needle {
                    Some(n) => m.content.to_lowercase().contains(n.as_str()),
                    None => true,
                })
                .cloned()
                .collect();
            if let Some(limit) = limit {
                let excess = matched.len().saturating_sub(limit);
                matched.drain(..excess);
            }
            Ok(matched)
        })
    }

    fn clear(&self) -> BoxFuture<'_, Result<(), MemoryError>> {
        Box::pin(async move {
            self.messages.write().await.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_get_in_order() {
        let memory = MessageMemory::new();
        memory.add(Message::user("first")).await.unwrap();
        memory.add(Message::assistant_text("second")).await.unwrap();

        let all = memory.get(&MemoryQuery::all()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "first");
        assert_eq!(all[1].content, "second");
    }

    #[tokio::test]
    async fn limit_returns_most_recent() {
        let memory = MessageMemory::new();
        for i in 0..5 {
            memory.add(Message::user(format!("m{}", i))).await.unwrap();
        }
        let recent = memory.get(&MemoryQuery::recent(2)).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn text_query_filters() {
        let memory = MessageMemory::new();
        memory.add(Message::user("Weather in Paris")).await.unwrap();
        memory.add(Message::user("Stock prices")).await.unwrap();
        let hits = memory
            .get(&MemoryQuery::all().with_text("paris"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Weather in Paris");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_but_keeps_system() {
        let memory = MessageMemory::with_capacity(3);
        memory.add(Message::system("be brief")).await.unwrap();
        memory.add(Message::user("a")).await.unwrap();
        memory.add(Message::user("b")).await.unwrap();
        memory.add(Message::user("c")).await.unwrap();

        let history = memory.conversation_history(None).await;
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["be brief", "b", "c"]);
        assert_eq!(
            memory.system_message().await.map(|m| m.content),
            Some("be brief".to_string())
        );
    }

    #[tokio::test]
    async fn clear_empties_memory() {
        let memory = MessageMemory::new();
        memory.add(Message::user("x")).await.unwrap();
        memory.clear().await.unwrap();
        assert!(memory.is_empty().await);
    }

    #[tokio::test]
    async fn conversation_history_window() {
        let memory = MessageMemory::new();
        for i in 0..4 {
            memory.add(Message::user(i.to_string())).await.unwrap();
        }
        let window = memory.conversation_history(Some(3)).await;
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "1");
        assert_eq!(memory.len().await, 4);
    }
}
