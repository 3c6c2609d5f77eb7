//! Conversation store (C13): rolling, TTL-bounded message history per
//! `(user, agent)` pair, returned in role/content form suitable for direct
//! use as a chat prefix.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::types::Message;
use crate::Result;

pub const DEFAULT_MAX_MESSAGES: usize = 50;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

fn key(user_id: &str, agent_id: &str) -> String {
    format!("conversation:{user_id}:{agent_id}")
}

/// Pluggable backing store, standing in for the "shared KV with atomic-script
/// support" named in the external interfaces. One implementation ships here
/// ([`InMemoryConversationStore`]); a Redis- or similar-backed implementation
/// is a drop-in behind this trait and is intentionally not bundled, since no
/// network KV client exists anywhere in the dependency stack.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, user_id: &str, agent_id: &str) -> Result<Vec<Message>>;
    async fn save_with_ttl(
        &self,
        user_id: &str,
        agent_id: &str,
        messages: Vec<Message>,
        ttl: Duration,
    ) -> Result<()>;
    async fn clear(&self, user_id: &str, agent_id: &str) -> Result<()>;

    /// Read-append-trim-save cycle: appends `turns`, trims to `max_messages`
    /// from the front, and refreshes the TTL. Callers behind a trait object
    /// (the orchestrator) go through this default; [`InMemoryConversationStore`]
    /// also exposes an inherent convenience method bound to its own configured
    /// `max_messages`.
    async fn append_turns(
        &self,
        user_id: &str,
        agent_id: &str,
        turns: Vec<Message>,
        max_messages: usize,
        ttl: Duration,
    ) -> Result<()> {
        let mut history = self.load(user_id, agent_id).await?;
        history.extend(turns);
        if history.len() > max_messages {
            let drop = history.len() - max_messages;
            history.drain(0..drop);
        }
        self.save_with_ttl(user_id, agent_id, history, ttl).await
    }
}

pub struct InMemoryConversationStore {
    entries: DashMap<String, (Vec<Message>, Instant, Duration)>,
    max_messages: usize,
}

impl InMemoryConversationStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_messages: max_messages.max(1),
        }
    }

    /// Appends `turns` to the existing history for `(user_id, agent_id)`,
    /// trimmed to this store's configured `max_messages`. Convenience wrapper
    /// around the trait's [`ConversationStore::append_turns`] default.
    pub async fn append_turns(
        &self,
        user_id: &str,
        agent_id: &str,
        turns: Vec<Message>,
        ttl: Duration,
    ) -> Result<()> {
        ConversationStore::append_turns(self, user_id, agent_id, turns, self.max_messages, ttl).await
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, user_id: &str, agent_id: &str) -> Result<Vec<Message>> {
        let k = key(user_id, agent_id);
        match self.entries.get(&k) {
            Some(entry) => {
                let (messages, saved_at, ttl) = entry.value();
                if saved_at.elapsed() > *ttl {
                    drop(entry);
                    self.entries.remove(&k);
                    Ok(Vec::new())
                } else {
                    Ok(messages.clone())
                }
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save_with_ttl(
        &self,
        user_id: &str,
        agent_id: &str,
        messages: Vec<Message>,
        ttl: Duration,
    ) -> Result<()> {
        self.entries
            .insert(key(user_id, agent_id), (messages, Instant::now(), ttl));
        Ok(())
    }

    async fn clear(&self, user_id: &str, agent_id: &str) -> Result<()> {
        self.entries.remove(&key(user_id, agent_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    #[tokio::test]
    async fn load_on_missing_conversation_returns_empty() {
        let store = InMemoryConversationStore::default();
        let history = store.load("u1", "analyst").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn append_turns_trims_to_max_messages() {
        let store = InMemoryConversationStore::new(3);
        for i in 0..5 {
            store
                .append_turns("u1", "analyst", vec![Message::user(format!("turn {i}"))], DEFAULT_TTL)
                .await
                .unwrap();
        }
        let history = store.load("u1", "analyst").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "turn 2");
        assert_eq!(history[2].content, "turn 4");
    }

    #[tokio::test]
    async fn expired_ttl_returns_empty_and_purges_entry() {
        let store = InMemoryConversationStore::default();
        store
            .save_with_ttl("u1", "analyst", vec![Message::user("hi")], Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let history = store.load("u1", "analyst").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_conversation() {
        let store = InMemoryConversationStore::default();
        store
            .save_with_ttl("u1", "analyst", vec![Message::new(MessageRole::User, "hi")], DEFAULT_TTL)
            .await
            .unwrap();
        store.clear("u1", "analyst").await.unwrap();
        assert!(store.load("u1", "analyst").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversations_are_scoped_per_user_and_agent() {
        let store = InMemoryConversationStore::default();
        store
            .save_with_ttl("u1", "analyst", vec![Message::user("a")], DEFAULT_TTL)
            .await
            .unwrap();
        store
            .save_with_ttl("u2", "analyst", vec![Message::user("b")], DEFAULT_TTL)
            .await
            .unwrap();
        assert_eq!(store.load("u1", "analyst").await.unwrap()[0].content, "a");
        assert_eq!(store.load("u2", "analyst").await.unwrap()[0].content, "b");
    }
}
