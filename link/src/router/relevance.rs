//! Local relevance checks for channels the server cannot filter.
//!
//! A direct conversation is visible to either participant, which is not a
//! single-column equality, so the feed delivers every row of the table and
//! the client decides. This leaks rows of other users' conversations to the
//! client before they are discarded here; authorization at the source is
//! the real fix.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{ChangeEvent, ChangeType, ChannelKey};

/// Decides whether an event on a per-user channel concerns that user.
#[async_trait]
pub trait RelevanceCheck: Send + Sync {
    async fn is_relevant(&self, key: &ChannelKey, event: &ChangeEvent) -> Result<bool>;
}

/// Looks up the participants of a conversation (the parent relation of a
/// direct message).
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>>;
}

const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Relevance by conversation membership.
///
/// For the `conversations` table the row's own `id` is the conversation; for
/// message tables it is the `conversation_id` column. Participant lists are
/// cached since conversation membership does not change.
pub struct ParticipantRelevance {
    directory: Arc<dyn ConversationDirectory>,
    cache: Mutex<HashMap<String, Arc<[String]>>>,
    capacity: usize,
}

impl ParticipantRelevance {
    pub fn new(directory: Arc<dyn ConversationDirectory>) -> Self {
        Self {
            directory,
            cache: Mutex::new(HashMap::new()),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Seed the cache, e.g. from the conversation list already on screen.
    pub fn remember(&self, conversation_id: impl Into<String>, participants: Vec<String>) {
        self.insert(conversation_id.into(), participants.into());
    }

    pub fn cached_conversations(&self) -> usize {
        self.cache.lock().len()
    }

    fn conversation_id(event: &ChangeEvent) -> Option<String> {
        if event.table == "conversations" {
            event.record_id()
        } else {
            event.field_str("conversation_id").map(str::to_string)
        }
    }

    fn insert(&self, conversation_id: String, participants: Arc<[String]>) {
        let mut cache = self.cache.lock();
        if cache.len() >= self.capacity && !cache.contains_key(&conversation_id) {
            cache.clear();
        }
        cache.insert(conversation_id, participants);
    }

    async fn participants(&self, conversation_id: &str) -> Result<Arc<[String]>> {
        let cached = self.cache.lock().get(conversation_id).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let fetched: Arc<[String]> = self.directory.participants(conversation_id).await?.into();
        self.insert(conversation_id.to_string(), fetched.clone());
        Ok(fetched)
    }
}

#[async_trait]
impl RelevanceCheck for ParticipantRelevance {
    async fn is_relevant(&self, key: &ChannelKey, event: &ChangeEvent) -> Result<bool> {
        let Some(user_id) = key.user_id() else {
            return Ok(true);
        };
        let Some(conversation_id) = Self::conversation_id(event) else {
            // An id-only delete row carries nothing to leak and only removes
            // rows a feed already holds.
            if event.event_type == ChangeType::Delete {
                return Ok(true);
            }
            log::debug!(
                "[realtime-link] {} row on '{}' has no conversation id",
                event.table,
                key
            );
            return Ok(false);
        };
        let participants = self.participants(&conversation_id).await?;
        Ok(participants.iter().any(|p| p == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::models::{ChangeType, RawChangeEvent};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Directory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConversationDirectory for Directory {
        async fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match conversation_id {
                "C123" => Ok(vec!["A".to_string(), "B".to_string()]),
                "C999" => Ok(vec!["B".to_string(), "Z".to_string()]),
                _ => Err(LinkError::InternalError("no such conversation".to_string())),
            }
        }
    }

    fn message(conversation_id: &str) -> ChangeEvent {
        let raw = RawChangeEvent {
            event_type: ChangeType::Insert,
            table: "direct_messages".to_string(),
            schema: "public".to_string(),
            new: Some(json!({ "id": "m-1", "conversation_id": conversation_id })),
            old: None,
        };
        ChangeEvent::from_raw(ChannelKey::direct_messages("A"), raw).unwrap()
    }

    #[tokio::test]
    async fn test_membership_decides_and_is_cached() {
        let directory = Arc::new(Directory {
            calls: AtomicUsize::new(0),
        });
        let check = ParticipantRelevance::new(directory.clone());
        let key = ChannelKey::direct_messages("A");

        assert!(check.is_relevant(&key, &message("C123")).await.unwrap());
        assert!(check.is_relevant(&key, &message("C123")).await.unwrap());
        assert!(!check.is_relevant(&key, &message("C999")).await.unwrap());
        assert_eq!(directory.calls.load(Ordering::SeqCst), 2);
        assert!(check.is_relevant(&key, &message("C404")).await.is_err());
    }

    #[tokio::test]
    async fn test_conversation_rows_use_their_own_id() {
        let directory = Arc::new(Directory {
            calls: AtomicUsize::new(0),
        });
        let check = ParticipantRelevance::new(directory);
        check.remember("C777", vec!["A".to_string()]);

        let raw = RawChangeEvent {
            event_type: ChangeType::Update,
            table: "conversations".to_string(),
            schema: "public".to_string(),
            new: Some(json!({ "id": "C777", "last_message_at": "2026-01-01T00:00:00Z" })),
            old: None,
        };
        let key = ChannelKey::conversation_updates("A");
        let event = ChangeEvent::from_raw(key.clone(), raw).unwrap();
        assert!(check.is_relevant(&key, &event).await.unwrap());
    }

    #[tokio::test]
    async fn test_id_only_delete_is_relevant_without_lookup() {
        let directory = Arc::new(Directory {
            calls: AtomicUsize::new(0),
        });
        let check = ParticipantRelevance::new(directory.clone());
        let key = ChannelKey::direct_messages("A");
        let raw = RawChangeEvent {
            event_type: ChangeType::Delete,
            table: "direct_messages".to_string(),
            schema: "public".to_string(),
            new: None,
            old: Some(json!({ "id": "m-1" })),
        };
        let event = ChangeEvent::from_raw(key.clone(), raw).unwrap();

        assert!(check.is_relevant(&key, &event).await.unwrap());
        assert_eq!(directory.calls.load(Ordering::SeqCst), 0);
    }
}
