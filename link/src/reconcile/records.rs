//! Typed records of the three reconciled feeds.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// A record that can be merged into a [`ReconciledCollection`](super::ReconciledCollection).
pub trait Reconcilable: Clone + DeserializeOwned + Send + 'static {
    /// Server id. Empty for a not-yet-confirmed draft.
    fn id(&self) -> &str;
    /// User who created the record.
    fn actor_id(&self) -> &str;
    fn content(&self) -> &str;
    fn created_at(&self) -> Option<DateTime<Utc>>;
}

/// Row ids arrive as strings or integers depending on the table.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Reconcilable for DirectMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn actor_id(&self) -> &str {
        &self.sender_id
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub community_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Reconcilable for CommunityMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn actor_id(&self) -> &str {
        &self.sender_id
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

/// A comment on any content item (`content_type` + `content_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub content_type: String,
    pub content_id: String,
    pub author_id: String,
    pub content: String,
    /// Parent comment for threaded replies.
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Reconcilable for Comment {
    fn id(&self) -> &str {
        &self.id
    }

    fn actor_id(&self) -> &str {
        &self.author_id
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_ids_and_optional_fields() {
        let comment: Comment = serde_json::from_value(json!({
            "id": 42,
            "content_type": "post",
            "content_id": "p1",
            "author_id": "u1",
            "content": "first"
        }))
        .unwrap();
        assert_eq!(comment.id(), "42");
        assert!(comment.parent_id.is_none());
        assert!(comment.created_at().is_none());
    }

    #[test]
    fn test_timestamps_parse_rfc3339() {
        let message: DirectMessage = serde_json::from_value(json!({
            "id": "m-900",
            "conversation_id": "C123",
            "sender_id": "A",
            "content": "hi",
            "created_at": "2026-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(message.created_at().unwrap().timestamp(), 1_772_366_400);
        assert_eq!(message.actor_id(), "A");
    }
}
