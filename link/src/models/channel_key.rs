use std::fmt;
use std::str::FromStr;

use crate::error::{LinkError, Result};

const DIRECT_MESSAGES: &str = "direct_messages_";
const CONVERSATION_UPDATES: &str = "conversation_updates_";
const COMMUNITY_MESSAGES: &str = "community_messages_";
const COMMENTS: &str = "comments_";
const TYPING: &str = "typing_";

/// Logical channel key.
///
/// The string form is the stable contract shared with feature code and
/// re-issued verbatim after every reconnect:
///
/// | variant                | string form                              |
/// |------------------------|------------------------------------------|
/// | `DirectMessages`       | `direct_messages_<userId>`               |
/// | `ConversationUpdates`  | `conversation_updates_<userId>`          |
/// | `CommunityMessages`    | `community_messages_<communityId>`       |
/// | `Comments`             | `comments_<contentType>_<contentId>`     |
/// | `Typing`               | `typing_<contentType>_<contentId>`       |
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    DirectMessages { user_id: String },
    ConversationUpdates { user_id: String },
    CommunityMessages { community_id: String },
    Comments { content_type: String, content_id: String },
    Typing { content_type: String, content_id: String },
}

/// Channel family, used to register per-family router behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    DirectMessages,
    ConversationUpdates,
    CommunityMessages,
    Comments,
    Typing,
}

impl ChannelKey {
    pub fn direct_messages(user_id: impl Into<String>) -> Self {
        Self::DirectMessages {
            user_id: user_id.into(),
        }
    }

    pub fn conversation_updates(user_id: impl Into<String>) -> Self {
        Self::ConversationUpdates {
            user_id: user_id.into(),
        }
    }

    pub fn community_messages(community_id: impl Into<String>) -> Self {
        Self::CommunityMessages {
            community_id: community_id.into(),
        }
    }

    pub fn comments(content_type: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self::Comments {
            content_type: content_type.into(),
            content_id: content_id.into(),
        }
    }

    pub fn typing(content_type: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self::Typing {
            content_type: content_type.into(),
            content_id: content_id.into(),
        }
    }

    /// Parse and validate a channel key string.
    ///
    /// Malformed keys fail with [`LinkError::SubscriptionRejected`].
    pub fn parse(raw: &str) -> Result<Self> {
        let key = if let Some(rest) = raw.strip_prefix(DIRECT_MESSAGES) {
            Self::direct_messages(valid_id(raw, rest)?)
        } else if let Some(rest) = raw.strip_prefix(CONVERSATION_UPDATES) {
            Self::conversation_updates(valid_id(raw, rest)?)
        } else if let Some(rest) = raw.strip_prefix(COMMUNITY_MESSAGES) {
            Self::community_messages(valid_id(raw, rest)?)
        } else if let Some(rest) = raw.strip_prefix(COMMENTS) {
            let (content_type, content_id) = split_content(raw, rest)?;
            Self::comments(content_type, content_id)
        } else if let Some(rest) = raw.strip_prefix(TYPING) {
            let (content_type, content_id) = split_content(raw, rest)?;
            Self::typing(content_type, content_id)
        } else {
            return Err(rejected(raw, "unknown channel namespace"));
        };
        Ok(key)
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::DirectMessages { .. } => ChannelKind::DirectMessages,
            Self::ConversationUpdates { .. } => ChannelKind::ConversationUpdates,
            Self::CommunityMessages { .. } => ChannelKind::CommunityMessages,
            Self::Comments { .. } => ChannelKind::Comments,
            Self::Typing { .. } => ChannelKind::Typing,
        }
    }

    /// Source table of the change feed, `None` for broadcast-only channels.
    pub fn table(&self) -> Option<&'static str> {
        match self {
            Self::DirectMessages { .. } => Some("direct_messages"),
            Self::ConversationUpdates { .. } => Some("conversations"),
            Self::CommunityMessages { .. } => Some("community_messages"),
            Self::Comments { .. } => Some("comments"),
            Self::Typing { .. } => None,
        }
    }

    /// Server-side row filter, when the visibility condition is expressible
    /// as plain column equality.
    pub fn server_filter(&self) -> Option<String> {
        match self {
            Self::CommunityMessages { community_id } => {
                Some(format!("community_id=eq.{}", community_id))
            },
            Self::Comments {
                content_type,
                content_id,
            } => Some(format!(
                "content_type=eq.{},content_id=eq.{}",
                content_type, content_id
            )),
            _ => None,
        }
    }

    /// Whether events must pass a local relevance check before dispatch.
    ///
    /// Direct conversations are visible to either participant, which the
    /// feed cannot filter server-side, so every row on the table arrives.
    pub fn requires_relevance_check(&self) -> bool {
        matches!(
            self,
            Self::DirectMessages { .. } | Self::ConversationUpdates { .. }
        )
    }

    /// Broadcast-only channel with no durable history.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Typing { .. })
    }

    /// The user a per-user channel belongs to.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::DirectMessages { user_id } | Self::ConversationUpdates { user_id } => {
                Some(user_id)
            },
            _ => None,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectMessages { user_id } => write!(f, "{}{}", DIRECT_MESSAGES, user_id),
            Self::ConversationUpdates { user_id } => {
                write!(f, "{}{}", CONVERSATION_UPDATES, user_id)
            },
            Self::CommunityMessages { community_id } => {
                write!(f, "{}{}", COMMUNITY_MESSAGES, community_id)
            },
            Self::Comments {
                content_type,
                content_id,
            } => write!(f, "{}{}_{}", COMMENTS, content_type, content_id),
            Self::Typing {
                content_type,
                content_id,
            } => write!(f, "{}{}_{}", TYPING, content_type, content_id),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn rejected(raw: &str, why: &str) -> LinkError {
    LinkError::SubscriptionRejected(format!("malformed channel key '{}': {}", raw, why))
}

fn valid_id<'a>(raw: &str, id: &'a str) -> Result<&'a str> {
    if id.is_empty() {
        return Err(rejected(raw, "empty id"));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(rejected(raw, "id may only contain [A-Za-z0-9-]"));
    }
    Ok(id)
}

fn split_content<'a>(raw: &str, rest: &'a str) -> Result<(&'a str, &'a str)> {
    let (content_type, content_id) = rest
        .split_once('_')
        .ok_or_else(|| rejected(raw, "expected <contentType>_<contentId>"))?;
    if content_type.is_empty()
        || !content_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(rejected(raw, "content type may only contain [a-z0-9-]"));
    }
    Ok((content_type, valid_id(raw, content_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_namespaces() {
        assert_eq!(
            ChannelKey::parse("direct_messages_u1").unwrap(),
            ChannelKey::direct_messages("u1")
        );
        assert_eq!(
            ChannelKey::parse("conversation_updates_u1").unwrap(),
            ChannelKey::conversation_updates("u1")
        );
        assert_eq!(
            ChannelKey::parse("community_messages_c-42").unwrap(),
            ChannelKey::community_messages("c-42")
        );
        assert_eq!(
            ChannelKey::parse("comments_post_p9").unwrap(),
            ChannelKey::comments("post", "p9")
        );
        assert_eq!(
            ChannelKey::parse("typing_image_abc-def").unwrap(),
            ChannelKey::typing("image", "abc-def")
        );
    }

    #[test]
    fn test_display_roundtrips() {
        for raw in [
            "direct_messages_u1",
            "conversation_updates_u1",
            "community_messages_X",
            "comments_post_p9",
            "typing_post_p9",
        ] {
            assert_eq!(ChannelKey::parse(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        for raw in [
            "",
            "direct_messages_",
            "community_messages_a b",
            "community_messages_x;drop",
            "comments_post",
            "comments__p1",
            "comments_Post_p1",
            "typing_post_",
            "presence_u1",
        ] {
            let err = ChannelKey::parse(raw).unwrap_err();
            assert!(
                matches!(err, LinkError::SubscriptionRejected(_)),
                "expected rejection for {:?}, got {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_server_side_spec() {
        let community = ChannelKey::community_messages("X");
        assert_eq!(community.table(), Some("community_messages"));
        assert_eq!(community.server_filter().as_deref(), Some("community_id=eq.X"));
        assert!(!community.requires_relevance_check());

        let direct = ChannelKey::direct_messages("u1");
        assert_eq!(direct.server_filter(), None);
        assert!(direct.requires_relevance_check());
        assert_eq!(direct.user_id(), Some("u1"));

        let typing = ChannelKey::typing("post", "p1");
        assert_eq!(typing.table(), None);
        assert!(typing.is_ephemeral());
    }
}
