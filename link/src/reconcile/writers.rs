//! Outbound write collaborators.
//!
//! Each call returns the confirmed record with its server id. Errors are
//! wrapped as [`LinkError::WriteFailed`](crate::LinkError::WriteFailed) by
//! the feeds, which roll back the optimistic entry first.

use async_trait::async_trait;
use serde::Serialize;

use super::records::{Comment, CommunityMessage, DirectMessage};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDraft {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommunityMessageDraft {
    pub community_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentDraft {
    pub content_type: String,
    pub content_id: String,
    pub author_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// create-message for direct conversations.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn create_message(&self, draft: &MessageDraft) -> Result<DirectMessage>;
}

#[async_trait]
pub trait CommunityMessageWriter: Send + Sync {
    async fn create_community_message(
        &self,
        draft: &CommunityMessageDraft,
    ) -> Result<CommunityMessage>;
}

#[async_trait]
pub trait CommentWriter: Send + Sync {
    async fn create_comment(&self, draft: &CommentDraft) -> Result<Comment>;
}
