//! Feature feeds: a reconciled collection bound to a channel subscription
//! and an outbound writer.
//!
//! Incoming events are merged by the subscription handler. `send()` appends
//! the optimistic entry, awaits the writer, and then either confirms it or
//! rolls it back. A `send()` future dropped mid-write also rolls back, so no
//! entry stays pending forever.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use super::collection::{Applied, Entry, ReconcileConfig, ReconciledCollection};
use super::records::{Comment, CommunityMessage, DirectMessage, Reconcilable};
use super::writers::{
    CommentDraft, CommentWriter, CommunityMessageDraft, CommunityMessageWriter, MessageDraft,
    MessageWriter,
};
use crate::{
    error::{LinkError, Result},
    models::{ChangeEvent, ChannelKey},
    subscription::{ChannelHandlers, SubscriptionHandle, SubscriptionRegistry},
};

type Scope = Arc<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// A reconciled collection kept in sync with one channel.
///
/// [`revisions`](Self::revisions) ticks on every visible change so a view
/// can re-render.
pub struct Feed<T: Reconcilable> {
    key: ChannelKey,
    collection: Arc<Mutex<ReconciledCollection<T>>>,
    revision: Arc<watch::Sender<u64>>,
    handle: Mutex<Option<SubscriptionHandle>>,
}

impl<T: Reconcilable> std::fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("key", &self.key.to_string())
            .field("len", &self.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl<T: Reconcilable> Feed<T> {
    async fn open(
        registry: &SubscriptionRegistry,
        key: ChannelKey,
        actor_id: &str,
        config: ReconcileConfig,
        scope: Scope,
    ) -> Result<Self> {
        let collection = Arc::new(Mutex::new(ReconciledCollection::with_config(actor_id, config)));
        let (revision, _) = watch::channel(0u64);
        let revision = Arc::new(revision);

        let handlers = {
            let collection = collection.clone();
            let revision = revision.clone();
            ChannelHandlers::new().on_change(move |event| {
                if !scope(event) {
                    return;
                }
                let applied = collection.lock().apply_event(event);
                match applied {
                    Ok(applied) if applied.mutated() => bump(&revision),
                    Ok(applied) => {
                        log::debug!(
                            "[realtime-link] {} {:?} on '{}' caused no change ({:?})",
                            event.event_type,
                            event.record_id(),
                            event.key,
                            applied
                        );
                    },
                    Err(e) => log::warn!("[realtime-link] Unreadable row on '{}': {}", event.key, e),
                }
            })
        };
        let handle = registry.subscribe(&key.to_string(), handlers).await?;

        Ok(Self {
            key,
            collection,
            revision,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Snapshot of the current entries, in display order.
    pub fn entries(&self) -> Vec<Entry<T>> {
        self.collection.lock().entries().to_vec()
    }

    pub fn records(&self) -> Vec<T> {
        self.collection.lock().records()
    }

    pub fn len(&self) -> usize {
        self.collection.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.lock().is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.collection.lock().pending_count()
    }

    /// Replace confirmed state with a full refetch, e.g. from an
    /// `on_resubscribed` callback.
    pub fn replace_all(&self, snapshot: Vec<T>) {
        self.collection.lock().replace_all(snapshot);
        bump(&self.revision);
    }

    /// Ticks on every visible change.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Stop receiving events. Local state is kept.
    pub fn close(&self) {
        if let Some(mut handle) = self.handle.lock().take() {
            handle.unsubscribe();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.lock().is_none()
    }

    async fn submit<Fut>(&self, draft: T, write: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let temp_id = self.collection.lock().submit(draft);
        bump(&self.revision);

        let mut guard = PendingGuard {
            feed: self,
            temp_id: &temp_id,
            armed: true,
        };
        let outcome = write.await;
        guard.armed = false;

        match outcome {
            Ok(confirmed) => {
                let applied = self.collection.lock().confirm(&temp_id, confirmed.clone());
                if applied == Applied::Duplicate {
                    log::debug!(
                        "[realtime-link] '{}' already delivered by the feed",
                        confirmed.id()
                    );
                }
                bump(&self.revision);
                Ok(confirmed)
            },
            Err(e) => {
                self.collection.lock().fail(&temp_id);
                bump(&self.revision);
                log::warn!("[realtime-link] Write on '{}' failed, rolled back: {}", self.key, e);
                Err(match e {
                    LinkError::WriteFailed(_) => e,
                    other => LinkError::WriteFailed(other.to_string()),
                })
            },
        }
    }
}

/// Rolls back the optimistic entry if `submit` is dropped mid-write.
struct PendingGuard<'a, T: Reconcilable> {
    feed: &'a Feed<T>,
    temp_id: &'a str,
    armed: bool,
}

impl<T: Reconcilable> Drop for PendingGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.feed.collection.lock().fail(self.temp_id);
            bump(&self.feed.revision);
        }
    }
}

fn bump(revision: &watch::Sender<u64>) {
    revision.send_modify(|r| *r += 1);
}

/// Messages of one direct conversation.
///
/// Rides the user's `direct_messages_<userId>` channel, which carries every
/// conversation of that user, and keeps only rows of its own conversation.
pub struct DirectMessageFeed {
    feed: Feed<DirectMessage>,
    writer: Arc<dyn MessageWriter>,
    user_id: String,
    conversation_id: String,
}

impl DirectMessageFeed {
    pub async fn open(
        registry: &SubscriptionRegistry,
        user_id: &str,
        conversation_id: &str,
        writer: Arc<dyn MessageWriter>,
    ) -> Result<Self> {
        Self::open_with_config(registry, user_id, conversation_id, writer, ReconcileConfig::default())
            .await
    }

    pub async fn open_with_config(
        registry: &SubscriptionRegistry,
        user_id: &str,
        conversation_id: &str,
        writer: Arc<dyn MessageWriter>,
        config: ReconcileConfig,
    ) -> Result<Self> {
        let scope_id = conversation_id.to_string();
        let scope: Scope = Arc::new(move |event: &ChangeEvent| {
            // Partial DELETE rows may omit the column; deletes are by id.
            event
                .field_str("conversation_id")
                .map_or(true, |id| id == scope_id)
        });
        let feed = Feed::open(
            registry,
            ChannelKey::direct_messages(user_id),
            user_id,
            config,
            scope,
        )
        .await?;
        Ok(Self {
            feed,
            writer,
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Send a message optimistically. On failure the entry is rolled back and
    /// `WriteFailed` returned.
    pub async fn send(&self, content: &str, reply_to_id: Option<&str>) -> Result<DirectMessage> {
        let draft = MessageDraft {
            conversation_id: self.conversation_id.clone(),
            sender_id: self.user_id.clone(),
            content: content.to_string(),
            reply_to_id: reply_to_id.map(str::to_string),
        };
        let optimistic = DirectMessage {
            id: String::new(),
            conversation_id: draft.conversation_id.clone(),
            sender_id: draft.sender_id.clone(),
            content: draft.content.clone(),
            reply_to_id: draft.reply_to_id.clone(),
            created_at: Some(Utc::now()),
        };
        self.feed
            .submit(optimistic, self.writer.create_message(&draft))
            .await
    }
}

impl Deref for DirectMessageFeed {
    type Target = Feed<DirectMessage>;

    fn deref(&self) -> &Self::Target {
        &self.feed
    }
}

/// Messages of one community.
pub struct CommunityMessageFeed {
    feed: Feed<CommunityMessage>,
    writer: Arc<dyn CommunityMessageWriter>,
    user_id: String,
    community_id: String,
}

impl CommunityMessageFeed {
    pub async fn open(
        registry: &SubscriptionRegistry,
        user_id: &str,
        community_id: &str,
        writer: Arc<dyn CommunityMessageWriter>,
    ) -> Result<Self> {
        Self::open_with_config(registry, user_id, community_id, writer, ReconcileConfig::default())
            .await
    }

    pub async fn open_with_config(
        registry: &SubscriptionRegistry,
        user_id: &str,
        community_id: &str,
        writer: Arc<dyn CommunityMessageWriter>,
        config: ReconcileConfig,
    ) -> Result<Self> {
        let feed = Feed::open(
            registry,
            ChannelKey::community_messages(community_id),
            user_id,
            config,
            Arc::new(|_: &ChangeEvent| true),
        )
        .await?;
        Ok(Self {
            feed,
            writer,
            user_id: user_id.to_string(),
            community_id: community_id.to_string(),
        })
    }

    pub fn community_id(&self) -> &str {
        &self.community_id
    }

    pub async fn send(
        &self,
        content: &str,
        reply_to_id: Option<&str>,
    ) -> Result<CommunityMessage> {
        let draft = CommunityMessageDraft {
            community_id: self.community_id.clone(),
            sender_id: self.user_id.clone(),
            content: content.to_string(),
            reply_to_id: reply_to_id.map(str::to_string),
        };
        let optimistic = CommunityMessage {
            id: String::new(),
            community_id: draft.community_id.clone(),
            sender_id: draft.sender_id.clone(),
            content: draft.content.clone(),
            reply_to_id: draft.reply_to_id.clone(),
            created_at: Some(Utc::now()),
        };
        self.feed
            .submit(optimistic, self.writer.create_community_message(&draft))
            .await
    }
}

impl Deref for CommunityMessageFeed {
    type Target = Feed<CommunityMessage>;

    fn deref(&self) -> &Self::Target {
        &self.feed
    }
}

/// Comments on one content item.
pub struct CommentFeed {
    feed: Feed<Comment>,
    writer: Arc<dyn CommentWriter>,
    user_id: String,
    content_type: String,
    content_id: String,
}

impl CommentFeed {
    pub async fn open(
        registry: &SubscriptionRegistry,
        user_id: &str,
        content_type: &str,
        content_id: &str,
        writer: Arc<dyn CommentWriter>,
    ) -> Result<Self> {
        let feed = Feed::open(
            registry,
            ChannelKey::comments(content_type, content_id),
            user_id,
            ReconcileConfig::default(),
            Arc::new(|_: &ChangeEvent| true),
        )
        .await?;
        Ok(Self {
            feed,
            writer,
            user_id: user_id.to_string(),
            content_type: content_type.to_string(),
            content_id: content_id.to_string(),
        })
    }

    pub async fn send(&self, content: &str, parent_id: Option<&str>) -> Result<Comment> {
        let draft = CommentDraft {
            content_type: self.content_type.clone(),
            content_id: self.content_id.clone(),
            author_id: self.user_id.clone(),
            content: content.to_string(),
            parent_id: parent_id.map(str::to_string),
        };
        let optimistic = Comment {
            id: String::new(),
            content_type: draft.content_type.clone(),
            content_id: draft.content_id.clone(),
            author_id: draft.author_id.clone(),
            content: draft.content.clone(),
            parent_id: draft.parent_id.clone(),
            created_at: Some(Utc::now()),
        };
        self.feed
            .submit(optimistic, self.writer.create_comment(&draft))
            .await
    }
}

impl Deref for CommentFeed {
    type Target = Feed<Comment>;

    fn deref(&self) -> &Self::Target {
        &self.feed
    }
}
