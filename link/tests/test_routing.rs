//! Relevance filtering and enrichment on the router path.

use async_trait::async_trait;
use realtime_link::{
    ChangeEvent, ChangeType, ChannelHandlers, ChannelKind, ConversationDirectory, DirectMessage,
    DirectMessageFeed, LinkError, MessageDraft, MessageWriter, ParticipantRelevance,
    ProfileDirectory, ProfileEnricher, RealtimeClient, Result,
};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;

use common::{change, test_timeouts, wait_until, MockTransport};

struct Conversations {
    lookups: AtomicUsize,
}

#[async_trait]
impl ConversationDirectory for Conversations {
    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match conversation_id {
            "C123" => Ok(vec!["A".to_string(), "B".to_string()]),
            "C999" => Ok(vec!["X".to_string(), "Y".to_string()]),
            _ => Err(LinkError::InternalError("lookup failed".to_string())),
        }
    }
}

struct Profiles;

#[async_trait]
impl ProfileDirectory for Profiles {
    async fn profile(&self, user_id: &str) -> Result<JsonValue> {
        match user_id {
            "B" => Ok(json!({ "id": "B", "display_name": "Bea" })),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!({}))
            },
            _ => Err(LinkError::InternalError("profile service down".to_string())),
        }
    }
}

struct NoWrites;

#[async_trait]
impl MessageWriter for NoWrites {
    async fn create_message(&self, _draft: &MessageDraft) -> Result<DirectMessage> {
        Err(LinkError::InternalError("read-only feed".to_string()))
    }
}

fn dm_row(id: &str, conversation_id: &str, sender_id: &str) -> JsonValue {
    json!({
        "id": id,
        "conversation_id": conversation_id,
        "sender_id": sender_id,
        "content": "hi"
    })
}

#[tokio::test]
async fn test_other_users_conversations_are_filtered_out() {
    let transport = MockTransport::new();
    let directory = Arc::new(Conversations {
        lookups: AtomicUsize::new(0),
    });
    let client = RealtimeClient::builder()
        .transport(transport.clone())
        .timeouts(test_timeouts())
        .relevance_check(
            ChannelKind::DirectMessages,
            Arc::new(ParticipantRelevance::new(directory.clone())),
        )
        .build()
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = received.clone();
    let _handle = client
        .subscribe(
            "direct_messages_A",
            ChannelHandlers::new().on_insert(move |e| {
                seen.lock().unwrap().push(e.record_id().unwrap_or_default());
            }),
        )
        .await
        .unwrap();
    let mut server = transport.next_link().await;
    server.accept_subscribe("direct_messages_A").await;

    let channel = "direct_messages_A";
    server.push(change(channel, ChangeType::Insert, "direct_messages", dm_row("m-1", "C999", "X")));
    server.push(change(channel, ChangeType::Insert, "direct_messages", dm_row("m-2", "C404", "Z")));
    server.push(change(channel, ChangeType::Insert, "direct_messages", dm_row("m-3", "C123", "B")));
    server.push(change(channel, ChangeType::Insert, "direct_messages", dm_row("m-4", "C123", "B")));

    wait_until(|| received.lock().unwrap().len() == 2).await;
    assert_eq!(*received.lock().unwrap(), vec!["m-3".to_string(), "m-4".to_string()]);
    // C999, C404 (failed, not cached) and C123 once.
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_direct_messages_fail_closed_without_a_check() {
    let transport = MockTransport::new();
    let client = RealtimeClient::builder()
        .transport(transport.clone())
        .timeouts(test_timeouts())
        .build()
        .unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let _dm = client
        .subscribe(
            "direct_messages_A",
            ChannelHandlers::new().on_change(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    let mut server = transport.next_link().await;
    server.accept_subscribe("direct_messages_A").await;

    let marker = Arc::new(AtomicUsize::new(0));
    let marker_counter = marker.clone();
    let _community = client
        .subscribe(
            "community_messages_1",
            ChannelHandlers::new().on_change(move |_| {
                marker_counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    server.accept_subscribe("community_messages_1").await;

    server.push(change(
        "direct_messages_A",
        ChangeType::Insert,
        "direct_messages",
        dm_row("m-1", "C123", "B"),
    ));
    server.push(change(
        "community_messages_1",
        ChangeType::Insert,
        "community_messages",
        json!({ "id": "cm-1", "community_id": "1", "sender_id": "B", "content": "x" }),
    ));

    // Frames are routed in order, so once the later one lands the earlier
    // one has been decided.
    wait_until(|| marker.load(Ordering::SeqCst) == 1).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_enrichment_is_best_effort() {
    let transport = MockTransport::new();
    let client = RealtimeClient::builder()
        .transport(transport.clone())
        .timeouts(test_timeouts())
        .enricher(Arc::new(ProfileEnricher::new(Arc::new(Profiles))))
        .build()
        .unwrap();

    let events = Arc::new(Mutex::new(Vec::<ChangeEvent>::new()));
    let seen = events.clone();
    let channel = "comments_post_1";
    let _handle = client
        .subscribe(
            channel,
            ChannelHandlers::new().on_change(move |e| seen.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap();
    let mut server = transport.next_link().await;
    server.accept_subscribe(channel).await;

    let row = |id: &str, author: &str| {
        json!({ "id": id, "content_type": "post", "content_id": "1", "author_id": author, "content": "c" })
    };
    server.push(change(channel, ChangeType::Insert, "comments", row("c-1", "B")));
    server.push(change(channel, ChangeType::Insert, "comments", row("c-2", "nobody")));
    server.push(change(channel, ChangeType::Insert, "comments", row("c-3", "slow")));
    server.push(change(channel, ChangeType::Delete, "comments", json!({ "id": "c-1" })));

    wait_until(|| events.lock().unwrap().len() == 4).await;
    let events = events.lock().unwrap();
    assert_eq!(events[0].enrichment_field("sender").unwrap()["display_name"], "Bea");
    assert!(events[1].enrichment.is_none(), "failed lookup still delivers the raw event");
    assert!(events[2].enrichment.is_none(), "timed-out lookup still delivers the raw event");
    assert_eq!(events[3].event_type, ChangeType::Delete);
    assert!(events[3].enrichment.is_none());
}

#[tokio::test]
async fn test_rows_from_another_table_are_dropped() {
    let transport = MockTransport::new();
    let client = RealtimeClient::builder()
        .transport(transport.clone())
        .timeouts(test_timeouts())
        .build()
        .unwrap();
    let ids = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = ids.clone();
    let channel = "community_messages_5";
    let _handle = client
        .subscribe(
            channel,
            ChannelHandlers::new().on_change(move |e| {
                seen.lock().unwrap().push(e.record_id().unwrap_or_default())
            }),
        )
        .await
        .unwrap();
    let mut server = transport.next_link().await;
    server.accept_subscribe(channel).await;

    server.push(change(channel, ChangeType::Insert, "comments", json!({ "id": "wrong" })));
    server.push(change(
        channel,
        ChangeType::Insert,
        "community_messages",
        json!({ "id": 17, "community_id": "5", "sender_id": "B", "content": "ok" }),
    ));
    wait_until(|| !ids.lock().unwrap().is_empty()).await;
    assert_eq!(*ids.lock().unwrap(), vec!["17".to_string()]);
}

#[tokio::test]
async fn test_id_only_delete_reaches_direct_message_feed() {
    let transport = MockTransport::new();
    let client = RealtimeClient::builder()
        .transport(transport.clone())
        .timeouts(test_timeouts())
        .relevance_check(
            ChannelKind::DirectMessages,
            Arc::new(ParticipantRelevance::new(Arc::new(Conversations {
                lookups: AtomicUsize::new(0),
            }))),
        )
        .build()
        .unwrap();
    let feed = DirectMessageFeed::open(client.registry(), "A", "C123", Arc::new(NoWrites))
        .await
        .unwrap();
    let mut server = transport.next_link().await;
    let channel = "direct_messages_A";
    server.accept_subscribe(channel).await;

    server.push(change(channel, ChangeType::Insert, "direct_messages", dm_row("m-1", "C123", "B")));
    server.push(change(channel, ChangeType::Delete, "direct_messages", json!({ "id": "m-1" })));
    server.push(change(channel, ChangeType::Insert, "direct_messages", dm_row("m-2", "C123", "B")));

    wait_until(|| feed.entries().iter().any(|e| e.id == "m-2")).await;
    let ids: Vec<String> = feed.entries().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["m-2".to_string()]);
}
