//! Typing indicators over a broadcast-only channel.

use realtime_link::{ClientMessage, RealtimeClient, ServerMessage, TypingChannel};
use serde_json::json;
use std::time::Duration;

mod common;

use common::{test_timeouts, wait_until, MockTransport, ServerEnd};

const CHANNEL: &str = "typing_post_p1";

async fn open_typing() -> (RealtimeClient, TypingChannel, ServerEnd) {
    let transport = MockTransport::new();
    let client = RealtimeClient::builder()
        .transport(transport.clone())
        .timeouts(test_timeouts())
        .build()
        .unwrap();
    let typing = client.typing("post", "p1", "A").await.unwrap();
    let mut server = transport.next_link().await;
    let frame = server.accept_subscribe(CHANNEL).await;
    assert_eq!(
        frame,
        ClientMessage::Subscribe {
            channel: CHANNEL.to_string(),
            table: None,
            filter: None,
            events: Vec::new(),
        }
    );
    (client, typing, server)
}

fn signal(user_id: &str) -> ServerMessage {
    ServerMessage::Broadcast {
        channel: CHANNEL.to_string(),
        event: "typing".to_string(),
        payload: json!({ "user_id": user_id }),
    }
}

#[tokio::test(start_paused = true)]
async fn test_indicator_expires_after_ttl() {
    let (_client, typing, server) = open_typing().await;
    let started = tokio::time::Instant::now();

    server.push(signal("B"));
    wait_until(|| typing.active() == vec!["B".to_string()]).await;

    let mut active = typing.watch();
    active.borrow_and_update();
    active.changed().await.unwrap();
    assert!(active.borrow().is_empty());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "expired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(3_500), "expired late: {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_own_signals_are_ignored() {
    let (_client, typing, server) = open_typing().await;

    server.push(signal("A"));
    server.push(signal("C"));
    wait_until(|| !typing.active().is_empty()).await;
    assert_eq!(typing.active(), vec!["C".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_send_is_throttled() {
    let (_client, typing, mut server) = open_typing().await;

    assert!(typing.send());
    assert!(!typing.send());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!typing.send());
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(typing.send());

    for _ in 0..2 {
        match server.next_frame().await {
            ClientMessage::Broadcast {
                channel,
                event,
                payload,
            } => {
                assert_eq!(channel, CHANNEL);
                assert_eq!(event, "typing");
                assert_eq!(payload["user_id"], "A");
            },
            other => panic!("unexpected frame {:?}", other),
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.drain_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_clears_and_leaves_channel() {
    let (client, typing, mut server) = open_typing().await;

    server.push(signal("B"));
    wait_until(|| !typing.active().is_empty()).await;

    typing.close();
    assert!(typing.active().is_empty());
    assert_eq!(client.active_subscription_count(), 0);
    assert_eq!(
        server.next_frame().await,
        ClientMessage::Unsubscribe {
            channel: CHANNEL.to_string()
        }
    );
}
