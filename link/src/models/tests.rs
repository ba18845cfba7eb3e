use serde_json::json;

use super::*;

// ==================== ConnectionOptions Tests ====================

#[test]
fn test_connection_options_default() {
    let opts = ConnectionOptions::default();

    assert!(opts.auto_reconnect, "auto_reconnect should default to true");
    assert_eq!(opts.reconnect_delay_ms, 1000, "reconnect_delay_ms should default to 1000");
    assert_eq!(
        opts.max_reconnect_delay_ms, 30000,
        "max_reconnect_delay_ms should default to 30000"
    );
    assert_eq!(opts.max_reconnect_attempts, 5, "reconnection must be bounded by default");
    assert_eq!(opts.max_channels, 100);
    assert!(opts.auth_token.is_none());
    opts.validate().expect("defaults should validate");
}

#[test]
fn test_connection_options_builder_pattern() {
    let opts = ConnectionOptions::new()
        .with_auto_reconnect(false)
        .with_reconnect_delay_ms(2000)
        .with_max_reconnect_delay_ms(60000)
        .with_max_reconnect_attempts(3)
        .with_max_channels(8)
        .with_auth_token("jwt");

    assert!(!opts.auto_reconnect);
    assert_eq!(opts.reconnect_delay_ms, 2000);
    assert_eq!(opts.max_reconnect_delay_ms, 60000);
    assert_eq!(opts.max_reconnect_attempts, 3);
    assert_eq!(opts.max_channels, 8);
    assert_eq!(opts.auth_token.as_deref(), Some("jwt"));
}

#[test]
fn test_connection_options_partial_json_uses_defaults() {
    let opts: ConnectionOptions =
        serde_json::from_value(json!({ "max_reconnect_attempts": 2 })).unwrap();

    assert_eq!(opts.max_reconnect_attempts, 2);
    assert_eq!(opts.reconnect_delay_ms, 1000);
    assert!(opts.auto_reconnect);
}

#[test]
fn test_connection_options_validation() {
    assert!(ConnectionOptions::new().with_reconnect_delay_ms(0).validate().is_err());
    assert!(ConnectionOptions::new()
        .with_reconnect_delay_ms(5000)
        .with_max_reconnect_delay_ms(1000)
        .validate()
        .is_err());
    assert!(ConnectionOptions::new().with_max_channels(0).validate().is_err());
}

// ==================== ReconnectState Tests ====================

#[test]
fn test_backoff_doubles_and_caps() {
    let delays: Vec<u64> = (1..=7)
        .map(|n| ReconnectState::delay_for_attempt(1000, 10_000, n))
        .collect();
    assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]);
}

#[test]
fn test_backoff_is_non_decreasing_for_large_attempts() {
    let mut previous = 0;
    for attempt in 1..=80 {
        let delay = ReconnectState::delay_for_attempt(750, 30_000, attempt);
        assert!(delay >= previous, "attempt {} went backwards", attempt);
        assert!(delay <= 30_000);
        previous = delay;
    }
}

#[test]
fn test_reconnect_state_exhausts_after_max_attempts() {
    let mut state = ReconnectState::new(3);
    assert_eq!(state.advance(100, 1000), Some(100));
    assert_eq!(state.advance(100, 1000), Some(200));
    assert_eq!(state.advance(100, 1000), Some(400));
    assert!(state.is_exhausted());
    assert_eq!(state.advance(100, 1000), None);
    assert_eq!(state.attempts, 3);

    state.reset();
    assert_eq!(state.attempts, 0);
    assert_eq!(state.advance(100, 1000), Some(100));
}

#[test]
fn test_reconnect_state_zero_attempts_never_retries() {
    let mut state = ReconnectState::new(0);
    assert_eq!(state.advance(100, 1000), None);
}

// ==================== EventFilter Tests ====================

#[test]
fn test_event_filter_only_and_union() {
    let inserts = EventFilter::only(&[ChangeType::Insert]);
    assert!(inserts.accepts(ChangeType::Insert));
    assert!(!inserts.accepts(ChangeType::Delete));

    let deletes = EventFilter::only(&[ChangeType::Delete]);
    let both = inserts.union(deletes);
    assert_eq!(both.event_types(), vec![ChangeType::Insert, ChangeType::Delete]);
    assert!(both.covers(&inserts));
    assert!(!inserts.covers(&both));
    assert!(EventFilter::none().is_empty());
    assert_eq!(EventFilter::default(), EventFilter::all());
}

// ==================== Wire Format Tests ====================

#[test]
fn test_server_change_message_parses_feed_shape() {
    let raw = json!({
        "type": "change",
        "channel": "community_messages_X",
        "event": {
            "eventType": "INSERT",
            "table": "community_messages",
            "schema": "public",
            "new": { "id": "m-1", "community_id": "X", "content": "hi" },
            "old": null
        }
    });

    let msg: ServerMessage = serde_json::from_value(raw).unwrap();
    match msg {
        ServerMessage::Change { channel, event } => {
            assert_eq!(channel, "community_messages_X");
            assert_eq!(event.event_type, ChangeType::Insert);
            assert_eq!(event.table, "community_messages");
            assert_eq!(event.new.unwrap()["content"], "hi");
            assert!(event.old.is_none());
        },
        other => panic!("expected change, got {:?}", other),
    }
}

#[test]
fn test_server_heartbeat_ack_parses() {
    let msg: ServerMessage = serde_json::from_str(r#"{"type":"heartbeat_ack"}"#).unwrap();
    assert_eq!(msg, ServerMessage::HeartbeatAck);
    assert!(msg.channel().is_none());
}

#[test]
fn test_client_subscribe_serialization_skips_empty_fields() {
    let msg = ClientMessage::Subscribe {
        channel: "typing_post_p1".to_string(),
        table: None,
        filter: None,
        events: vec![],
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json, json!({ "type": "subscribe", "channel": "typing_post_p1" }));

    let msg = ClientMessage::Subscribe {
        channel: "community_messages_X".to_string(),
        table: Some("community_messages".to_string()),
        filter: Some("community_id=eq.X".to_string()),
        events: vec![ChangeType::Insert, ChangeType::Update],
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["events"], json!(["INSERT", "UPDATE"]));
    assert_eq!(json["filter"], "community_id=eq.X");
}

// ==================== ChangeEvent Tests ====================

#[test]
fn test_change_event_delete_uses_old_row() {
    let raw = RawChangeEvent {
        event_type: ChangeType::Delete,
        table: "comments".to_string(),
        schema: "public".to_string(),
        new: None,
        old: Some(json!({ "id": 17 })),
    };
    let event = ChangeEvent::from_raw(ChannelKey::comments("post", "p1"), raw).unwrap();
    assert_eq!(event.record_id().as_deref(), Some("17"));
    assert!(event.enrichment.is_none());
}

#[test]
fn test_change_event_without_row_is_rejected() {
    let raw = RawChangeEvent {
        event_type: ChangeType::Insert,
        table: "comments".to_string(),
        schema: "public".to_string(),
        new: Some(serde_json::Value::Null),
        old: None,
    };
    assert!(ChangeEvent::from_raw(ChannelKey::comments("post", "p1"), raw).is_err());
}

// ==================== ConnectionState Tests ====================

#[test]
fn test_connection_state_public_strings() {
    assert_eq!(ConnectionState::Connected.as_str(), "connected");
    assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
    assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
    assert_eq!(ConnectionState::ReconnectExhausted.as_str(), "disconnected");
    assert_eq!(ConnectionState::ReconnectExhausted.to_string(), "reconnect_exhausted");
    assert!(ConnectionState::ReconnectExhausted.is_offline());
}
