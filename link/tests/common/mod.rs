#![allow(dead_code)]

use async_trait::async_trait;
use realtime_link::{
    ChangeType, ClientMessage, DisconnectReason, Inbound, LinkError, LinkTimeouts, RawChangeEvent,
    Result, ServerMessage, Transport, TransportLink,
};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::Instant;

/// How the next `open()` call behaves.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Accept,
    Refuse(String),
    /// Never completes; exercises the connection timeout.
    Hang,
}

/// In-memory transport with scripted open outcomes.
///
/// Every accepted open produces a [`ServerEnd`] that tests pull with
/// [`MockTransport::next_link`] to push frames and read what the client sent.
pub struct MockTransport {
    script: Mutex<VecDeque<OpenOutcome>>,
    opens: AtomicUsize,
    open_times: Mutex<Vec<Instant>>,
    open_delay: Mutex<Duration>,
    links_tx: mpsc::UnboundedSender<ServerEnd>,
    links_rx: TokioMutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

impl MockTransport {
    /// Accepts every open unless scripted otherwise.
    pub fn new() -> Arc<Self> {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
            open_times: Mutex::new(Vec::new()),
            open_delay: Mutex::new(Duration::ZERO),
            links_tx,
            links_rx: TokioMutex::new(links_rx),
        })
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Delay every open by `delay` before applying its outcome.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// When each `open()` call started.
    pub fn open_times(&self) -> Vec<Instant> {
        self.open_times.lock().unwrap().clone()
    }

    /// Server side of the next accepted link.
    pub async fn next_link(&self) -> ServerEnd {
        let mut rx = self.links_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("no link opened in time")
            .expect("transport dropped")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<Box<dyn TransportLink>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_times.lock().unwrap().push(Instant::now());
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(OpenOutcome::Accept);
        match outcome {
            OpenOutcome::Accept => {
                let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
                let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
                let _ = self.links_tx.send(ServerEnd {
                    to_client: to_client_tx,
                    from_client: from_client_rx,
                });
                Ok(Box::new(MockLink {
                    inbound: to_client_rx,
                    outbound: from_client_tx,
                }))
            },
            OpenOutcome::Refuse(reason) => Err(LinkError::WebSocketError(reason)),
            OpenOutcome::Hang => std::future::pending().await,
        }
    }
}

struct MockLink {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

#[async_trait]
impl TransportLink for MockLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<String> {
        let raw = serde_json::to_string(message)?;
        self.outbound
            .send(message.clone())
            .map_err(|_| LinkError::WebSocketError("server end dropped".to_string()))?;
        Ok(raw)
    }

    async fn recv(&mut self) -> Result<Inbound> {
        match self.inbound.recv().await {
            Some(inbound) => Ok(inbound),
            None => Ok(Inbound::Closed(DisconnectReason::with_code("server end dropped", 1006))),
        }
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Test-controlled server side of one link.
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ServerEnd {
    pub fn push(&self, message: ServerMessage) {
        let raw = serde_json::to_string(&message).unwrap();
        let _ = self.to_client.send(Inbound::Message { message, raw });
    }

    /// Simulate an abnormal close.
    pub fn drop_link(self) {
        let _ = self
            .to_client
            .send(Inbound::Closed(DisconnectReason::with_code("network lost", 1006)));
    }

    /// Next non-heartbeat frame from the client.
    pub async fn next_frame(&mut self) -> ClientMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(30), self.from_client.recv())
                .await
                .expect("no frame from client in time")
                .expect("client link closed");
            if frame != ClientMessage::Heartbeat {
                return frame;
            }
        }
    }

    /// Next frame from the client, heartbeats included.
    pub async fn next_raw_frame(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(60), self.from_client.recv())
            .await
            .expect("no frame from client in time")
            .expect("client link closed")
    }

    /// Wait for a `subscribe` on `channel` and acknowledge it.
    pub async fn accept_subscribe(&mut self, channel: &str) -> ClientMessage {
        let frame = self.next_frame().await;
        match &frame {
            ClientMessage::Subscribe { channel: c, .. } if c == channel => {
                self.push(ServerMessage::Subscribed {
                    channel: channel.to_string(),
                });
            },
            other => panic!("expected subscribe for {}, got {:?}", channel, other),
        }
        frame
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain_frames(&mut self) -> Vec<ClientMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub fn change(channel: &str, event_type: ChangeType, table: &str, row: JsonValue) -> ServerMessage {
    let (new, old) = match event_type {
        ChangeType::Delete => (None, Some(row)),
        _ => (Some(row), None),
    };
    ServerMessage::Change {
        channel: channel.to_string(),
        event: RawChangeEvent {
            event_type,
            table: table.to_string(),
            schema: "public".to_string(),
            new,
            old,
        },
    }
}

/// Short timeouts with keepalive off, so only scripted frames flow.
pub fn test_timeouts() -> LinkTimeouts {
    LinkTimeouts::builder()
        .connection_timeout(Duration::from_secs(5))
        .send_timeout(Duration::from_secs(5))
        .enrichment_timeout(Duration::from_secs(1))
        .relevance_timeout(Duration::from_secs(1))
        .keepalive_interval(Duration::ZERO)
        .pong_timeout(Duration::ZERO)
        .build()
}

/// Yield until `cond` holds, bounded.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
