//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Frames are JSON text messages (see [`ClientMessage`] / [`ServerMessage`]).
//! Protocol-level Ping frames are answered inline; application keepalive is
//! handled by the connection task with `heartbeat` frames.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    error::Error as WsError,
    http::{header::AUTHORIZATION, HeaderValue, Request},
    protocol::Message,
};
use tokio_tungstenite::MaybeTlsStream;
use url::Url;

use super::transport::{Inbound, Transport, TransportLink};
use super::MAX_WS_TEXT_MESSAGE_BYTES;
use crate::{
    error::{LinkError, Result},
    event_handlers::DisconnectReason,
    models::{ClientMessage, ConnectionOptions, ServerMessage},
};

pub(crate) type WebSocketStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default endpoint path used when the base URL has no path of its own.
const DEFAULT_WS_PATH: &str = "/realtime/v1/ws";

/// Resolve a user-supplied base URL to the WebSocket endpoint.
///
/// `http(s)` is mapped to `ws(s)`. An explicit path is kept, otherwise
/// [`DEFAULT_WS_PATH`] is used.
pub(crate) fn resolve_ws_url(base_url: &str) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    if base.host_str().is_none() {
        return Err(LinkError::ConfigurationError("base_url must include a host".to_string()));
    }
    if !base.username().is_empty() || base.password().is_some() {
        return Err(LinkError::ConfigurationError(
            "base_url must not include username/password credentials".to_string(),
        ));
    }

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        LinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_fragment(None);
    if ws_url.path().is_empty() || ws_url.path() == "/" {
        ws_url.set_path(DEFAULT_WS_PATH);
    }

    Ok(ws_url.to_string())
}

fn apply_auth_header(request: &mut Request<()>, token: Option<&str>) -> Result<()> {
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            LinkError::ConfigurationError(format!("Invalid token for Authorization header: {}", e))
        })?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(())
}

pub(crate) fn parse_message(text: &str) -> Result<ServerMessage> {
    serde_json::from_str::<ServerMessage>(text).map_err(|e| {
        LinkError::SerializationError(format!("Failed to parse message as ServerMessage: {}", e))
    })
}

/// Production [`Transport`]: one WebSocket per [`open`](Transport::open).
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    auth_token: Option<String>,
}

impl WebSocketTransport {
    pub fn new(base_url: &str, options: &ConnectionOptions) -> Result<Self> {
        Ok(Self {
            url: resolve_ws_url(base_url)?,
            auth_token: options.auth_token.clone(),
        })
    }

    /// The resolved `ws(s)://` endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self) -> Result<Box<dyn TransportLink>> {
        log::debug!("[realtime-link] Opening WebSocket to {}", self.url);
        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            LinkError::WebSocketError(format!("Failed to build WebSocket request: {}", e))
        })?;
        apply_auth_header(&mut request, self.auth_token.as_deref())?;

        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => Ok(Box::new(WebSocketLink { stream })),
            Err(WsError::Http(response)) => {
                let status = response.status();
                let body_text = response
                    .into_body()
                    .as_ref()
                    .and_then(|b| {
                        if b.is_empty() {
                            None
                        } else {
                            Some(String::from_utf8_lossy(b).into_owned())
                        }
                    })
                    .unwrap_or_default();
                let message = match status.as_u16() {
                    401 => "Unauthorized: realtime endpoint requires valid credentials".to_string(),
                    403 => "Forbidden: access to realtime endpoint denied".to_string(),
                    code if body_text.is_empty() => format!("WebSocket HTTP error: {}", code),
                    code => format!("WebSocket HTTP error {}: {}", code, body_text),
                };
                Err(LinkError::WebSocketError(message))
            },
            Err(e) => Err(LinkError::WebSocketError(format!("Connection failed: {}", e))),
        }
    }
}

struct WebSocketLink {
    stream: WebSocketStream,
}

impl WebSocketLink {
    fn decode(text: &str) -> Option<Inbound> {
        if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
            log::warn!("[realtime-link] Text message too large ({} bytes)", text.len());
            return None;
        }
        match parse_message(text) {
            Ok(message) => Some(Inbound::Message {
                message,
                raw: text.to_owned(),
            }),
            Err(e) => {
                log::warn!("[realtime-link] {}", e);
                None
            },
        }
    }
}

#[async_trait]
impl TransportLink for WebSocketLink {
    async fn send(&mut self, message: &ClientMessage) -> Result<String> {
        let payload = serde_json::to_string(message)?;
        self.stream
            .send(Message::Text(payload.clone().into()))
            .await
            .map_err(|e| LinkError::WebSocketError(format!("Failed to send frame: {}", e)))?;
        Ok(payload)
    }

    async fn recv(&mut self) -> Result<Inbound> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(inbound) = Self::decode(text.as_str()) {
                        return Ok(inbound);
                    }
                },
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        if let Some(inbound) = Self::decode(text) {
                            return Ok(inbound);
                        }
                    },
                    Err(e) => log::warn!("[realtime-link] Invalid UTF-8 in binary frame: {}", e),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.stream.send(Message::Pong(payload)).await;
                },
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                        None => DisconnectReason::new("Server closed connection"),
                    };
                    return Ok(Inbound::Closed(reason));
                },
                Some(Err(e)) => return Err(LinkError::WebSocketError(e.to_string())),
                None => return Ok(Inbound::Closed(DisconnectReason::new("WebSocket stream ended"))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
