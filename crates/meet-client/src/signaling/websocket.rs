//! WebSocket signaling transport.
//!
//! Frames are JSON text frames `{"event": "<name>", "data": <payload>}`.
//! After the upgrade the server sends
//! `{"event": "connect", "data": {"socketId": "..."}}`; the link is
//! returned once that handshake frame arrives.

use super::client::{ConnectOptions, SignalingLink, SignalingTransport, TransportKind};
use super::events::{ClientEvent, ServerEvent};
use crate::errors::SignalingError;

use async_trait::async_trait;
use common::secret::bearer_header_value;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};
use url::Url;

/// Buffer size of the per-link frame channels.
const LINK_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
enum HandshakeFrame {
    Connect {
        #[serde(rename = "socketId")]
        socket_id: String,
    },
}

/// Signaling over a single WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Rewrites `http(s)` to `ws(s)`; leaves `ws(s)` alone.
///
/// # Errors
///
/// Returns `SignalingError::Connect` for unparsable URLs or other schemes.
pub fn websocket_url(url: &str) -> Result<Url, SignalingError> {
    let mut parsed = Url::parse(url)
        .map_err(|e| SignalingError::Connect(format!("invalid signaling URL: {e}")))?;

    let scheme = match parsed.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SignalingError::Connect(format!(
                "unsupported signaling URL scheme: {other}"
            )))
        }
    };

    parsed
        .set_scheme(scheme)
        .map_err(|()| SignalingError::Connect(format!("cannot use scheme {scheme} for {url}")))?;

    Ok(parsed)
}

fn parse_handshake(text: &str) -> Result<String, SignalingError> {
    match serde_json::from_str::<HandshakeFrame>(text) {
        Ok(HandshakeFrame::Connect { socket_id }) if !socket_id.is_empty() => Ok(socket_id),
        Ok(HandshakeFrame::Connect { .. }) => {
            Err(SignalingError::Protocol("empty socket id in handshake".to_string()))
        }
        Err(e) => Err(SignalingError::Protocol(format!(
            "expected connect handshake: {e}"
        ))),
    }
}

async fn read_handshake<S>(read: &mut S) -> Result<String, SignalingError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame.map_err(|e| SignalingError::Connect(e.to_string()))? {
            Message::Text(text) => return parse_handshake(&text),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(SignalingError::Protocol(
        "connection closed before handshake".to_string(),
    ))
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn open(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<SignalingLink, SignalingError> {
        if !options.transports.contains(&TransportKind::WebSocket) {
            return Err(SignalingError::UnsupportedTransport);
        }
        if options.transports.first() != Some(&TransportKind::WebSocket) {
            debug!(target: "meet.signaling.ws", "Polling transport not supported, using WebSocket");
        }

        let ws_url = websocket_url(url)?;
        let mut request = ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| SignalingError::Connect(e.to_string()))?;

        if options.with_credentials {
            if let Some(token) = &options.credentials {
                let value = HeaderValue::from_str(&bearer_header_value(token)).map_err(|_| {
                    SignalingError::Connect("credentials are not a valid header value".to_string())
                })?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| SignalingError::Connect(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let socket_id = read_handshake(&mut read).await?;
        debug!(target: "meet.signaling.ws", socket_id = %socket_id, url = %ws_url, "WebSocket handshake complete");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientEvent>(LINK_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(LINK_BUFFER);

        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "meet.signaling.ws", event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    debug!(target: "meet.signaling.ws", error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(target: "meet.signaling.ws", error = %e, "Ignoring unrecognized frame");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(target: "meet.signaling.ws", error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(SignalingLink {
            socket_id,
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url_rewrites_http() {
        assert_eq!(
            websocket_url("http://localhost:8080").unwrap().as_str(),
            "ws://localhost:8080/"
        );
        assert_eq!(
            websocket_url("https://meet.example.com/socket").unwrap().as_str(),
            "wss://meet.example.com/socket"
        );
        assert_eq!(
            websocket_url("ws://127.0.0.1:9000/io").unwrap().as_str(),
            "ws://127.0.0.1:9000/io"
        );
    }

    #[test]
    fn test_websocket_url_rejects_other_schemes() {
        assert!(matches!(
            websocket_url("ftp://example.com"),
            Err(SignalingError::Connect(_))
        ));
        assert!(websocket_url("not a url").is_err());
    }

    #[test]
    fn test_parse_handshake() {
        assert_eq!(
            parse_handshake(r#"{"event":"connect","data":{"socketId":"abc123"}}"#).unwrap(),
            "abc123"
        );
        assert!(matches!(
            parse_handshake(r#"{"event":"connect","data":{"socketId":""}}"#),
            Err(SignalingError::Protocol(_))
        ));
        assert!(matches!(
            parse_handshake(r#"{"event":"usersOnline","data":{"users":[]}}"#),
            Err(SignalingError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_open_requires_websocket_in_preferences() {
        let options = ConnectOptions {
            transports: vec![TransportKind::Polling],
            with_credentials: false,
            credentials: None,
            reconnection: crate::signaling::client::ReconnectPolicy {
                attempts: 0,
                delay: std::time::Duration::from_millis(1),
                delay_max: std::time::Duration::from_millis(1),
            },
            timeout: std::time::Duration::from_millis(100),
        };

        let result = WebSocketTransport::new()
            .open("http://127.0.0.1:9", &options)
            .await;
        assert!(matches!(result, Err(SignalingError::UnsupportedTransport)));
    }
}
