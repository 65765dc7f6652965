//! `GET /ws`: text frames `subscribe::<order id | address | order pair>`.
//!
//! A connection may hold any number of subscriptions; their updates are
//! merged. Closing the socket drops every subscription it opened.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt as _;
use futures::stream::SelectAll;
use serde::Serialize;
use tokio::time::Instant;

use super::AppState;
use crate::notifier::{Notifier, SubscriptionKind, SubscriptionStream};

/// Silence from the client after which the server pings.
pub const IDLE_PING: Duration = Duration::from_secs(90);

const SUBSCRIBE_PREFIX: &str = "subscribe::";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WsError {
    pub code: u16,
    pub error: String,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "msg", rename_all = "snake_case")]
enum Envelope<'a> {
    Error(&'a WsError),
}

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state.notifier))
}

pub fn parse_command(text: &str) -> Result<SubscriptionKind, WsError> {
    let target = text.trim().strip_prefix(SUBSCRIBE_PREFIX).ok_or_else(|| WsError {
        code: 400,
        error: format!("unknown command: {}", text.trim()),
    })?;
    SubscriptionKind::parse(target).map_err(|err| WsError {
        code: 400,
        error: err.to_string(),
    })
}

async fn serve(mut socket: WebSocket, notifier: Arc<Notifier>) {
    let mut subscriptions: SelectAll<SubscriptionStream> = SelectAll::new();
    let mut ping_at = Instant::now() + IDLE_PING;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    break;
                };
                ping_at = Instant::now() + IDLE_PING;
                match message {
                    Message::Text(text) => match parse_command(&text) {
                        Ok(kind) => {
                            tracing::debug!(%kind, "ws subscribe");
                            subscriptions.push(notifier.subscribe(kind));
                        }
                        Err(err) => {
                            if send_json(&mut socket, &Envelope::Error(&err)).await.is_err() {
                                break;
                            }
                        }
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(update) = subscriptions.next(), if !subscriptions.is_empty() => {
                if send_json(&mut socket, &update).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(ping_at) => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                ping_at = Instant::now() + IDLE_PING;
            }
        }
    }
    tracing::debug!(subscriptions = subscriptions.len(), "ws closed");
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!(error = %err, "ws: encode message");
            return Ok(());
        }
    };
    socket.send(Message::Text(text)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subscribe_frames() {
        assert_eq!(parse_command("subscribe::7").unwrap(), SubscriptionKind::OrderId(7));
        assert_eq!(
            parse_command("subscribe::0xabc\n").unwrap(),
            SubscriptionKind::Address("0xabc".to_string())
        );
        assert_eq!(parse_command("hello").unwrap_err().code, 400);
        assert_eq!(parse_command("subscribe::").unwrap_err().code, 400);
    }

    #[test]
    fn errors_use_the_type_msg_envelope() {
        let err = WsError {
            code: 400,
            error: "bad".to_string(),
        };
        assert_eq!(
            serde_json::to_value(Envelope::Error(&err)).unwrap(),
            serde_json::json!({"type": "error", "msg": {"code": 400, "error": "bad"}})
        );
    }
}
