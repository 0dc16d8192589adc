//! `/realtime/v1` websocket feed of inserted message rows.
//!
//! DESIGN
//! ======
//! One socket per subscription, speaking the Phoenix channel protocol
//! (JSON `{topic, event, payload, ref}` frames). The channel joins with a
//! `postgres_changes` INSERT filter on `chat_id`, so only that chat's rows
//! arrive. [`subscribe`] returns once the join is acknowledged; the reader
//! task then forwards rows and sends a heartbeat every
//! [`HEARTBEAT_INTERVAL`] until the subscriber drops.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{StoreError, Subscription};
use crate::types::Message;

const PROTOCOL_VERSION: &str = "1.0.0";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_REF: &str = "1";

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// FRAMES
// =============================================================================

/// Realtime endpoint for a project base URL (`http` becomes `ws`).
pub(super) fn websocket_url(base: &str, anon_key: &str) -> Result<Url, StoreError> {
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(StoreError::Parse(format!("base url must be http(s): {base}")));
    };
    Url::parse_with_params(
        &format!("{ws_base}/realtime/v1/websocket"),
        &[("apikey", anon_key), ("vsn", PROTOCOL_VERSION)],
    )
    .map_err(|e| StoreError::Parse(format!("realtime url: {e}")))
}

pub(super) fn topic(chat_id: Uuid) -> String {
    format!("realtime:messages:chat:{chat_id}")
}

pub(super) fn join_frame(chat_id: Uuid, access_token: &str) -> Value {
    json!({
        "topic": topic(chat_id),
        "event": "phx_join",
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "filter": format!("chat_id=eq.{chat_id}"),
                }],
            },
            "access_token": access_token,
        },
    })
}

pub(super) fn heartbeat_frame(seq: u64) -> Value {
    json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": seq.to_string() })
}

/// What a server frame means for this subscription.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Inbound {
    Joined,
    JoinRejected(String),
    Insert(Message),
    Closed,
    Ignored,
}

pub(super) fn classify(frame: &Value, topic: &str) -> Inbound {
    let event = frame.get("event").and_then(Value::as_str).unwrap_or_default();
    let frame_topic = frame.get("topic").and_then(Value::as_str).unwrap_or_default();
    if frame_topic != topic {
        return Inbound::Ignored;
    }
    match event {
        "phx_reply" if frame.get("ref").and_then(Value::as_str) == Some(JOIN_REF) => {
            let payload = frame.get("payload");
            let status = payload.and_then(|p| p.get("status")).and_then(Value::as_str);
            if status == Some("ok") {
                Inbound::Joined
            } else {
                let reason = payload
                    .and_then(|p| p.get("response"))
                    .map_or_else(|| "join rejected".to_owned(), Value::to_string);
                Inbound::JoinRejected(reason)
            }
        }
        "postgres_changes" => parse_insert(frame).map_or(Inbound::Ignored, Inbound::Insert),
        "phx_close" | "phx_error" => Inbound::Closed,
        _ => Inbound::Ignored,
    }
}

/// Row carried by a `postgres_changes` INSERT frame.
pub(super) fn parse_insert(frame: &Value) -> Option<Message> {
    let data = frame.get("payload")?.get("data")?;
    if data.get("type").and_then(Value::as_str).is_some_and(|t| t != "INSERT") {
        return None;
    }
    serde_json::from_value(data.get("record")?.clone()).ok()
}

// =============================================================================
// SOCKET
// =============================================================================

async fn send_json(stream: &mut WsStream, frame: &Value) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    stream.send(WsMessage::Text(frame.to_string().into())).await
}

async fn await_join(stream: &mut WsStream, topic: &str) -> Result<(), StoreError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(StoreError::Unavailable("realtime socket closed during join".into()));
            };
            match message.map_err(|e| StoreError::Request(e.to_string()))? {
                WsMessage::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(frame) => match classify(&frame, topic) {
                        Inbound::Joined => return Ok(()),
                        Inbound::JoinRejected(reason) => return Err(StoreError::Unavailable(reason)),
                        Inbound::Closed => {
                            return Err(StoreError::Unavailable("realtime channel closed during join".into()));
                        }
                        Inbound::Insert(_) | Inbound::Ignored => {}
                    },
                    Err(e) => debug!(error = %e, "realtime: unparseable frame"),
                },
                WsMessage::Close(_) => {
                    return Err(StoreError::Unavailable("realtime socket closed during join".into()));
                }
                _ => {}
            }
        }
    };
    tokio::time::timeout(JOIN_TIMEOUT, fut)
        .await
        .map_err(|_| StoreError::Request("realtime join timed out".into()))?
}

/// Open a socket, join the chat's channel, and forward inserted rows.
pub(super) async fn subscribe(url: Url, chat_id: Uuid, access_token: String) -> Result<Subscription<Message>, StoreError> {
    let (mut stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| StoreError::Request(e.to_string()))?;
    let topic = topic(chat_id);
    send_json(&mut stream, &join_frame(chat_id, &access_token))
        .await
        .map_err(|e| StoreError::Request(e.to_string()))?;
    await_join(&mut stream, &topic).await?;
    info!(%chat_id, "realtime channel joined");

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(read_loop(stream, topic, tx));
    Ok(Subscription::with_task(rx, task))
}

async fn read_loop(mut stream: WsStream, topic: String, tx: mpsc::UnboundedSender<Message>) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut seq: u64 = 1;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                seq += 1;
                if let Err(e) = send_json(&mut stream, &heartbeat_frame(seq)).await {
                    warn!(error = %e, %topic, "realtime heartbeat failed");
                    break;
                }
            }
            () = tx.closed() => break,
            message = stream.next() => {
                let Some(Ok(message)) = message else {
                    warn!(%topic, "realtime socket ended");
                    break;
                };
                match message {
                    WsMessage::Text(text) => {
                        let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                        match classify(&frame, &topic) {
                            Inbound::Insert(row) => {
                                if tx.send(row).is_err() {
                                    break;
                                }
                            }
                            Inbound::Closed => {
                                warn!(%topic, "realtime channel closed by server");
                                break;
                            }
                            Inbound::Joined | Inbound::JoinRejected(_) | Inbound::Ignored => {}
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
    let _ = stream.close(None).await;
    debug!(%topic, "realtime reader stopped");
}

#[cfg(test)]
#[path = "realtime_test.rs"]
mod tests;
