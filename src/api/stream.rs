// =============================================================================
// Client Stream Endpoint — `/stream`
// =============================================================================
//
// A single long-lived bidirectional WebSocket per client (spec.md §6). The
// client sends `{action: "subscribe"|"unsubscribe", topic}` to manage its
// subscription set and `{action: "ping", ts}` for keepalive; the server
// pushes `{type, data, ts}` messages for every topic the client is
// subscribed to, `type` being one of `quote`, `account`, `position`,
// `order`, `fill`, `violation`, `strategyMode`, `alertStatus`, or `error`.
//
// Grounded on the teacher's `api/ws.rs` connection handler: a
// `tokio::select!` loop racing an outbound push source against inbound
// client messages, Ping/Pong passthrough, and cleanup on disconnect. The
// teacher's push source was a 500 ms snapshot-diff timer; here it's
// `ClientHandle::recv()`, which resolves as soon as `BroadcastHub::publish`
// enqueues a message the client is subscribed to.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::broadcast::OutboundMessage;
use crate::types::Topic;

/// Inbound client message on `/stream`.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    Ping { ts: i64 },
}

pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let client = state.broadcast.register();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // ── Outbound: drain the client's subscription queue ─────────
            msg = client.recv() => {
                match msg {
                    Some(outbound) => {
                        if let Err(e) = send_outbound(&mut sender, &outbound).await {
                            debug!(error = %e, "stream send failed — disconnecting");
                            break;
                        }
                    }
                    None => {
                        info!(client_id = %client.id, "client flagged slow consumer — disconnecting");
                        break;
                    }
                }
            }

            // ── Inbound: subscribe/unsubscribe/ping ─────────────────────
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(&client, &text, &mut sender).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!(client_id = %client.id, "client sent Close frame");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(client_id = %client.id, "binary frame ignored");
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client.id, error = %e, "stream receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.broadcast.unregister(client.id);
}

async fn handle_client_text<S>(
    client: &Arc<crate::broadcast::ClientHandle>,
    text: &str,
    sender: &mut S,
) where
    S: futures_util::Sink<Message> + Unpin,
{
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(ClientMessage::Subscribe { topic }) => {
            debug!(client_id = %client.id, ?topic, "client subscribed");
            client.subscribe(topic);
        }
        Ok(ClientMessage::Unsubscribe { topic }) => {
            debug!(client_id = %client.id, ?topic, "client unsubscribed");
            client.unsubscribe(&topic);
        }
        Ok(ClientMessage::Ping { ts }) => {
            let pong = serde_json::json!({ "type": "pong", "ts": ts });
            let _ = sender.send(Message::Text(pong.to_string().into())).await;
        }
        Err(e) => {
            warn!(client_id = %client.id, error = %e, "malformed client message");
            let err = serde_json::json!({
                "type": "error",
                "data": { "message": "malformed message" },
                "ts": chrono::Utc::now().timestamp_millis(),
            });
            let _ = sender.send(Message::Text(err.to_string().into())).await;
        }
    }
}

async fn send_outbound<S>(sender: &mut S, msg: &OutboundMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let envelope = serde_json::json!({
        "type": msg.kind,
        "data": msg.payload,
        "ts": chrono::Utc::now().timestamp_millis(),
    });
    sender.send(Message::Text(envelope.to_string().into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_parses_tagged_topic() {
        let json = r#"{"action":"subscribe","topic":{"kind":"quote","selector":"ES"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        matches!(msg, ClientMessage::Subscribe { topic: Topic::Quote { .. } });
    }

    #[test]
    fn ping_message_parses() {
        let json = r#"{"action":"ping","ts":1700000000000}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Ping { ts } => assert_eq!(ts, 1700000000000),
            _ => panic!("expected Ping"),
        }
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let json = r#"{"action":"bogus"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
