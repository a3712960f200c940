// =============================================================================
// Topic-based broadcast hub (C8)
// =============================================================================
//
// Each connected client gets a bounded (1024) outbound queue. On overflow, a
// `quote` message drops the oldest queued quote to make room — quotes are
// high-frequency and stale ones are worthless — while any other message kind
// overflowing a full queue marks the client a slow consumer for
// disconnection, since dropping an order/fill/violation update silently
// would be a correctness bug, not a convenience.
//
// A plain `tokio::sync::broadcast` channel can't express this — it drops
// from the *front* indiscriminately by kind when a lagging receiver falls
// behind, with no way to special-case quotes. This hub is a small
// custom per-client queue instead, grounded on the teacher's `api/ws.rs`
// push-loop shape (`tokio::select!` over a notify and an inbound-message
// stream, Ping/Pong handling, cleanup on disconnect) adapted from "always
// push a full snapshot" to topic-filtered delivery.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::Topic;

/// Maximum number of queued outbound messages per client before the
/// overflow policy kicks in (spec.md §4.8).
pub const CLIENT_QUEUE_CAPACITY: usize = 1024;

/// A single message destined for broadcast clients subscribed to its topic.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub kind: String,
    pub selector: String,
    pub payload: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(kind: &str, selector: &str, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            selector: selector.to_string(),
            payload,
        }
    }

    fn is_quote(&self) -> bool {
        self.kind == "quote"
    }
}

/// Per-client subscription set and bounded outbound queue.
pub struct ClientHandle {
    pub id: Uuid,
    topics: RwLock<HashSet<Topic>>,
    queue: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
    slow_consumer: AtomicBool,
}

impl ClientHandle {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            topics: RwLock::new(HashSet::new()),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            slow_consumer: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, topic: Topic) {
        self.topics.write().insert(topic);
    }

    pub fn unsubscribe(&self, topic: &Topic) {
        self.topics.write().remove(topic);
    }

    pub fn is_subscribed(&self, kind: &str, selector: &str) -> bool {
        self.topics
            .read()
            .iter()
            .any(|t| t.matches_kind_selector(kind, selector))
    }

    pub fn is_slow_consumer(&self) -> bool {
        self.slow_consumer.load(Ordering::Relaxed)
    }

    /// Enqueue a message, applying the overflow policy when the queue is at
    /// capacity. Returns `false` if the client was just flagged a slow
    /// consumer (caller should disconnect it).
    fn push(&self, msg: OutboundMessage) -> bool {
        let mut queue = self.queue.lock();
        if queue.len() < CLIENT_QUEUE_CAPACITY {
            queue.push_back(msg);
            drop(queue);
            self.notify.notify_one();
            return true;
        }

        if msg.is_quote() {
            if let Some(pos) = queue.iter().position(|m| m.is_quote()) {
                queue.remove(pos);
            } else {
                queue.pop_front();
            }
            queue.push_back(msg);
            drop(queue);
            self.notify.notify_one();
            true
        } else {
            self.slow_consumer.store(true, Ordering::Relaxed);
            warn!(client_id = %self.id, "client queue full on non-quote message — flagged slow consumer");
            false
        }
    }

    /// Wait for and pop the next queued message, or `None` once
    /// `disconnect()` drains the queue and no more arrive.
    pub async fn recv(&self) -> Option<OutboundMessage> {
        loop {
            if let Some(msg) = self.queue.lock().pop_front() {
                return Some(msg);
            }
            if self.is_slow_consumer() {
                return None;
            }
            self.notify.notified().await;
        }
    }
}

/// Owns every connected client's handle and fans published messages out to
/// subscribers.
pub struct BroadcastHub {
    clients: RwLock<HashMap<Uuid, Arc<ClientHandle>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self) -> Arc<ClientHandle> {
        let handle = Arc::new(ClientHandle::new(Uuid::new_v4()));
        self.clients.write().insert(handle.id, handle.clone());
        info!(client_id = %handle.id, "broadcast client connected");
        handle
    }

    pub fn unregister(&self, id: Uuid) {
        self.clients.write().remove(&id);
        info!(client_id = %id, "broadcast client disconnected");
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Publish a message to every subscribed client, dropping any client the
    /// push flags as a slow consumer.
    pub fn publish(&self, kind: &str, selector: &str, payload: serde_json::Value) {
        let msg = OutboundMessage::new(kind, selector, payload);
        let clients = self.clients.read();
        for client in clients.values() {
            if client.is_subscribed(kind, selector) {
                client.push(msg.clone());
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_subscribed_client_only() {
        let hub = BroadcastHub::new();
        let client = hub.register();
        client.subscribe(Topic::Quote { selector: "ES".to_string() });

        hub.publish("quote", "ES", serde_json::json!({"price": 5000}));
        hub.publish("quote", "NQ", serde_json::json!({"price": 18000}));

        assert_eq!(client.queue.lock().len(), 1);
    }

    #[test]
    fn wildcard_subscription_matches_any_selector() {
        let hub = BroadcastHub::new();
        let client = hub.register();
        client.subscribe(Topic::Order { selector: Topic::WILDCARD.to_string() });

        hub.publish("order", "ord-1", serde_json::json!({}));
        hub.publish("order", "ord-2", serde_json::json!({}));

        assert_eq!(client.queue.lock().len(), 2);
    }

    #[test]
    fn overflow_drops_oldest_quote_not_latest() {
        let client = ClientHandle::new(Uuid::new_v4());
        for i in 0..CLIENT_QUEUE_CAPACITY {
            client.push(OutboundMessage::new("quote", "ES", serde_json::json!({"seq": i})));
        }
        // Queue is full of quotes; one more quote should drop the oldest.
        client.push(OutboundMessage::new("quote", "ES", serde_json::json!({"seq": "newest"})));

        let queue = client.queue.lock();
        assert_eq!(queue.len(), CLIENT_QUEUE_CAPACITY);
        assert_eq!(queue.front().unwrap().payload["seq"], serde_json::json!(1));
        assert_eq!(queue.back().unwrap().payload["seq"], serde_json::json!("newest"));
    }

    #[test]
    fn overflow_on_non_quote_flags_slow_consumer() {
        let client = ClientHandle::new(Uuid::new_v4());
        for i in 0..CLIENT_QUEUE_CAPACITY {
            client.push(OutboundMessage::new("order", "ord-1", serde_json::json!({"seq": i})));
        }
        assert!(!client.is_slow_consumer());

        let accepted = client.push(OutboundMessage::new("order", "ord-1", serde_json::json!({"seq": "overflow"})));
        assert!(!accepted);
        assert!(client.is_slow_consumer());
    }

    #[tokio::test]
    async fn recv_returns_none_after_slow_consumer_drains() {
        let client = ClientHandle::new(Uuid::new_v4());
        client.push(OutboundMessage::new("order", "ord-1", serde_json::json!({})));
        client.slow_consumer.store(true, Ordering::Relaxed);

        let first = client.recv().await;
        assert!(first.is_some());
        let second = client.recv().await;
        assert!(second.is_none());
    }
}
