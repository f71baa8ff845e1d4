//! Room-addressed event bus for ticket state changes.
//!
//! "Room" here is the design session: subscribers (the `forgewright events`
//! CLI stream, a future web UI) watch one session at a time. The default
//! backend is `tokio::sync::broadcast`, already pulled in by the `tokio`
//! "full" feature the rest of the crate enables -- no new dependency.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use forgewright_db::models::{TicketEvent, TicketState};

/// A single published occurrence, wire-shaped for a `forgewright events`
/// subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct TicketEventMessage {
    pub ticket_id: Uuid,
    pub kind: String,
    pub from_state: Option<TicketState>,
    pub to_state: Option<TicketState>,
    pub payload: serde_json::Value,
}

impl From<&TicketEvent> for TicketEventMessage {
    fn from(event: &TicketEvent) -> Self {
        Self {
            ticket_id: event.ticket_id,
            kind: event.kind.clone(),
            from_state: event.from_state,
            to_state: event.to_state,
            payload: event.payload.clone(),
        }
    }
}

/// Trait for publishing and subscribing to ticket events scoped to a design
/// session. Implementations only need to fan out in-process; durability
/// comes from the `ticket_events` table, which every subscriber can replay
/// from on reconnect.
pub trait EventBus: Send + Sync {
    /// Publish an event to a session's room. Never fails: a dropped message
    /// (no subscribers, full buffer) is not an error, since the durable log
    /// is `ticket_events`, not the bus.
    fn publish(&self, design_session_id: Uuid, message: TicketEventMessage);

    /// Subscribe to a session's room. Returns a receiver that only sees
    /// messages published after this call -- callers wanting history should
    /// read `ticket_events` first via `forgewright_db::queries::ticket_events`.
    fn subscribe(&self, design_session_id: Uuid) -> broadcast::Receiver<TicketEventMessage>;
}

/// Default [`EventBus`] backed by one `tokio::sync::broadcast` channel per
/// design session, created lazily on first publish or subscribe.
pub struct TokioBroadcastBus {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<TicketEventMessage>>>,
    capacity: usize,
}

impl TokioBroadcastBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender_for(&self, design_session_id: Uuid) -> broadcast::Sender<TicketEventMessage> {
        let mut channels = self.channels.lock().expect("event bus mutex poisoned");
        channels
            .entry(design_session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for TokioBroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for TokioBroadcastBus {
    fn publish(&self, design_session_id: Uuid, message: TicketEventMessage) {
        let sender = self.sender_for(design_session_id);
        // Err means no receivers are currently subscribed; not an error for us.
        let _ = sender.send(message);
    }

    fn subscribe(&self, design_session_id: Uuid) -> broadcast::Receiver<TicketEventMessage> {
        self.sender_for(design_session_id).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = TokioBroadcastBus::default();
        let session_id = Uuid::new_v4();
        let mut rx = bus.subscribe(session_id);

        bus.publish(
            session_id,
            TicketEventMessage {
                ticket_id: Uuid::new_v4(),
                kind: "activated".to_string(),
                from_state: Some(TicketState::Draft),
                to_state: Some(TicketState::Ready),
                payload: serde_json::json!({}),
            },
        );

        let received = rx.recv().await.expect("should receive published message");
        assert_eq!(received.kind, "activated");
    }

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let bus = TokioBroadcastBus::default();
        bus.publish(
            Uuid::new_v4(),
            TicketEventMessage {
                ticket_id: Uuid::new_v4(),
                kind: "activated".to_string(),
                from_state: None,
                to_state: None,
                payload: serde_json::json!({}),
            },
        );
    }

    #[tokio::test]
    async fn separate_sessions_do_not_cross_talk() {
        let bus = TokioBroadcastBus::default();
        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        let mut rx_b = bus.subscribe(session_b);

        bus.publish(
            session_a,
            TicketEventMessage {
                ticket_id: Uuid::new_v4(),
                kind: "activated".to_string(),
                from_state: None,
                to_state: None,
                payload: serde_json::json!({}),
            },
        );

        assert!(rx_b.try_recv().is_err());
    }
}
