//! Party-addressed event delivery for the live channel.
//!
//! The dispatch core never assumes a connection exists for a party: events
//! go into a broadcast channel and whoever is subscribed (websocket
//! sessions, push bridges) picks up the ones addressed to them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub party_id: Uuid,
    pub event: String,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationGateway {
    tx: broadcast::Sender<Notification>,
}

impl NotificationGateway {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Fire-and-forget. A send error only means nobody is subscribed right
    /// now, which is a normal condition, not a failure of the caller.
    pub fn notify(&self, party_id: Uuid, event: &str, payload: Value) {
        let notification = Notification {
            party_id,
            event: event.to_string(),
            payload,
            sent_at: Utc::now(),
        };

        if self.tx.send(notification).is_err() {
            debug!(party_id = %party_id, event = event, "no live subscribers for notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::NotificationGateway;

    #[tokio::test]
    async fn subscriber_receives_addressed_event() {
        let gateway = NotificationGateway::new(16);
        let mut rx = gateway.subscribe();
        let party = Uuid::new_v4();

        gateway.notify(party, "ride_offer", json!({ "ride_id": "abc" }));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.party_id, party);
        assert_eq!(received.event, "ride_offer");
        assert_eq!(received.payload["ride_id"], "abc");
    }

    #[test]
    fn notify_without_subscribers_does_not_panic() {
        let gateway = NotificationGateway::new(16);
        gateway.notify(Uuid::new_v4(), "ride_taken", json!({}));
    }
}
