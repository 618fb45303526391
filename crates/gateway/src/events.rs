//! Process-wide runtime event broadcaster.
//!
//! Every turn event and lifecycle notice is pushed to all subscribers;
//! `/control/v1/events` replays the feed to connected SSE streams.

use serde_json::Value;
use tokio::sync::broadcast;

use drost_domain::stream::TurnEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<Value>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a turn event. Lossy when no subscriber is connected.
    pub fn publish_turn(&self, session_id: &str, event: &TurnEvent) {
        let Ok(mut value) = serde_json::to_value(event) else {
            return;
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert("sessionId".into(), Value::String(session_id.to_owned()));
        }
        let _ = self.tx.send(value);
    }

    /// Publish an arbitrary runtime notice (lifecycle, lane, restart).
    pub fn publish(&self, value: Value) {
        let _ = self.tx.send(value);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_turn_events() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.publish_turn(
            "s1",
            &TurnEvent::ResponseDelta {
                text: "chunk".into(),
            },
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received["type"], "response.delta");
        assert_eq!(received["sessionId"], "s1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_lossy_not_fatal() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.publish(serde_json::json!({"type": "gateway.started"}));
    }
}
