use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::store::models::Round;

/// Domain events emitted by the core.
///
/// Delivery (sockets, email, anything else) is a subscriber concern; the core
/// only publishes and never waits on consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    MatchConfirmed {
        match_id: String,
        home_score: i32,
        away_score: i32,
    },
    MatchDisputed {
        match_id: String,
    },
    RoundAdvanced {
        tournament_id: i32,
        round: Round,
        operation_id: Uuid,
        match_ids: Vec<String>,
    },
    RoundReverted {
        tournament_id: i32,
        round: Round,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget: a bus with no live subscribers drops the event.
    pub fn publish(&self, event: DomainEvent) {
        trace!("Publishing domain event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(DomainEvent::MatchDisputed {
            match_id: "1.1.1".to_string(),
        });
        match rx.recv().await.unwrap() {
            DomainEvent::MatchDisputed { match_id } => assert_eq!(match_id, "1.1.1"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::MatchDisputed {
            match_id: "1.1.1".to_string(),
        });
    }
}
