//! In-process domain event stream backed by a `tokio::sync::broadcast` channel.
//!
//! Notification and indexing collaborators subscribe here; the core only
//! publishes and never waits on them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Something that happened to a posting or one of its bids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostingEvent {
    PostingCreated {
        posting_id: Uuid,
        author_id: Uuid,
        at: DateTime<Utc>,
    },
    BidSubmitted {
        posting_id: Uuid,
        bid_id: Uuid,
        partner_id: Uuid,
        charge: Decimal,
        at: DateTime<Utc>,
    },
    BidWithdrawn {
        posting_id: Uuid,
        bid_id: Uuid,
        partner_id: Uuid,
        at: DateTime<Utc>,
    },
    BidAccepted {
        posting_id: Uuid,
        bid_id: Uuid,
        partner_id: Uuid,
        at: DateTime<Utc>,
    },
    PostingCancelled {
        posting_id: Uuid,
        at: DateTime<Utc>,
    },
    PostingCompleted {
        posting_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl PostingEvent {
    /// Dot-separated name, e.g. `"posting.created"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PostingCreated { .. } => "posting.created",
            Self::BidSubmitted { .. } => "bid.submitted",
            Self::BidWithdrawn { .. } => "bid.withdrawn",
            Self::BidAccepted { .. } => "bid.accepted",
            Self::PostingCancelled { .. } => "posting.cancelled",
            Self::PostingCompleted { .. } => "posting.completed",
        }
    }

    pub fn posting_id(&self) -> Uuid {
        match self {
            Self::PostingCreated { posting_id, .. }
            | Self::BidSubmitted { posting_id, .. }
            | Self::BidWithdrawn { posting_id, .. }
            | Self::BidAccepted { posting_id, .. }
            | Self::PostingCancelled { posting_id, .. }
            | Self::PostingCompleted { posting_id, .. } => *posting_id,
        }
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out event bus. Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PostingEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest unconsumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PostingEvent) {
        // A send error only means nobody is subscribed.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PostingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let posting_id = Uuid::new_v4();

        bus.publish(PostingEvent::PostingCancelled { posting_id, at: Utc::now() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "posting.cancelled");
        assert_eq!(event.posting_id(), posting_id);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(PostingEvent::PostingCompleted { posting_id: Uuid::new_v4(), at: Utc::now() });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = PostingEvent::PostingCreated {
            posting_id: Uuid::nil(),
            author_id: Uuid::nil(),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "posting_created");
    }
}
