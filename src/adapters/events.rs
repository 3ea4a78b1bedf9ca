//! Broadcast event publisher backing the live status stream.

use tokio::sync::broadcast;

use crate::models::webhook::TransactionEvent;
use crate::ports::EventPublisher;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<TransactionEvent>,
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: TransactionEvent) {
        let transaction_id = event.transaction_id.clone();
        // No subscribers is the common case and not a failure.
        if self.sender.send(event).is_err() {
            tracing::debug!("No live subscribers for transaction {}", transaction_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::SubStatus;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let publisher = BroadcastPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish(TransactionEvent::new("t1", SubStatus::OrderPlaced, "done"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.transaction_id, "t1");
        assert_eq!(event.sub_status, SubStatus::OrderPlaced);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = BroadcastPublisher::new();
        publisher.publish(TransactionEvent::new("t1", SubStatus::OrderPlaced, "done"));
    }
}
