//! In-process fan-out of session events to WebSocket subscribers.

use std::sync::Arc;

use baton_types::{NotifyError, Notifier, SessionEvent};
use serde::Serialize;
use tokio::sync::broadcast;

/// One published event and the topic it was published on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopicEvent {
    pub topic: String,
    pub event: SessionEvent,
}

/// [`Notifier`] backed by a tokio broadcast channel.
///
/// Every subscriber sees every topic and filters for the ones it wants.
/// Publishing with nobody listening is not an error.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Arc<TopicEvent>>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TopicEvent>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, topic: &str, event: &SessionEvent) -> Result<(), NotifyError> {
        let message = Arc::new(TopicEvent {
            topic: topic.to_string(),
            event: event.clone(),
        });
        if self.tx.send(message).is_err() {
            tracing::trace!(topic, "no event subscribers");
        }
        Ok(())
    }
}
