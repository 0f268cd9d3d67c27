//! Progress notifications for observers of a migration.
//!
//! The orchestrator reports every persisted transition through a
//! [`StatusNotifier`]. Transports (a push endpoint, the CLI) subscribe to a
//! [`BroadcastNotifier`] and forward the events they care about.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::StatusSnapshot;

/// Capacity of the broadcast channel; slow receivers see a lag error.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Receives status changes from the orchestrator.
pub trait StatusNotifier: Send + Sync {
    /// A new status was stored.
    fn status_changed(&self, status: &StatusSnapshot);

    /// No further events will follow for this migration.
    fn stream_complete(&self, id: Uuid);
}

/// Event published on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    Status(StatusSnapshot),
    Complete { id: Uuid },
}

impl StatusEvent {
    pub fn migration_id(&self) -> Uuid {
        match self {
            StatusEvent::Status(status) => status.id,
            StatusEvent::Complete { id } => *id,
        }
    }
}

/// Publishes events to any number of subscribers.
///
/// Sending never blocks; with no subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: StatusEvent) {
        if self.sender.send(event).is_err() {
            debug!("No status subscribers");
        }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl StatusNotifier for BroadcastNotifier {
    fn status_changed(&self, status: &StatusSnapshot) {
        self.publish(StatusEvent::Status(status.clone()));
    }

    fn stream_complete(&self, id: Uuid) {
        self.publish(StatusEvent::Complete { id });
    }
}

/// Logs every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl StatusNotifier for TracingNotifier {
    fn status_changed(&self, status: &StatusSnapshot) {
        match &status.message {
            Some(message) => info!(
                "Migration {} ({}): {} - {}",
                status.name, status.id, status.step, message
            ),
            None => info!("Migration {} ({}): {}", status.name, status.id, status.step),
        }
    }

    fn stream_complete(&self, id: Uuid) {
        debug!("Migration {}: no further updates", id);
    }
}

/// Forwards to several notifiers in order.
#[derive(Default, Clone)]
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn StatusNotifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }
}

impl StatusNotifier for FanoutNotifier {
    fn status_changed(&self, status: &StatusSnapshot) {
        for notifier in &self.notifiers {
            notifier.status_changed(status);
        }
    }

    fn stream_complete(&self, id: Uuid) {
        for notifier in &self.notifiers {
            notifier.stream_complete(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{EtlStep, MigrationStatus};

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let notifier = BroadcastNotifier::default();
        let mut rx = notifier.subscribe();
        let status = MigrationStatus::new("m1").snapshot();

        notifier.status_changed(&status);
        notifier.stream_complete(status.id);

        match rx.recv().await.unwrap() {
            StatusEvent::Status(s) => assert_eq!(s.step, EtlStep::Created),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            StatusEvent::Complete { id: status.id }
        );
    }

    #[test]
    fn test_send_without_subscribers() {
        let notifier = BroadcastNotifier::new(4);
        notifier.stream_complete(Uuid::new_v4());
    }

    #[test]
    fn test_event_json() {
        let id = Uuid::nil();
        let json = serde_json::to_value(StatusEvent::Complete { id }).unwrap();
        assert_eq!(json["event"], "complete");
        assert_eq!(json["id"], id.to_string());
    }

    #[tokio::test]
    async fn test_fanout() {
        let a = BroadcastNotifier::default();
        let b = BroadcastNotifier::default();
        let (mut rx_a, mut rx_b) = (a.subscribe(), b.subscribe());
        let fanout = FanoutNotifier::new()
            .with(Arc::new(a))
            .with(Arc::new(b))
            .with(Arc::new(TracingNotifier));

        let id = Uuid::new_v4();
        fanout.stream_complete(id);

        assert_eq!(rx_a.recv().await.unwrap().migration_id(), id);
        assert_eq!(rx_b.recv().await.unwrap().migration_id(), id);
    }
}
