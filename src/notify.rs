//! Event fan-out. The poll orchestrator pushes lifecycle events into a
//! [`NotificationSink`]; the hub implementation feeds every connected
//! observer through a broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::AlertEvent;

/// Default broadcast buffer. Slow observers that fall more than this many
/// events behind see a Lagged error on their receiver and skip ahead.
pub const DEFAULT_HUB_CAPACITY: usize = 256;

/// Where lifecycle events go. Fire-and-forget: implementations must never
/// let one observer's failure or backpressure affect another, and must
/// never propagate delivery errors back to the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: AlertEvent);
}

/// Broadcast-backed hub. Observers subscribe for a receiver; the web edge
/// drains one receiver per WebSocket connection.
pub struct BroadcastHub {
    tx: broadcast::Sender<AlertEvent>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

#[async_trait]
impl NotificationSink for BroadcastHub {
    async fn notify(&self, event: AlertEvent) {
        metrics::counter!("notify.events_total").increment(1);
        // Send only fails when nobody is subscribed; events before the
        // first observer connects are simply dropped.
        match self.tx.send(event) {
            Ok(receivers) => debug!("event delivered to {} observers", receivers),
            Err(_) => {
                metrics::counter!("notify.dropped_total").increment(1);
                debug!("no observers connected, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::FlightKey;

    fn test_event(key: &str) -> AlertEvent {
        AlertEvent::AckOk {
            key: FlightKey::from(key),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = BroadcastHub::default();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        hub.notify(test_event("abc123")).await;

        assert_eq!(rx1.recv().await.unwrap(), test_event("abc123"));
        assert_eq!(rx2.recv().await.unwrap(), test_event("abc123"));
    }

    #[tokio::test]
    async fn test_notify_without_observers_is_silent() {
        let hub = BroadcastHub::default();
        hub.notify(test_event("abc123")).await;
        assert_eq!(hub.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_observer_does_not_affect_others() {
        let hub = BroadcastHub::default();
        let rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        drop(rx1);
        hub.notify(test_event("abc123")).await;
        assert_eq!(rx2.recv().await.unwrap(), test_event("abc123"));
    }
}
