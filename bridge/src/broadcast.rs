use crate::metrics::{BROADCASTS_TOTAL, SEND_DROPPED_TOTAL, SEND_FAILURES_TOTAL};
use crate::registry::{Payload, SubscriberId, SubscriberRegistry};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Per-call delivery summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers in the snapshot.
    pub attempted: usize,
    /// Payloads queued for delivery.
    pub delivered: usize,
    /// Subscribers skipped because their queue was full.
    pub dropped: usize,
    /// Subscribers removed after a failed send.
    pub removed: usize,
}

/// Pushes payloads to every registered subscriber.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Sends `payload` to a snapshot of the registry. A closed subscriber is
    /// collected and removed after the loop; it never stops delivery to others.
    pub fn broadcast(&self, payload: Payload) -> BroadcastReport {
        let snapshot = self.registry.snapshot();
        let mut report = BroadcastReport {
            attempted: snapshot.len(),
            ..Default::default()
        };
        let mut dead: Vec<SubscriberId> = Vec::new();

        for subscriber in &snapshot {
            match subscriber.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, skipping record", subscriber.id());
                    SEND_DROPPED_TOTAL.inc();
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} is gone, scheduling removal", subscriber.id());
                    dead.push(subscriber.id());
                }
            }
        }

        report.removed = self.registry.remove_all(&dead);
        SEND_FAILURES_TOTAL.inc_by(dead.len() as f64);
        BROADCASTS_TOTAL.inc();

        report
    }
}
