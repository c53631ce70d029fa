//! The set of live subscribers.
//!
//! Mutated from two sides: connection handlers add and remove their own
//! subscriber, and the broadcaster removes subscribers whose queue is closed.
//! Every operation takes the lock once, so each is atomic on its own.

use crate::metrics::SUBSCRIBERS;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A pushed payload. Serialized once per record and shared by all subscribers.
pub type Payload = Arc<str>;

pub type SubscriberId = Uuid;

/// Send-capable handle to one connected listener.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Payload>,
}

impl Subscriber {
    /// Creates a subscriber and the receiving end its connection drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(buffer);
        let subscriber = Self {
            id: Uuid::new_v4(),
            tx,
        };
        (subscriber, rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn try_send(
        &self,
        payload: Payload,
    ) -> Result<(), mpsc::error::TrySendError<Payload>> {
        self.tx.try_send(payload)
    }
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    members: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a subscriber. Re-adding the same id replaces the handle, so a
    /// subscriber is never present twice.
    pub fn add(&self, subscriber: Subscriber) -> usize {
        let mut members = self.members.write();
        members.insert(subscriber.id, subscriber);
        SUBSCRIBERS.set(members.len() as f64);
        members.len()
    }

    /// Removes a subscriber. Returns whether it was present; removing an
    /// absent id is a no-op.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut members = self.members.write();
        let removed = members.remove(&id).is_some();
        SUBSCRIBERS.set(members.len() as f64);
        removed
    }

    /// Removes several subscribers under one lock. Returns how many were present.
    pub fn remove_all(&self, ids: &[SubscriberId]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let mut members = self.members.write();
        let removed = ids.iter().filter(|id| members.remove(*id).is_some()).count();
        SUBSCRIBERS.set(members.len() as f64);
        removed
    }

    /// Point-in-time copy of the current members.
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.members.read().values().cloned().collect()
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.members.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}
