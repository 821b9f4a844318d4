//! Broadcast hub
//!
//! Fans typed messages out to every live subscriber. A message is
//! serialized once so all subscribers receive identical bytes. Delivery
//! never blocks: a subscriber that cannot take a message right now is
//! removed.

pub mod message;

pub use message::{
    AudioLevel, Connected, HubMessage, Notification, NotificationLevel, StateChange,
};

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::observability::metrics;

/// Identifier handed out on subscription.
pub type SubscriberId = Uuid;

/// Why a delivery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber has gone away.
    #[error("subscriber closed")]
    Closed,
    /// The subscriber's queue is full.
    #[error("subscriber queue full")]
    Full,
}

/// A live push target.
pub trait Subscriber: Send + Sync {
    /// Accepts one serialized message without blocking.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the message cannot be taken; the hub
    /// then unsubscribes this target.
    fn deliver(&self, payload: &Bytes) -> Result<(), DeliveryError>;
}

/// Subscriber backed by a bounded Tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSubscriber {
    /// Creates a subscriber and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, payload: &Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(payload.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Set of live subscribers.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: DashMap<SubscriberId, Arc<dyn Subscriber>>,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl BroadcastHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = Uuid::new_v4();
        self.subscribers.insert(id, subscriber);
        metrics::set_hub_subscribers(self.subscribers.len());
        tracing::debug!(%id, total = self.subscribers.len(), "subscriber added");
        id
    }

    /// Delivers `greeting` to `subscriber` and only then registers it, so the
    /// greeting is always the first message it sees.
    ///
    /// Returns `None` without registering if the greeting cannot be delivered.
    pub fn subscribe_with(
        &self,
        subscriber: Arc<dyn Subscriber>,
        greeting: &HubMessage,
    ) -> Option<SubscriberId> {
        let payload = encode(greeting)?;
        if let Err(error) = subscriber.deliver(&payload) {
            tracing::debug!(%error, "greeting not delivered, subscriber not added");
            return None;
        }
        Some(self.subscribe(subscriber))
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            metrics::set_hub_subscribers(self.subscribers.len());
            tracing::debug!(%id, total = self.subscribers.len(), "subscriber removed");
        }
        removed
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns `true` when nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Delivers `message` to every subscriber and returns how many took it.
    ///
    /// Subscribers whose delivery fails are removed after the pass.
    pub fn broadcast(&self, message: &HubMessage) -> usize {
        match encode(message) {
            Some(payload) => self.broadcast_payload(&payload),
            None => 0,
        }
    }

    /// Delivers pre-serialized bytes to every subscriber.
    pub fn broadcast_payload(&self, payload: &Bytes) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;

        // Collect first: removing while iterating a DashMap shard deadlocks.
        for entry in &self.subscribers {
            match entry.value().deliver(payload) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((*entry.key(), e)),
            }
        }

        if !failed.is_empty() {
            for (id, error) in &failed {
                self.subscribers.remove(id);
                tracing::debug!(%id, %error, "dropping subscriber after failed delivery");
            }
            metrics::record_hub_dropped(failed.len());
            metrics::set_hub_subscribers(self.subscribers.len());
        }

        delivered
    }
}

fn encode(message: &HubMessage) -> Option<Bytes> {
    match serde_json::to_vec(message) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            tracing::warn!(kind = message.kind(), error = %e, "failed to serialize hub message");
            None
        }
    }
}
