//! In-process event bus.
//!
//! Each subscription key has at most one registered subscriber. Publishing is
//! a rendezvous: `publish` returns only after the subscriber has taken the
//! event off its channel. There is no buffering for absent subscribers; an
//! event published to an unregistered key is rejected with `NotFound`.
//!
//! Subscribing on a key that already has a subscriber replaces it. The old
//! subscriber's channel closes and its `recv` returns `None`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use minipod_api::{SubscriptionKey, WatchEvent};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Errors returned by the event bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("subscription key is empty")]
    EmptyKey,

    #[error("no subscriber for key {0}")]
    NotFound(SubscriptionKey),

    #[error("subscriber for key {0} went away before taking the event")]
    SubscriberGone(SubscriptionKey),

    #[error("timed out handing event to subscriber for key {0}")]
    Timeout(SubscriptionKey),

    #[error("event bus is shut down")]
    Closed,
}

/// An event on its way to a subscriber, with the publisher's acknowledgement.
struct Delivery {
    event: WatchEvent,
    taken: oneshot::Sender<()>,
}

struct Entry {
    generation: u64,
    tx: mpsc::Sender<Delivery>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<SubscriptionKey, Entry>,
    closed: bool,
}

struct Inner {
    registry: Mutex<Registry>,
    next_generation: AtomicU64,
    publish_timeout: Option<Duration>,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only if it is still registered to `generation`.
    fn remove_if_current(&self, key: &SubscriptionKey, generation: u64) -> bool {
        let mut registry = self.registry();
        match registry.entries.get(key) {
            Some(entry) if entry.generation == generation => {
                registry.entries.remove(key);
                true
            }
            _ => false,
        }
    }
}

/// Registry of watch subscriptions keyed by `resource/node`.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus whose publishes wait for the subscriber indefinitely.
    pub fn new() -> Self {
        Self::with_publish_timeout(None)
    }

    /// Create a bus that gives up on a handoff after `timeout`.
    pub fn with_publish_timeout(timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                next_generation: AtomicU64::new(1),
                publish_timeout: timeout,
            }),
        }
    }

    /// Register a subscriber for `key`, replacing any existing one.
    pub fn subscribe(&self, key: SubscriptionKey) -> Result<Subscription, BusError> {
        if !key.is_valid() {
            return Err(BusError::EmptyKey);
        }

        let (tx, rx) = mpsc::channel(1);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let replaced = {
            let mut registry = self.inner.registry();
            if registry.closed {
                return Err(BusError::Closed);
            }
            registry
                .entries
                .insert(key.clone(), Entry { generation, tx })
                .is_some()
        };

        if replaced {
            info!(key = %key, "Subscription replaced by a newer subscriber");
        } else {
            debug!(key = %key, "Subscription registered");
        }

        Ok(Subscription {
            key,
            generation,
            rx,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Hand `event` to the subscriber of its key.
    ///
    /// Returns once the subscriber has received the event. Fails immediately
    /// with `NotFound` if nobody is subscribed.
    pub async fn publish(&self, event: WatchEvent) -> Result<(), BusError> {
        let key = event.key();
        if !key.is_valid() {
            return Err(BusError::EmptyKey);
        }

        let tx = {
            let registry = self.inner.registry();
            if registry.closed {
                return Err(BusError::Closed);
            }
            match registry.entries.get(&key) {
                Some(entry) => entry.tx.clone(),
                None => return Err(BusError::NotFound(key)),
            }
        };

        let (taken_tx, mut taken_rx) = oneshot::channel();
        let delivery = Delivery {
            event,
            taken: taken_tx,
        };
        let handoff = Self::handoff(tx, delivery, &mut taken_rx, key.clone());
        let finished = match self.inner.publish_timeout {
            Some(limit) => tokio::time::timeout(limit, handoff).await.ok(),
            None => Some(handoff.await),
        };

        match finished {
            Some(result) => result,
            None => {
                // A closed ack channel makes a still-queued delivery undeliverable.
                taken_rx.close();
                match taken_rx.try_recv() {
                    Ok(()) => Ok(()),
                    Err(_) => Err(BusError::Timeout(key)),
                }
            }
        }
    }

    async fn handoff(
        tx: mpsc::Sender<Delivery>,
        delivery: Delivery,
        taken_rx: &mut oneshot::Receiver<()>,
        key: SubscriptionKey,
    ) -> Result<(), BusError> {
        tx.send(delivery)
            .await
            .map_err(|_| BusError::SubscriberGone(key.clone()))?;
        drop(tx);

        taken_rx.await.map_err(|_| BusError::SubscriberGone(key))
    }

    /// Close every subscription and reject further subscribes and publishes.
    pub fn shutdown(&self) {
        let drained = {
            let mut registry = self.inner.registry();
            registry.closed = true;
            std::mem::take(&mut registry.entries)
        };
        info!(subscriptions = drained.len(), "Event bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry().closed
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.inner.registry().entries.contains_key(key)
    }

    /// Number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.inner.registry().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The receiving side of a subscription.
///
/// Dropping it deregisters the key, unless a newer subscriber has taken the
/// key over in the meantime.
pub struct Subscription {
    key: SubscriptionKey,
    generation: u64,
    rx: mpsc::Receiver<Delivery>,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Wait for the next event. `None` once the subscription has been closed
    /// by shutdown or replaced by a newer subscriber.
    ///
    /// Deliveries whose publisher already gave up are skipped.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            let Delivery { event, taken } = self.rx.recv().await?;
            if taken.send(()).is_ok() {
                return Some(event);
            }
            debug!(key = %self.key, pod_uid = %event.pod.uid, "Skipping abandoned delivery");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            if inner.remove_if_current(&self.key, self.generation) {
                debug!(key = %self.key, "Subscription dropped");
            }
        }
    }
}
