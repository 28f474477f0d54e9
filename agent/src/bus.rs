//! Event Bus: fan-out of [`PollEvent`]s to any number of subscribers.
//!
//! Every subscriber owns a bounded channel and `publish` never waits on a
//! slow reader: a subscriber whose queue is full is evicted, which ends its
//! stream. Events published by one caller reach each subscriber in publish
//! order. Dropping a [`Subscription`] unsubscribes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use earnwatch_core::events::PollEvent;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::{debug, trace, warn};

/// Token identifying one subscriber.
pub type SubscriberId = u64;

#[derive(Default)]
struct BusInner {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, Sender<PollEvent>>,
}

/// Cloneable handle to a shared subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
    capacity: usize,
}

impl EventBus {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::with_capacity(earnwatch_core::config::EngineConfig::default().subscriber_buffer)
    }

    /// A bus whose subscribers each buffer at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = channel(self.capacity);
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.insert(id, tx);
        debug!(
            "Subscriber {} joined ({} total)",
            id,
            inner.subscribers.len()
        );
        Subscription {
            id,
            rx,
            bus: self.clone(),
        }
    }

    /// Remove a subscriber. Returns `true` if it was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let removed = inner.subscribers.remove(&id).is_some();
        if removed {
            debug!(
                "Subscriber {} left ({} remaining)",
                id,
                inner.subscribers.len()
            );
        }
        removed
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Returns the number of subscribers reached. Subscribers whose
    /// receiver is gone are pruned; subscribers whose queue is full are
    /// evicted.
    pub fn publish(&self, event: PollEvent) -> usize {
        let capacity = self.capacity;
        let mut inner = self.lock();
        trace!(
            "Publishing '{}' for '{}' to {} subscribers",
            event.name(),
            event.subject(),
            inner.subscribers.len()
        );
        inner
            .subscribers
            .retain(|id, tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} fell {} events behind, evicting", id, capacity);
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            });
        inner.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

/// A live subscription. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriberId,
    rx: Receiver<PollEvent>,
    bus: EventBus,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once the subscription was removed
    /// from the bus (and its queued events were drained).
    pub async fn recv(&mut self) -> Option<PollEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<PollEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
