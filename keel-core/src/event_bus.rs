//! In-process publish/subscribe for [`Event`]s
//!
//! Each subscriber owns one bounded channel, registered under every event
//! type it asked for. Publishing never blocks: an event that does not fit in
//! a subscriber's channel is dropped for that subscriber only. Events reach a
//! given subscriber in publish order.

use futures_util::Stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::domain::event::{Event, EventType};

/// Buffered events per subscriber
pub const SUBSCRIBER_CAPACITY: usize = 100;

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

impl BusInner {
    // A panic while holding the lock leaves the map itself consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<EventType, Vec<Subscriber>>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EventType, Vec<Subscriber>>> {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, ids: &[u64]) {
        let mut subscribers = self.write();
        for list in subscribers.values_mut() {
            list.retain(|s| !ids.contains(&s.id));
        }
        subscribers.retain(|_, list| !list.is_empty());
    }
}

/// Cheaply cloneable handle to a shared bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for the given event types
    ///
    /// An empty `types` slice subscribes to every type.
    pub fn subscribe(&self, types: &[EventType]) -> Subscription {
        let types: Vec<EventType> = if types.is_empty() {
            EventType::ALL.to_vec()
        } else {
            let mut unique = types.to_vec();
            unique.sort_by_key(|t| t.as_str());
            unique.dedup();
            unique
        };

        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut subscribers = self.inner.write();
            for event_type in &types {
                subscribers.entry(*event_type).or_default().push(Subscriber {
                    id,
                    tx: tx.clone(),
                });
            }
        }

        Subscription {
            id,
            types,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscription from every type and close its channel
    ///
    /// Events already buffered can still be received; after that the
    /// subscription yields end-of-stream.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.inner.remove(&[subscription.id]);
    }

    /// Deliver `event` to every subscriber of its type without blocking
    ///
    /// # Returns
    /// Number of subscribers the event was delivered to
    pub fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subscribers = self.inner.read();
            let Some(list) = subscribers.get(&event.event_type) else {
                return 0;
            };

            for subscriber in list {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(
                            "Dropping {} event for full subscriber {}",
                            event.event_type, subscriber.id
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }

        if !closed.is_empty() {
            self.inner.remove(&closed);
        }

        delivered
    }

    /// Number of distinct live subscribers
    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.inner.read();
        let mut ids: Vec<u64> = subscribers
            .values()
            .flat_map(|list| list.iter().map(|s| s.id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Events dropped because a subscriber's channel was full
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving end of a bus subscription
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    types: Vec<EventType>,
    rx: mpsc::Receiver<Event>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn types(&self) -> &[EventType] {
        &self.types
    }

    /// Next event, or `None` once the subscription is closed and drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next event if one is buffered
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Adapt into a stream that unsubscribes when dropped
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&[self.id]);
        }
    }
}
