//! Typed publish/subscribe bus for decoded server events.
//!
//! UI contexts subscribe to the [`EventKind`]s they care about; the connection
//! read loop publishes every decoded [`InboundEvent`]. Delivery is synchronous,
//! on the publishing thread, in subscription order. An event nobody is
//! subscribed to is dropped.
//!
//! Once [`EventDispatcher::unsubscribe`] returns, the handler is never called
//! again. If a delivery to that handler is in progress on another thread,
//! `unsubscribe` waits for it to finish.
//!
//! A handler may unsubscribe itself (or any other handler) from inside its
//! callback. Such a call never waits: it only stops future deliveries, and a
//! delivery already running on another thread may still complete after it
//! returns. Two handlers on different threads can therefore unsubscribe each
//! other without deadlocking. Handlers must not call
//! [`EventDispatcher::publish`] for their own kind.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use solvr_protocol::{EventKind, InboundEvent};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Callback invoked for each delivered event.
pub type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

thread_local! {
    /// Number of handlers running on this thread.
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    fn active() -> bool {
        DELIVERY_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
    active: AtomicBool,
    /// Held for the whole duration of a delivery.
    in_flight: Mutex<()>,
}

impl Subscriber {
    fn deliver(&self, event: &InboundEvent) -> bool {
        let _in_flight = lock(&self.in_flight);
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let _scope = DeliveryScope::enter();
        (self.handler)(event);
        true
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);

        // Inside a handler this thread may hold another subscriber's
        // `in_flight`, or this one's; waiting here could deadlock.
        if !DeliveryScope::active() {
            // Wait out a delivery that already passed the `active` check.
            drop(lock(&self.in_flight));
        }
    }
}

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut subscribers = lock(&self.subscribers);
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|index| subscribers.remove(index))
        };

        let Some(subscriber) = removed else {
            return false;
        };

        subscriber.deactivate();
        trace!("Unsubscribed {} from {:?}", id, subscriber.kind);
        true
    }
}

/// Routes decoded events to the handlers currently interested in them.
///
/// Cloning is cheap; all clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &lock(&self.inner.subscribers).len())
            .finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    ///
    /// The handler stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let subscriber = Arc::new(Subscriber {
            id,
            kind,
            handler: Arc::new(handler),
            active: AtomicBool::new(true),
            in_flight: Mutex::new(()),
        });

        lock(&self.inner.subscribers).push(subscriber);
        trace!("Subscribed {} to {:?}", id, kind);

        Subscription {
            id,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to several kinds at once and receive the events through a channel.
    ///
    /// Dropping the returned stream unsubscribes every kind.
    pub fn subscribe_channel(&self, kinds: &[EventKind]) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriptions = kinds
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                self.subscribe(*kind, move |event| {
                    let _ = tx.send(event.clone());
                })
            })
            .collect();

        EventStream { rx, subscriptions }
    }

    /// Remove a handler. Returns `false` if it was not registered.
    ///
    /// After this returns, the handler will not be called again.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }

    /// Deliver `event` to every current subscriber of its kind.
    ///
    /// Returns the number of handlers that received it.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers)
            .iter()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect();

        if targets.is_empty() {
            debug!("No subscriber for {:?}, dropping event", kind);
            return 0;
        }

        targets.iter().filter(|s| s.deliver(event)).count()
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.subscribers)
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Remove every handler.
    pub fn clear(&self) {
        let drained: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers).drain(..).collect();
        for subscriber in &drained {
            subscriber.deactivate();
        }
        debug!("Cleared {} subscriptions", drained.len());
    }
}

/// Handle to a registered handler; unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes its handler immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    dispatcher: Weak<Inner>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribe now. Returns `false` if the handler was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        match std::mem::take(&mut self.dispatcher).upgrade() {
            Some(inner) => inner.unsubscribe(self.id),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Channel-backed subscription for UI contexts running as async tasks.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<InboundEvent>,
    subscriptions: Vec<Subscription>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once every subscription is gone.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }

    #[must_use]
    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.iter().map(Subscription::id).collect()
    }
}
