use crate::{id::OrderId, operation::ContextHandle, track::TrackOrder};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::{fmt, sync::Arc};
use tracing::debug;

/// Callback fired when an order completes, fully or partially. Receives
/// the registration context and the completed amount.
pub type OrderCompleteCallback =
    Arc<dyn Fn(Option<&ContextHandle>, &TrackOrder, f64) + Send + Sync>;

/// Callback fired when an order fails to place or register.
pub type OrderErrorCallback = Arc<dyn Fn(Option<&ContextHandle>, &TrackOrder) + Send + Sync>;

/// Callback fired when an order times out.
pub type OrderTimeoutCallback = Arc<dyn Fn(Option<&ContextHandle>, &TrackOrder) + Send + Sync>;

/// Scope of an event registration.
///
/// When events are copied to a new order id (placement match, chain
/// continuation) only the registrations at or above the requested level
/// survive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Lifetime {
    /// Dies with the order it is registered on.
    Order = 0,
    /// Survives across the legs and retries of one operation.
    Operation = 1,
    /// Bound to the context itself.
    Context = 2,
}

/// One event registration.
#[derive(Clone)]
pub struct EventItem<T> {
    name: &'static str,
    context: Option<ContextHandle>,
    callback: T,
    lifetime: Lifetime,
}

impl<T> EventItem<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn context(&self) -> Option<&ContextHandle> {
        self.context.as_ref()
    }

    pub fn callback(&self) -> &T {
        &self.callback
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}

impl<T> fmt::Debug for EventItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventItem")
            .field("name", &self.name)
            .field("context", &self.context.as_ref().map(|context| context.id()))
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// Ordered bag of event registrations of one kind.
#[derive(Clone)]
pub struct EventContainer<T> {
    items: Vec<EventItem<T>>,
}

impl<T> fmt::Debug for EventContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.items).finish()
    }
}

impl<T> Default for EventContainer<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Clone> EventContainer<T> {
    pub fn add(
        &mut self,
        name: &'static str,
        context: Option<ContextHandle>,
        callback: T,
        lifetime: Lifetime,
    ) {
        self.items.push(EventItem {
            name,
            context,
            callback,
            lifetime,
        });
    }

    /// Replace the content with the entries of `other` whose lifetime is
    /// at least `min_lifetime`.
    pub fn replace_from(&mut self, other: &EventContainer<T>, min_lifetime: Lifetime) {
        self.items.clear();
        self.items.extend(
            other
                .items
                .iter()
                .filter(|item| item.lifetime >= min_lifetime)
                .cloned(),
        );
    }

    pub fn items(&self) -> &[EventItem<T>] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The three event sets attached to one order id.
#[derive(Clone, Default)]
pub struct OrderEvents {
    pub on_complete: EventContainer<OrderCompleteCallback>,
    pub on_error: EventContainer<OrderErrorCallback>,
    pub on_timeout: EventContainer<OrderTimeoutCallback>,
}

impl fmt::Debug for OrderEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderEvents")
            .field("on_complete", &self.on_complete)
            .field("on_error", &self.on_error)
            .field("on_timeout", &self.on_timeout)
            .finish()
    }
}

impl OrderEvents {
    pub fn replace_from(&mut self, other: &OrderEvents, min_lifetime: Lifetime) {
        self.on_complete.replace_from(&other.on_complete, min_lifetime);
        self.on_error.replace_from(&other.on_error, min_lifetime);
        self.on_timeout.replace_from(&other.on_timeout, min_lifetime);
    }

    pub fn is_empty(&self) -> bool {
        self.on_complete.is_empty() && self.on_error.is_empty() && self.on_timeout.is_empty()
    }
}

/// Per-order-id event registry.
///
/// Triggers take a snapshot of the container under the lock, release it,
/// then invoke the callbacks: a callback may freely register further
/// events without deadlocking, and those apply to future triggers only.
#[derive(Debug, Default)]
pub struct EventManager {
    events: RwLock<FnvHashMap<OrderId, OrderEvents>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_order_complete(
        &self,
        name: &'static str,
        context: Option<ContextHandle>,
        order_id: &OrderId,
        callback: OrderCompleteCallback,
        lifetime: Lifetime,
    ) {
        debug!(%order_id, name, ?lifetime, "registering onOrderComplete");
        self.events
            .write()
            .entry(order_id.clone())
            .or_default()
            .on_complete
            .add(name, context, callback, lifetime);
    }

    pub fn on_order_error(
        &self,
        name: &'static str,
        context: Option<ContextHandle>,
        order_id: &OrderId,
        callback: OrderErrorCallback,
        lifetime: Lifetime,
    ) {
        debug!(%order_id, name, ?lifetime, "registering onOrderError");
        self.events
            .write()
            .entry(order_id.clone())
            .or_default()
            .on_error
            .add(name, context, callback, lifetime);
    }

    pub fn on_order_timeout(
        &self,
        name: &'static str,
        context: Option<ContextHandle>,
        order_id: &OrderId,
        callback: OrderTimeoutCallback,
        lifetime: Lifetime,
    ) {
        debug!(%order_id, name, ?lifetime, "registering onOrderTimeout");
        self.events
            .write()
            .entry(order_id.clone())
            .or_default()
            .on_timeout
            .add(name, context, callback, lifetime);
    }

    pub fn trigger_on_order_complete(&self, track: &TrackOrder, amount: f64) {
        let snapshot = {
            let events = self.events.read();
            events.get(track.id()).map(|events| events.on_complete.clone())
        };
        let Some(snapshot) = snapshot else { return };

        debug!(id = %track.id(), amount, "triggering onOrderComplete");
        for item in snapshot.items() {
            (item.callback())(item.context(), track, amount);
        }
    }

    pub fn trigger_on_order_error(&self, track: &TrackOrder) {
        let snapshot = {
            let events = self.events.read();
            events.get(track.id()).map(|events| events.on_error.clone())
        };
        let Some(snapshot) = snapshot else { return };

        debug!(id = %track.id(), "triggering onOrderError");
        for item in snapshot.items() {
            (item.callback())(item.context(), track);
        }
    }

    pub fn trigger_on_order_timeout(&self, track: &TrackOrder) {
        let snapshot = {
            let events = self.events.read();
            events.get(track.id()).map(|events| events.on_timeout.clone())
        };
        let Some(snapshot) = snapshot else { return };

        debug!(id = %track.id(), "triggering onOrderTimeout");
        for item in snapshot.items() {
            (item.callback())(item.context(), track);
        }
    }

    /// Duplicate the events of `from` onto `to`, keeping registrations
    /// whose lifetime is at least `min_lifetime`.
    pub fn copy_order(&self, from: &OrderId, to: &OrderId, min_lifetime: Lifetime) {
        debug!(%from, %to, "copying order events");
        let mut events = self.events.write();
        let source = events.get(from).cloned().unwrap_or_default();
        events
            .entry(to.clone())
            .or_default()
            .replace_from(&source, min_lifetime);
    }

    /// Attach a copy of `source` onto `order_id`.
    pub fn copy_order_events(
        &self,
        order_id: &OrderId,
        source: &OrderEvents,
        min_lifetime: Lifetime,
    ) {
        debug!(%order_id, "copying events onto order");
        self.events
            .write()
            .entry(order_id.clone())
            .or_default()
            .replace_from(source, min_lifetime);
    }

    /// Drop event sets whose order id is no longer alive.
    pub fn garbage_collect<F>(&self, is_live: F)
    where
        F: Fn(&OrderId) -> bool,
    {
        let mut events = self.events.write();
        events.retain(|order_id, _| {
            let keep = is_live(order_id);
            if !keep {
                debug!(%order_id, "pruning events for dead order");
            }
            keep
        });
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use vostro_instrument::{currency::Currency, transaction::Transaction};

    fn track(id: &str) -> TrackOrder {
        let transaction = Transaction::pair(Currency::Usd, Currency::Eur);
        transaction.set_rate(0.5, chrono::Utc::now()).unwrap();
        TrackOrder::new(
            OrderId::from(id),
            Order::new(Arc::new(transaction)),
            10.0,
            chrono::Utc::now(),
        )
    }

    #[test]
    fn test_trigger_invokes_registered_callbacks() {
        let manager = EventManager::new();
        let tracked = track("a-1");
        let amounts = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&amounts);
        manager.on_order_complete(
            "test",
            None,
            tracked.id(),
            Arc::new(move |_, _, amount| sink.lock().unwrap().push(amount)),
            Lifetime::Order,
        );

        manager.trigger_on_order_complete(&tracked, 70.0);
        manager.trigger_on_order_complete(&track("a-2"), 1.0);

        assert_eq!(*amounts.lock().unwrap(), vec![70.0]);
    }

    #[test]
    fn test_copy_order_filters_by_lifetime() {
        let manager = EventManager::new();
        let original = track("a-1");
        let matched = track("x-9");
        let fired = Arc::new(AtomicUsize::new(0));

        for (name, lifetime) in [
            ("order-scope", Lifetime::Order),
            ("operation-scope", Lifetime::Operation),
        ] {
            let fired = Arc::clone(&fired);
            manager.on_order_complete(
                name,
                None,
                original.id(),
                Arc::new(move |_, _, _| {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
                lifetime,
            );
        }

        manager.copy_order(original.id(), matched.id(), Lifetime::Operation);
        manager.trigger_on_order_complete(&matched, 1.0);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_register_reentrantly() {
        let manager = Arc::new(EventManager::new());
        let track = track("a-1");

        let inner_manager = Arc::clone(&manager);
        let id = track.id().clone();
        manager.on_order_complete(
            "outer",
            None,
            track.id(),
            Arc::new(move |_, _, _| {
                inner_manager.on_order_complete(
                    "inner",
                    None,
                    &id,
                    Arc::new(|_, _, _| {}),
                    Lifetime::Order,
                );
            }),
            Lifetime::Order,
        );

        // Must not deadlock; the inner registration applies to future
        // triggers only.
        manager.trigger_on_order_complete(&track, 1.0);
    }

    #[test]
    fn test_garbage_collect_prunes_dead_ids() {
        let manager = EventManager::new();
        let live = track("live");
        let dead = track("dead");

        for track in [&live, &dead] {
            manager.on_order_error(
                "test",
                None,
                track.id(),
                Arc::new(|_, _| {}),
                Lifetime::Order,
            );
        }

        manager.garbage_collect(|id| id == live.id());
        assert_eq!(manager.len(), 1);
    }
}
