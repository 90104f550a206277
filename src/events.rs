//! Typed publish/subscribe for client events.
//!
//! Handlers are registered per [`EventKind`] and invoked synchronously, in
//! registration order, on whichever task emits the event. The registry lock is
//! released before any handler runs, so handlers may call back into the client
//! (including `on`/`off`) without deadlocking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::error;

use crate::error::ConnectionError;
use crate::models::{DisconnectReason, OrderOutcome, OrderUpdate, Quote};

/// Everything the client reports to its subscribers.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Ticker update applied to the market data cache
    MarketData(Quote),
    /// `execute_order` succeeded
    OrderExecuted(OrderOutcome),
    /// Execution report pushed over the stream
    OrderUpdate(OrderUpdate),
    Connected,
    /// Stream dropped. `reconnecting` is false once the client has given up.
    Disconnected {
        reason: DisconnectReason,
        reconnecting: bool,
    },
    /// A reconnect attempt is scheduled after `delay`
    Reconnecting { attempt: u32, delay: Duration },
    /// Failed to open or authenticate the stream
    Error(ConnectionError),
}

impl BrokerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BrokerEvent::MarketData(_) => EventKind::MarketData,
            BrokerEvent::OrderExecuted(_) => EventKind::OrderExecuted,
            BrokerEvent::OrderUpdate(_) => EventKind::OrderUpdate,
            BrokerEvent::Connected => EventKind::Connected,
            BrokerEvent::Disconnected { .. } => EventKind::Disconnected,
            BrokerEvent::Reconnecting { .. } => EventKind::Reconnecting,
            BrokerEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Discriminant used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MarketData,
    OrderExecuted,
    OrderUpdate,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type EventHandler = Arc<dyn Fn(&BrokerEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: EventHandler,
}

/// Multi-subscriber event registry. Cheap to clone; clones share handlers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&BrokerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscriptions.write().push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a registration. Returns false if it was already removed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.inner.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Deliver an event to every matching handler. A panicking handler is
    /// logged and does not stop delivery to the rest.
    pub fn emit(&self, event: BrokerEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(event = ?kind, "Event handler panicked");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.inner.subscriptions.read().len())
            .finish()
    }
}
