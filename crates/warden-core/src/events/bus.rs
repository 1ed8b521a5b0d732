//! Typed event fan-out.
//!
//! Handlers are stored as plain function values keyed by an opaque
//! registration id, and subscription handles hold only a weak reference
//! to the registry. Dispatch snapshots the handler list first, so
//! registration and deregistration are safe while a dispatch is in
//! progress, and a panicking handler never prevents its siblings from
//! running.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::{EventKind, GovernanceEvent};

/// Handler invoked for every event of the subscribed kind.
pub type EventHandler = Arc<dyn Fn(&GovernanceEvent) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventKind, Vec<(u64, EventHandler)>>,
    next_id: u64,
}

/// Per-kind event fan-out registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of `kind` and returns its
    /// deregistration handle.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> EventSubscription
    where
        F: Fn(&GovernanceEvent) + Send + Sync + 'static,
    {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        EventSubscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to every handler subscribed to its kind.
    ///
    /// Handler panics are caught and logged; delivery continues with the
    /// remaining handlers.
    pub fn emit(&self, event: &GovernanceEvent) {
        let kind = event.kind();
        tracing::debug!(
            kind = %kind,
            severity = ?event.severity(),
            "governance event"
        );
        let snapshot: Vec<EventHandler> = {
            let registry = self
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .get(&kind)
                .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::warn!(kind = %kind, "event handler panicked; continuing");
            }
        }
    }

    /// Number of handlers currently subscribed to `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// Deregistration handle returned by [`EventBus::subscribe`].
///
/// The handle references the registry weakly: it does not keep the bus
/// (or anything that owns it) alive, and unsubscribing after the bus is
/// gone is a no-op. Dropping the handle without calling
/// [`EventSubscription::unsubscribe`] leaves the handler registered.
#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    kind: EventKind,
    registry: Weak<RwLock<Registry>>,
}

impl EventSubscription {
    /// Opaque registration id, unique per bus.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The kind this subscription was registered for.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the handler from the bus.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(handlers) = registry.handlers.get_mut(&self.kind) {
                handlers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
