// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache invalidation bus.
//!
//! Broadcast channel decoupling an entity-detail editor from the list
//! controllers holding copies of the same entity: a confirmed edit is
//! pushed to every subscriber without an extra round-trip. The bus is an
//! explicitly constructed value injected at composition time, so tests
//! (and independent UI roots) get isolated buses.
//!
//! Dispatch is synchronous and in subscription order, against a snapshot
//! of the listener list, so subscribing or unsubscribing from inside a
//! listener is safe. Each listener runs in its own panic boundary; one
//! faulty subscriber cannot break propagation for the rest.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use record_sync::{EntityKind, InvalidationBus, InvalidationEvent};
//!
//! let bus = Arc::new(InvalidationBus::new());
//! let subscription = bus.subscribe(|event: &InvalidationEvent| {
//!     println!("changed: {:?}", event.entity_id);
//! });
//!
//! bus.invalidate(&InvalidationEvent::changed(EntityKind::Leads));
//! subscription.unsubscribe();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::record::EntityKind;

/// A change notification for one entity type.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    pub entity: EntityKind,
    /// The affected record, when known.
    pub entity_id: Option<String>,
    /// Server-confirmed field patch. Absent means "unknown change -
    /// refetch if affected".
    pub fresh: Option<Map<String, Value>>,
}

impl InvalidationEvent {
    /// A confirmed edit carrying server truth for one record.
    #[must_use]
    pub fn refreshed(entity: EntityKind, id: impl Into<String>, fresh: Map<String, Value>) -> Self {
        Self {
            entity,
            entity_id: Some(id.into()),
            fresh: Some(fresh),
        }
    }

    /// An unknown change; subscribers holding this entity type must refetch.
    #[must_use]
    pub fn changed(entity: EntityKind) -> Self {
        Self {
            entity,
            entity_id: None,
            fresh: None,
        }
    }
}

type Listener = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

/// Process-wide (per composition root) invalidation broadcast channel.
pub struct InvalidationBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener; it observes every subsequent
    /// [`invalidate`](Self::invalidate) until the returned [`Subscription`]
    /// unsubscribes (explicitly or on drop).
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&InvalidationEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Synchronously dispatch `event` to all current subscribers, in
    /// subscription order.
    pub fn invalidate(&self, event: &InvalidationEvent) {
        // Snapshot under the lock, dispatch outside it: listeners may
        // subscribe or unsubscribe mid-broadcast.
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        debug!(
            entity = %event.entity,
            id = event.entity_id.as_deref().unwrap_or("*"),
            listeners = snapshot.len(),
            "dispatching invalidation"
        );
        crate::metrics::record_invalidation(event.entity.path(), snapshot.len());

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(entity = %event.entity, "invalidation listener panicked, continuing dispatch");
            }
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(entry, _)| *entry != id);
    }
}

/// Handle to one bus registration. Unsubscribes on drop; explicit
/// [`unsubscribe`](Self::unsubscribe) is idempotent.
pub struct Subscription {
    bus: Weak<InvalidationBus>,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(bus) = self.bus.upgrade() {
                bus.remove(self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
