// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! List synchronization controller.
//!
//! A [`ListController`] owns the canonical in-memory collection for one
//! entity type: the single writable source of truth for what the UI
//! renders for that entity. The collection is mutated only by:
//! - wholesale replacement after a bulk load,
//! - optimistic insert/update/remove and their confirm/rollback,
//! - field merges arriving over the invalidation bus.
//!
//! Bulk loads run through a single-flight [`RetryExecutor`]; every load is
//! tagged with a generation and a resolution whose generation is no longer
//! current is discarded, so an abandoned slow load can never overwrite a
//! newer one. CRUD goes through the [`MutationEngine`], which guarantees
//! rollback on remote failure.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Loading -> {Loaded, Errored} -> Loading -> ...
//! ```
//!
//! Construct with [`ListController::new`], spawn [`run`](ListController::run)
//! to service background refresh requests (bus fallbacks, visibility
//! regain), and call [`refresh`](ListController::refresh) for the initial
//! load.

mod types;

pub use types::ListState;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::bus::{InvalidationBus, InvalidationEvent, Subscription};
use crate::config::SyncConfig;
use crate::filter::FilterSet;
use crate::notice::NoticeHub;
use crate::optimistic::{MutationDescriptor, MutationEngine, MutationKind};
use crate::record::{EntityKind, Record, RecordId, TempId};
use crate::remote::{ListPage, RecordStore, RemoteError};
use crate::resilience::{RetryExecutor, RetryPolicy};
use crate::scheduler::ResyncTarget;

/// Canonical-collection owner for one entity type.
pub struct ListController {
    entity: EntityKind,
    store: Arc<dyn RecordStore>,
    bus: Arc<InvalidationBus>,
    notices: NoticeHub,
    engine: MutationEngine,
    loader: RetryExecutor<ListPage>,

    items: RwLock<Vec<Record>>,
    total_count: AtomicUsize,
    list_state: watch::Sender<ListState>,

    filters: RwLock<FilterSet>,
    filter_key: RwLock<String>,

    /// Monotonic load tag; a resolving load applies only while it still
    /// matches.
    load_generation: AtomicU64,

    /// Wakes the run loop for bus-fallback and visibility refreshes.
    refresh_notify: Notify,
    shutdown: watch::Sender<bool>,

    _subscription: Subscription,
}

impl ListController {
    /// Create a controller and register it on the invalidation bus.
    ///
    /// The controller starts `Idle` with an empty collection; call
    /// [`refresh`](Self::refresh) (or register it with the scheduler) to
    /// load.
    pub fn new(
        entity: EntityKind,
        store: Arc<dyn RecordStore>,
        bus: Arc<InvalidationBus>,
        notices: NoticeHub,
        config: &SyncConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let listener = weak.clone();
            let subscription = bus.subscribe(move |event: &InvalidationEvent| {
                if let Some(controller) = listener.upgrade() {
                    controller.handle_invalidation(event);
                }
            });

            let retry_notices = notices.clone();
            let loader = RetryExecutor::new(RetryPolicy::from_config(config)).with_on_retry(
                move |attempt, error| {
                    crate::metrics::record_retry(entity.path(), attempt);
                    retry_notices.warning(format!(
                        "retrying {} load (attempt {}): {}",
                        entity.path(),
                        attempt,
                        error
                    ));
                },
            );

            let (list_state, _) = watch::channel(ListState::Idle);
            let (shutdown, _) = watch::channel(false);
            let default_filters = FilterSet::default();

            Self {
                entity,
                store,
                bus: bus.clone(),
                engine: MutationEngine::new(config.mutation_timeout(), notices.clone()),
                notices,
                loader,
                items: RwLock::new(Vec::new()),
                total_count: AtomicUsize::new(0),
                list_state,
                filter_key: RwLock::new(default_filters.identity_key()),
                filters: RwLock::new(default_filters),
                load_generation: AtomicU64::new(0),
                refresh_notify: Notify::new(),
                shutdown,
                _subscription: subscription,
            }
        })
    }

    #[must_use]
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    /// Snapshot of the canonical collection.
    #[must_use]
    pub fn items(&self) -> Vec<Record> {
        self.items.read().clone()
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.total_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn list_state(&self) -> ListState {
        *self.list_state.borrow()
    }

    /// Watch state transitions (`Idle -> Loading -> {Loaded, Errored}`).
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ListState> {
        self.list_state.subscribe()
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.list_state() == ListState::Loading
    }

    /// Terminal error of the most recent failed load, if any.
    #[must_use]
    pub fn error(&self) -> Option<RemoteError> {
        self.loader.last_error()
    }

    /// Replace the filter state.
    ///
    /// Filters are compared by normalized identity, not instance: when the
    /// new set serializes to the current key this is a no-op (no network
    /// call). Otherwise the collection reloads immediately.
    pub async fn set_filters(&self, filters: FilterSet) -> bool {
        let key = filters.identity_key();
        {
            let mut current = self.filter_key.write();
            if *current == key {
                debug!(entity = %self.entity, "filter identity unchanged, skipping reload");
                return false;
            }
            *current = key;
            *self.filters.write() = filters;
        }
        self.refresh().await
    }

    /// Run the bulk load for the current filters, replacing the collection
    /// wholesale on success. Single-flight: a newer call supersedes an
    /// in-flight one.
    #[tracing::instrument(skip(self), fields(entity = %self.entity))]
    pub async fn refresh(&self) -> bool {
        let started = std::time::Instant::now();
        let generation = self.load_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let filters = self.filters.read().clone();
        let _ = self.list_state.send(ListState::Loading);

        let store = self.store.clone();
        let entity = self.entity;
        let result = self
            .loader
            .execute(move || {
                let store = store.clone();
                let filters = filters.clone();
                async move { store.list(entity, &filters).await }
            })
            .await;

        if self.load_generation.load(Ordering::Acquire) != generation {
            // A newer load owns the collection now; drop this resolution.
            debug!(entity = %self.entity, generation, "discarding stale load");
            return false;
        }

        match result {
            Some(page) => {
                let count = page.records.len();
                {
                    let mut items = self.items.write();
                    *items = page.records;
                }
                self.total_count.store(count, Ordering::Release);
                crate::metrics::set_collection_size(self.entity.path(), count);
                crate::metrics::record_operation(self.entity.path(), "load", "success");
                crate::metrics::record_operation_latency(
                    self.entity.path(),
                    "load",
                    started.elapsed(),
                );
                let _ = self.list_state.send(ListState::Loaded);
                if page.from_cache {
                    debug!(entity = %self.entity, count, "collection loaded from server cache");
                } else {
                    info!(entity = %self.entity, count, "collection loaded");
                }
                true
            }
            None => {
                let _ = self.list_state.send(ListState::Errored);
                crate::metrics::record_operation(self.entity.path(), "load", "error");
                if let Some(error) = self.loader.last_error() {
                    let retries = self.loader.state().retry_count;
                    self.notices.error(format!(
                        "failed to load {} (after {} attempts): {}",
                        self.entity.path(),
                        retries + 1,
                        error
                    ));
                }
                false
            }
        }
    }

    /// Optimistically create a record.
    ///
    /// A placeholder with a typed temp id is prepended immediately; on
    /// confirmation it is replaced by the server-canonical record, on
    /// failure it is removed again.
    #[tracing::instrument(skip_all, fields(entity = %self.entity))]
    pub async fn create(&self, fields: Map<String, Value>) -> bool {
        let temp = TempId::new();
        let descriptor = MutationDescriptor::single(
            MutationKind::Create,
            self.entity,
            RecordId::Pending(temp),
        );
        let placeholder = Record::placeholder(temp, fields.clone());

        let store = self.store.clone();
        let entity = self.entity;
        let outcome = self
            .engine
            .execute(
                &descriptor,
                || {
                    self.items.write().insert(0, placeholder);
                    self.total_count.fetch_add(1, Ordering::AcqRel);
                },
                async move { store.create(entity, &fields).await },
                |canonical: &Record| {
                    let mut items = self.items.write();
                    if let Some(entry) =
                        items.iter_mut().find(|record| record.id == RecordId::Pending(temp))
                    {
                        *entry = canonical.clone();
                    } else {
                        // The placeholder should still be here; losing it is
                        // a caller/ordering bug upstream.
                        warn!(entity = %self.entity, id = %canonical.id, "placeholder missing at confirmation, inserting canonical record");
                        items.insert(0, canonical.clone());
                    }
                },
                || {
                    self.items.write().retain(|record| record.id != RecordId::Pending(temp));
                    self.dec_total(1);
                },
            )
            .await;

        if outcome.success {
            self.notices.success(format!("{} created", self.entity.singular()));
            crate::metrics::set_collection_size(self.entity.path(), self.items.read().len());
        }
        outcome.success
    }

    /// Optimistically update a record in place, merging server truth on
    /// confirmation and broadcasting it to sibling controllers.
    #[tracing::instrument(skip(self, fields), fields(entity = %self.entity, id = %id))]
    pub async fn update(&self, id: &str, fields: Map<String, Value>) -> bool {
        let target = RecordId::Committed(id.to_string());
        let snapshot = {
            let items = self.items.read();
            items
                .iter()
                .position(|record| record.id == target)
                .map(|index| (index, items[index].clone()))
        };
        if snapshot.is_none() {
            warn!(entity = %self.entity, id = %id, "update target not in collection, running remote-only");
        }

        let descriptor =
            MutationDescriptor::single(MutationKind::Update, self.entity, target.clone());
        let patch = fields.clone();
        let store = self.store.clone();
        let entity = self.entity;
        let remote_id = id.to_string();
        let rollback_snapshot = snapshot.clone();

        let outcome = self
            .engine
            .execute(
                &descriptor,
                || {
                    if let Some(entry) =
                        self.items.write().iter_mut().find(|record| record.id == target)
                    {
                        entry.merge_fields(&patch);
                    }
                },
                async move { store.update(entity, &remote_id, &fields).await },
                |canonical: &Record| {
                    if let Some(entry) =
                        self.items.write().iter_mut().find(|record| record.id == canonical.id)
                    {
                        // Server truth wins over the locally merged patch.
                        entry.merge_fields(&canonical.fields);
                        entry.created_time =
                            canonical.created_time.clone().or(entry.created_time.take());
                    }
                },
                move || {
                    if let Some((index, original)) = rollback_snapshot {
                        let mut items = self.items.write();
                        if let Some(entry) =
                            items.iter_mut().find(|record| record.id == original.id)
                        {
                            *entry = original;
                        } else {
                            let at = index.min(items.len());
                            items.insert(at, original);
                        }
                    }
                },
            )
            .await;

        match (outcome.success, outcome.data) {
            (true, Some(canonical)) => {
                self.notices.success(format!("{} updated", self.entity.singular()));
                self.bus.invalidate(&InvalidationEvent::refreshed(
                    self.entity,
                    id,
                    canonical.fields.clone(),
                ));
                true
            }
            _ => false,
        }
    }

    /// Optimistically delete a record; it is restored at its previous
    /// position if the server refuses.
    #[tracing::instrument(skip(self), fields(entity = %self.entity, id = %id))]
    pub async fn delete(&self, id: &str) -> bool {
        let target = RecordId::Committed(id.to_string());
        let snapshot = {
            let items = self.items.read();
            items
                .iter()
                .position(|record| record.id == target)
                .map(|index| (index, items[index].clone()))
        };

        let descriptor =
            MutationDescriptor::single(MutationKind::Delete, self.entity, target.clone());
        let store = self.store.clone();
        let entity = self.entity;
        let remote_id = id.to_string();
        let removed = snapshot.is_some();

        let outcome = self
            .engine
            .execute(
                &descriptor,
                || {
                    if removed {
                        self.items.write().retain(|record| record.id != target);
                        self.dec_total(1);
                    }
                },
                async move { store.delete(entity, &remote_id).await },
                |_: &()| {},
                move || {
                    if let Some((index, original)) = snapshot {
                        let mut items = self.items.write();
                        let at = index.min(items.len());
                        items.insert(at, original);
                        drop(items);
                        self.total_count.fetch_add(1, Ordering::AcqRel);
                    }
                },
            )
            .await;

        if outcome.success {
            self.notices.success(format!("{} deleted", self.entity.singular()));
            crate::metrics::set_collection_size(self.entity.path(), self.items.read().len());
        }
        outcome.success
    }

    /// Bulk delete. Only server-confirmed ids stay removed; records the
    /// server failed to delete reappear, and the count mismatch surfaces
    /// as a warning notice. Returns the number actually deleted.
    #[tracing::instrument(skip_all, fields(entity = %self.entity, requested = ids.len()))]
    pub async fn delete_many(&self, ids: &[String]) -> usize {
        if ids.is_empty() {
            return 0;
        }

        let targets: Vec<RecordId> =
            ids.iter().map(|id| RecordId::Committed(id.clone())).collect();
        let descriptor =
            MutationDescriptor::bulk(MutationKind::Delete, self.entity, targets.clone());

        // Position-preserving snapshot of every record we are about to drop.
        let snapshot: Vec<(usize, Record)> = {
            let items = self.items.read();
            items
                .iter()
                .enumerate()
                .filter(|(_, record)| targets.contains(&record.id))
                .map(|(index, record)| (index, record.clone()))
                .collect()
        };
        let rollback_snapshot = snapshot.clone();

        let store = self.store.clone();
        let entity = self.entity;
        let remote_ids: Vec<String> = ids.to_vec();

        let outcome = self
            .engine
            .execute(
                &descriptor,
                || {
                    let mut items = self.items.write();
                    items.retain(|record| !targets.contains(&record.id));
                    drop(items);
                    self.dec_total(snapshot.len());
                },
                async move { store.delete_many(entity, &remote_ids).await },
                |result: &crate::remote::BulkDeleteOutcome| {
                    // Records the server did not delete come back.
                    let survivors: Vec<&(usize, Record)> = snapshot
                        .iter()
                        .filter(|(_, record)| {
                            record
                                .id
                                .as_committed()
                                .is_some_and(|id| !result.deleted_ids.iter().any(|d| d == id))
                        })
                        .collect();
                    if !survivors.is_empty() {
                        let mut items = self.items.write();
                        for (index, record) in &survivors {
                            let at = (*index).min(items.len());
                            items.insert(at, record.clone());
                        }
                        drop(items);
                        self.total_count.fetch_add(survivors.len(), Ordering::AcqRel);
                    }
                },
                move || {
                    let restored = rollback_snapshot.len();
                    let mut items = self.items.write();
                    for (index, record) in rollback_snapshot {
                        let at = index.min(items.len());
                        items.insert(at, record);
                    }
                    drop(items);
                    self.total_count.fetch_add(restored, Ordering::AcqRel);
                },
            )
            .await;

        match outcome.data {
            Some(result) => {
                if result.is_partial() {
                    let missing = result.requested - result.deleted;
                    warn!(
                        entity = %self.entity,
                        deleted = result.deleted,
                        requested = result.requested,
                        "bulk delete was partial"
                    );
                    crate::metrics::record_partial_delete(self.entity.path(), missing);
                    self.notices.warning(format!(
                        "deleted {} of {} {}",
                        result.deleted,
                        result.requested,
                        self.entity.path()
                    ));
                } else {
                    self.notices.success(format!(
                        "{} {} deleted",
                        result.deleted,
                        self.entity.path()
                    ));
                }
                crate::metrics::set_collection_size(self.entity.path(), self.items.read().len());
                result.deleted
            }
            None => 0,
        }
    }

    /// Stale-while-revalidate on focus: the UI reports visibility regain
    /// and the run loop refreshes in the background.
    pub fn notify_visible(&self) {
        debug!(entity = %self.entity, "visibility regained, scheduling refresh");
        self.refresh_notify.notify_one();
    }

    /// Service background refresh requests until [`shutdown`](Self::shutdown).
    ///
    /// Spawn this once per controller; bus events without fresh data and
    /// visibility regains are coalesced into single refreshes here.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            debug!(entity = %self.entity, "controller loop stopped");
            return;
        }
        loop {
            tokio::select! {
                _ = self.refresh_notify.notified() => {
                    self.refresh().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!(entity = %self.entity, "controller loop stopped");
                        return;
                    }
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    fn handle_invalidation(&self, event: &InvalidationEvent) {
        if event.entity != self.entity {
            return;
        }
        match (&event.entity_id, &event.fresh) {
            (Some(id), Some(fresh)) => {
                let mut items = self.items.write();
                if let Some(entry) = items.iter_mut().find(|record| record.id.is(id)) {
                    entry.merge_fields(fresh);
                    debug!(entity = %self.entity, id = %id, "merged fresh data from invalidation");
                }
                // Not holding the record means the event doesn't affect us.
            }
            _ => {
                // Unknown change: refetch through the run loop.
                debug!(entity = %self.entity, "invalidation without fresh data, scheduling refresh");
                self.refresh_notify.notify_one();
            }
        }
    }

    fn dec_total(&self, by: usize) {
        let _ = self
            .total_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(by))
            });
    }
}

#[async_trait]
impl ResyncTarget for ListController {
    fn is_busy(&self) -> bool {
        self.loading()
    }

    async fn resync(&self) -> Result<(), RemoteError> {
        if self.refresh().await {
            return Ok(());
        }
        match self.loader.last_error() {
            Some(error) => Err(error),
            // Superseded or stale resolution: not a failure.
            None => Ok(()),
        }
    }
}
