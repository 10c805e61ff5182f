//! Integration tests for the record-sync layer.
//!
//! These drive the full stack - controllers, retry executor, mutation
//! engine, invalidation bus, scheduler - against a stateful in-memory
//! record store with failure injection. No network required.
//!
//! # Test Organization
//! - `happy_*` - normal operation: load, CRUD, fan-out, periodic resync
//! - `failure_*` - failure scenarios: transient outages, rollback,
//!   partial bulk deletes

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::time::sleep;

use record_sync::{
    BulkDeleteOutcome, EntityKind, FilterSet, InvalidationBus, ListController, ListPage,
    ListState, NoticeHub, NoticeLevel, Record, RecordStore, RemoteError, ResyncScheduler,
    SyncConfig,
};

// =============================================================================
// In-Memory Server
// =============================================================================

/// Stateful stand-in for the remote record store. Holds server truth,
/// assigns ids, and can inject transient failures or refuse deletes.
#[derive(Default)]
struct ServerStore {
    records: Mutex<Vec<Record>>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    /// Fail this many upcoming list calls with a 503.
    fail_lists: AtomicUsize,
    /// Ids the server refuses to bulk-delete.
    locked_ids: Mutex<HashSet<String>>,
}

impl ServerStore {
    fn seed(&self, records: Vec<Record>) {
        *self.records.lock() = records;
    }

    fn server_ids(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| record.id.as_committed().map(str::to_string))
            .collect()
    }
}

fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn record(id: &str, pairs: &[(&str, Value)]) -> Record {
    Record::committed(id, fields(pairs))
}

#[async_trait]
impl RecordStore for ServerStore {
    async fn list(&self, _entity: EntityKind, _filters: &FilterSet) -> Result<ListPage, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_lists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
        {
            return Err(RemoteError::Http { status: 503, message: "unavailable".into() });
        }
        Ok(ListPage { records: self.records.lock().clone(), from_cache: false })
    }

    async fn create(
        &self,
        _entity: EntityKind,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = Record::committed(&id, fields.clone());
        self.records.lock().insert(0, record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        _entity: EntityKind,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let mut records = self.records.lock();
        let entry = records
            .iter_mut()
            .find(|record| record.id.is(id))
            .ok_or(RemoteError::Http { status: 404, message: "record not found".into() })?;
        entry.merge_fields(fields);
        Ok(entry.clone())
    }

    async fn delete(&self, _entity: EntityKind, id: &str) -> Result<(), RemoteError> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|record| !record.id.is(id));
        if records.len() == before {
            return Err(RemoteError::Http { status: 404, message: "record not found".into() });
        }
        Ok(())
    }

    async fn delete_many(
        &self,
        _entity: EntityKind,
        ids: &[String],
    ) -> Result<BulkDeleteOutcome, RemoteError> {
        let locked = self.locked_ids.lock().clone();
        let mut deleted_ids = Vec::new();
        let mut errors = Vec::new();
        {
            let mut records = self.records.lock();
            for id in ids {
                if locked.contains(id) {
                    errors.push(format!("{}: locked", id));
                    continue;
                }
                records.retain(|record| !record.id.is(id));
                deleted_ids.push(id.clone());
            }
        }
        Ok(BulkDeleteOutcome {
            requested: ids.len(),
            deleted: deleted_ids.len(),
            deleted_ids,
            errors,
        })
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        base_delay_ms: 1,
        max_delay_ms: 10,
        bulk_load_timeout_ms: 2_000,
        mutation_timeout_ms: 2_000,
        resync_interval_ms: 30,
        resync_error_threshold: 3,
        resync_cooldown_ms: 200,
        ..Default::default()
    }
}

struct Harness {
    store: Arc<ServerStore>,
    bus: Arc<InvalidationBus>,
    notices: NoticeHub,
    config: SyncConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(ServerStore::default()),
            bus: Arc::new(InvalidationBus::new()),
            notices: NoticeHub::default(),
            config: fast_config(),
        }
    }

    fn controller(&self, entity: EntityKind) -> Arc<ListController> {
        ListController::new(
            entity,
            self.store.clone(),
            self.bus.clone(),
            self.notices.clone(),
            &self.config,
        )
    }
}

// =============================================================================
// Happy Path Tests
// =============================================================================

#[tokio::test]
async fn happy_load_create_update_delete_lifecycle() {
    let harness = Harness::new();
    harness.store.seed(vec![
        record("rec-a", &[("Name", json!("Mario")), ("Stato", json!("Nuovo"))]),
        record("rec-b", &[("Name", json!("Anna")), ("Stato", json!("Attivo"))]),
    ]);

    let leads = harness.controller(EntityKind::Leads);
    assert_eq!(leads.list_state(), ListState::Idle);

    assert!(leads.refresh().await);
    assert_eq!(leads.total_count(), 2);
    assert_eq!(leads.list_state(), ListState::Loaded);

    // Create: server assigns the id, placeholder vanishes.
    assert!(leads.create(fields(&[("Name", json!("Luca"))])).await);
    let items = leads.items();
    assert_eq!(items.len(), 3);
    assert!(items[0].id.is("rec-0"));
    assert!(!items.iter().any(|record| record.id.is_pending()));

    // Update: local state converges on server truth without a reload.
    let list_calls = harness.store.list_calls.load(Ordering::SeqCst);
    assert!(leads.update("rec-a", fields(&[("Stato", json!("Chiuso"))])).await);
    let items = leads.items();
    let updated = items.iter().find(|record| record.id.is("rec-a")).unwrap();
    assert_eq!(updated.field("Stato"), Some(&json!("Chiuso")));
    assert_eq!(harness.store.list_calls.load(Ordering::SeqCst), list_calls);

    // Delete.
    assert!(leads.delete("rec-b").await);
    assert_eq!(leads.total_count(), 2);
    assert!(!harness.store.server_ids().contains(&"rec-b".to_string()));
}

#[tokio::test]
async fn happy_detail_edit_fans_out_to_sibling_controller() {
    let harness = Harness::new();
    harness
        .store
        .seed(vec![record("rec-a", &[("Stato", json!("Nuovo"))])]);

    // Two independent views over the same entity type.
    let editing_view = harness.controller(EntityKind::Leads);
    let sibling_view = harness.controller(EntityKind::Leads);
    editing_view.refresh().await;
    sibling_view.refresh().await;

    let sibling_loads = harness.store.list_calls.load(Ordering::SeqCst);
    assert!(editing_view.update("rec-a", fields(&[("Stato", json!("Attivo"))])).await);

    // The sibling picked the change up from the bus, not from a refetch.
    let sibling_record = sibling_view.items()[0].clone();
    assert_eq!(sibling_record.field("Stato"), Some(&json!("Attivo")));
    assert_eq!(harness.store.list_calls.load(Ordering::SeqCst), sibling_loads);
}

#[tokio::test]
async fn happy_unrelated_entities_do_not_cross_talk() {
    let harness = Harness::new();
    harness.store.seed(vec![record("rec-a", &[("Stato", json!("Nuovo"))])]);

    let leads = harness.controller(EntityKind::Leads);
    let orders = harness.controller(EntityKind::Orders);
    leads.refresh().await;
    orders.refresh().await;

    assert!(leads.update("rec-a", fields(&[("Stato", json!("Attivo"))])).await);

    // The orders view holds a record with the same id; it must not merge
    // a leads event.
    assert_eq!(orders.items()[0].field("Stato"), Some(&json!("Nuovo")));
}

#[tokio::test]
async fn happy_periodic_resync_picks_up_server_changes() {
    let harness = Harness::new();
    harness.store.seed(vec![record("rec-a", &[])]);

    let leads = harness.controller(EntityKind::Leads);
    leads.refresh().await;
    assert_eq!(leads.total_count(), 1);

    let scheduler = ResyncScheduler::from_config(&harness.config);
    scheduler.register("leads", "leads list", leads.clone(), harness.config.resync_interval());

    // Another client writes directly to the server.
    harness.store.seed(vec![record("rec-a", &[]), record("rec-z", &[])]);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(leads.total_count(), 2);
}

#[tokio::test]
async fn happy_success_notices_are_emitted_in_domain_terms() {
    let harness = Harness::new();
    let mut notices = harness.notices.subscribe();

    let leads = harness.controller(EntityKind::Leads);
    leads.refresh().await;
    assert!(leads.create(fields(&[("Name", json!("Luca"))])).await);

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Success);
    assert_eq!(notice.message, "lead created");
}

// =============================================================================
// Failure Scenario Tests
// =============================================================================

#[tokio::test]
async fn failure_transient_outage_is_retried_within_one_refresh() {
    let harness = Harness::new();
    harness.store.seed(vec![record("rec-a", &[])]);
    // Two 503s, then the third attempt lands.
    harness.store.fail_lists.store(2, Ordering::SeqCst);

    let leads = harness.controller(EntityKind::Leads);
    assert!(leads.refresh().await);
    assert_eq!(leads.total_count(), 1);
    assert_eq!(harness.store.list_calls.load(Ordering::SeqCst), 3);
    assert!(leads.error().is_none());
}

#[tokio::test]
async fn failure_exhausted_retries_surface_error_state_and_notice() {
    let harness = Harness::new();
    let mut notices = harness.notices.subscribe();
    harness.store.fail_lists.store(10, Ordering::SeqCst);

    let leads = harness.controller(EntityKind::Leads);
    assert!(!leads.refresh().await);
    assert_eq!(leads.list_state(), ListState::Errored);
    assert!(matches!(leads.error(), Some(RemoteError::Http { status: 503, .. })));
    // Initial attempt + 2 retries.
    assert_eq!(harness.store.list_calls.load(Ordering::SeqCst), 3);

    // Retry warnings, then the terminal error, all in domain terms.
    let mut saw_terminal = false;
    while let Ok(notice) = notices.try_recv() {
        if notice.level == NoticeLevel::Error {
            assert!(notice.message.contains("failed to load leads"));
            assert!(notice.message.contains("3 attempts"));
            saw_terminal = true;
        }
    }
    assert!(saw_terminal);
}

#[tokio::test]
async fn failure_update_against_missing_record_rolls_back() {
    let harness = Harness::new();
    harness.store.seed(vec![record("rec-a", &[("Stato", json!("Nuovo"))])]);

    let leads = harness.controller(EntityKind::Leads);
    leads.refresh().await;
    let before = leads.items();

    // The server no longer has the record; the 404 is not retried and the
    // local merge is undone.
    harness.store.seed(vec![]);
    assert!(!leads.update("rec-a", fields(&[("Stato", json!("Chiuso"))])).await);
    assert_eq!(leads.items(), before);
}

#[tokio::test]
async fn failure_partial_bulk_delete_keeps_refused_records_visible() {
    let harness = Harness::new();
    harness.store.seed(vec![
        record("rec-a", &[]),
        record("rec-b", &[]),
        record("rec-c", &[]),
    ]);
    harness.store.locked_ids.lock().insert("rec-c".to_string());

    let leads = harness.controller(EntityKind::Leads);
    leads.refresh().await;

    let deleted = leads
        .delete_many(&["rec-a".into(), "rec-b".into(), "rec-c".into()])
        .await;

    assert_eq!(deleted, 2);
    let remaining = leads.items();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].id.is("rec-c"));
    assert_eq!(harness.store.server_ids(), vec!["rec-c".to_string()]);
}

#[tokio::test]
async fn failure_resync_errors_do_not_wedge_the_controller() {
    let harness = Harness::new();
    harness.store.seed(vec![record("rec-a", &[])]);

    let leads = harness.controller(EntityKind::Leads);
    leads.refresh().await;

    let scheduler = ResyncScheduler::from_config(&harness.config);
    scheduler.register("leads", "leads list", leads.clone(), harness.config.resync_interval());

    // Every resync attempt fails for a while (3 retries per tick).
    harness.store.fail_lists.store(100, Ordering::SeqCst);
    sleep(Duration::from_millis(120)).await;

    // Collection still renders the last good load, and a manual refresh
    // recovers once the outage clears.
    assert_eq!(leads.total_count(), 1);
    scheduler.unregister("leads");
    harness.store.fail_lists.store(0, Ordering::SeqCst);
    assert!(leads.refresh().await);
    assert_eq!(leads.list_state(), ListState::Loaded);
}
