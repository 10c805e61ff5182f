//! # Record Sync
//!
//! A client-side optimistic-update and cache-synchronization layer over a
//! remote record-store REST API (leads, activities, products, orders).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       UI / Embedder                         │
//! │  • Renders controller items(), binds loading/error state    │
//! │  • Calls create/update/delete, forwards visibility events   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               List Synchronization Controller               │
//! │  • Owns the canonical collection per entity type            │
//! │  • Generation-tagged single-flight bulk loads               │
//! │  • CRUD through the optimistic mutation engine              │
//! └──────────┬─────────────────────┬────────────────────────────┘
//!            │                     │
//!            ▼                     ▼
//! ┌─────────────────────┐ ┌───────────────────────────────────┐
//! │   Retry Executor    │ │     Optimistic Mutation Engine    │
//! │ • Backoff + jitter  │ │ • Apply now, confirm or roll back │
//! │ • Timeout, cancel   │ │ • Per-id mutation serialization   │
//! └──────────┬──────────┘ └───────────────┬───────────────────┘
//!            │                            │
//!            ▼                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              RecordStore (HTTP / in-memory)                 │
//! └─────────────────────────────────────────────────────────────┘
//!
//!   Cache Invalidation Bus: detail edits fan out to every list
//!   controller holding the entity, no extra round-trip.
//!   Periodic Resync Scheduler: interval refresh, skip-if-busy.
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use record_sync::{
//!     EntityKind, HttpRecordStore, InvalidationBus, ListController, NoticeHub,
//!     ResyncScheduler, SyncConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig {
//!         base_url: "https://crm.example.com".into(),
//!         ..Default::default()
//!     };
//!
//!     let store = Arc::new(HttpRecordStore::new(
//!         config.base_url.parse().expect("valid base url"),
//!         config.cache_mode,
//!     ));
//!     let bus = Arc::new(InvalidationBus::new());
//!     let notices = NoticeHub::default();
//!
//!     let leads = ListController::new(EntityKind::Leads, store, bus, notices, &config);
//!     tokio::spawn({
//!         let leads = leads.clone();
//!         async move { leads.run().await }
//!     });
//!     leads.refresh().await;
//!
//!     let scheduler = ResyncScheduler::from_config(&config);
//!     scheduler.register("leads", "leads list", leads.clone(), config.resync_interval());
//!
//!     for lead in leads.items() {
//!         println!("{}", lead.id);
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Optimistic Mutations**: zero-latency local apply with mandatory
//!   rollback on remote failure
//! - **Retry with Backoff**: bounded exponential backoff with jitter and
//!   per-attempt timeouts
//! - **Single-Flight Loads**: a newer bulk load supersedes and silently
//!   discards a stale one
//! - **Invalidation Fan-Out**: confirmed edits propagate across
//!   controllers without refetching
//! - **Periodic Resync**: polling freshness loop with skip-if-busy and
//!   failure cooldown
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`controller`]: the per-entity [`ListController`]
//! - [`resilience`]: retry executor and policies
//! - [`optimistic`]: the mutation engine
//! - [`bus`]: the cache invalidation bus
//! - [`scheduler`]: periodic resync
//! - [`remote`]: the record-store trait and its HTTP implementation

pub mod bus;
pub mod config;
pub mod controller;
pub mod filter;
pub mod metrics;
pub mod notice;
pub mod optimistic;
pub mod record;
pub mod remote;
pub mod resilience;
pub mod scheduler;

pub use bus::{InvalidationBus, InvalidationEvent, Subscription};
pub use config::{CacheMode, SyncConfig};
pub use controller::{ListController, ListState};
pub use filter::{FilterSet, SortDirection};
pub use notice::{Notice, NoticeHub, NoticeLevel};
pub use optimistic::{MutationDescriptor, MutationEngine, MutationKind, MutationOutcome};
pub use record::{EntityKind, Record, RecordId, TempId};
pub use remote::{BulkDeleteOutcome, HttpRecordStore, ListPage, RecordStore, RemoteError};
pub use resilience::{FetchState, RetryExecutor, RetryPolicy};
pub use scheduler::{ResyncScheduler, ResyncTarget, TargetStats};
