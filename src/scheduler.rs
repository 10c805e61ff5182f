// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Periodic resync scheduler.
//!
//! Timer-driven background refresh standing in for a push channel: each
//! registered target is re-synced every `interval`, with a skip-if-busy
//! guard so a tick never piles a second load onto one already in flight.
//! A target that fails several ticks in a row is put in cooldown and
//! re-enabled afterwards with a clean error count.
//!
//! Targets register independently keyed by id; the only cross-target
//! coordination is pause/resume, which maps the host UI's hidden/visible
//! signal. Resuming triggers an immediate sync pass.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::remote::RemoteError;

/// Something the scheduler can refresh periodically.
#[async_trait]
pub trait ResyncTarget: Send + Sync {
    /// A refresh is already in flight; the tick will be skipped.
    fn is_busy(&self) -> bool;

    async fn resync(&self) -> Result<(), RemoteError>;
}

/// Per-target snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct TargetStats {
    pub id: String,
    pub name: String,
    /// False while the target sits in error cooldown.
    pub enabled: bool,
    pub consecutive_errors: u32,
    pub last_sync: Option<Instant>,
}

struct TargetShared {
    name: String,
    enabled: AtomicBool,
    consecutive_errors: AtomicU32,
    last_sync: Mutex<Option<Instant>>,
}

struct TargetEntry {
    shared: Arc<TargetShared>,
    handle: JoinHandle<()>,
}

/// Interval-driven refresh loop over registered [`ResyncTarget`]s.
pub struct ResyncScheduler {
    targets: DashMap<String, TargetEntry>,
    paused: watch::Sender<bool>,
    error_threshold: u32,
    cooldown: Duration,
}

impl ResyncScheduler {
    #[must_use]
    pub fn new(error_threshold: u32, cooldown: Duration) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            targets: DashMap::new(),
            paused,
            error_threshold,
            cooldown,
        }
    }

    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.resync_error_threshold, config.resync_cooldown())
    }

    /// Register `target` for a resync every `interval`. Re-registering an
    /// id replaces (and stops) the previous registration.
    pub fn register(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        target: Arc<dyn ResyncTarget>,
        interval: Duration,
    ) {
        let id = id.into();
        let name = name.into();
        info!(id = %id, name = %name, interval_ms = interval.as_millis() as u64, "registering resync target");

        let shared = Arc::new(TargetShared {
            name: name.clone(),
            enabled: AtomicBool::new(true),
            consecutive_errors: AtomicU32::new(0),
            last_sync: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run_target(
            name,
            target,
            interval,
            shared.clone(),
            self.paused.subscribe(),
            self.error_threshold,
            self.cooldown,
        ));

        if let Some(previous) = self.targets.insert(id, TargetEntry { shared, handle }) {
            previous.handle.abort();
        }
    }

    /// Stop and remove one target.
    pub fn unregister(&self, id: &str) {
        if let Some((_, entry)) = self.targets.remove(id) {
            debug!(id = %id, "unregistering resync target");
            entry.handle.abort();
        }
    }

    /// Suspend all ticks (document hidden, network offline).
    pub fn pause_all(&self) {
        info!("pausing periodic resync");
        let _ = self.paused.send(true);
    }

    /// Resume ticking; every non-busy target syncs immediately.
    pub fn resume_all(&self) {
        info!("resuming periodic resync");
        let _ = self.paused.send(false);
    }

    #[must_use]
    pub fn stats(&self) -> Vec<TargetStats> {
        self.targets
            .iter()
            .map(|entry| TargetStats {
                id: entry.key().clone(),
                name: entry.value().shared.name.clone(),
                enabled: entry.value().shared.enabled.load(Ordering::Acquire),
                consecutive_errors: entry.value().shared.consecutive_errors.load(Ordering::Acquire),
                last_sync: *entry.value().shared.last_sync.lock(),
            })
            .collect()
    }

    async fn run_target(
        name: String,
        target: Arc<dyn ResyncTarget>,
        interval: Duration,
        shared: Arc<TargetShared>,
        mut paused: watch::Receiver<bool>,
        error_threshold: u32,
        cooldown: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately; swallow that first tick so the
        // cadence starts one interval after registration.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *paused.borrow() {
                        crate::metrics::record_resync_tick(&name, "skipped");
                        continue;
                    }
                    Self::sync_once(&name, target.as_ref(), &shared, error_threshold, cooldown).await;
                }
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*paused.borrow_and_update() {
                        // Back from hidden/offline: sync now, don't wait a
                        // full interval.
                        Self::sync_once(&name, target.as_ref(), &shared, error_threshold, cooldown).await;
                    }
                }
            }
        }
    }

    async fn sync_once(
        name: &str,
        target: &dyn ResyncTarget,
        shared: &TargetShared,
        error_threshold: u32,
        cooldown: Duration,
    ) {
        if target.is_busy() {
            debug!(target = %name, "resync tick skipped, refresh already in flight");
            crate::metrics::record_resync_tick(name, "skipped");
            return;
        }

        let started = Instant::now();
        match target.resync().await {
            Ok(()) => {
                shared.consecutive_errors.store(0, Ordering::Release);
                *shared.last_sync.lock() = Some(Instant::now());
                crate::metrics::record_resync_tick(name, "success");
                debug!(target = %name, elapsed_ms = started.elapsed().as_millis() as u64, "resync ok");
            }
            Err(error) => {
                let errors = shared.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                crate::metrics::record_resync_tick(name, "error");
                warn!(target = %name, error = %error, consecutive = errors, "resync failed");

                if errors >= error_threshold {
                    warn!(
                        target = %name,
                        cooldown_ms = cooldown.as_millis() as u64,
                        "resync target entering cooldown"
                    );
                    shared.enabled.store(false, Ordering::Release);
                    tokio::time::sleep(cooldown).await;
                    shared.consecutive_errors.store(0, Ordering::Release);
                    shared.enabled.store(true, Ordering::Release);
                    info!(target = %name, "resync target re-enabled after cooldown");
                }
            }
        }
    }
}

impl Drop for ResyncScheduler {
    fn drop(&mut self) {
        for entry in self.targets.iter() {
            entry.value().handle.abort();
        }
    }
}
