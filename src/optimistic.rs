// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optimistic mutation engine.
//!
//! Applies a local state change immediately, performs the remote call in
//! the background, then either confirms with server-canonical data or
//! rolls the local change back. The engine never leaves a canonical
//! collection reflecting a failed remote operation: rollback is mandatory
//! and restores the pre-mutation snapshot exactly.
//!
//! Mutations targeting the same record id are serialized through a per-id
//! async lock, so a second edit applies only after the first has settled;
//! mutations on different records proceed independently. Bulk targets
//! lock their ids in sorted order.
//!
//! The engine is collection-agnostic: callers supply the apply, confirm,
//! and rollback closures over whatever state they own. No failure escapes
//! as an error - every call resolves to a [`MutationOutcome`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::notice::NoticeHub;
use crate::record::{EntityKind, RecordId};
use crate::remote::RemoteError;

/// What a mutation does, for logging and telemetry, never control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Identifies one mutation: its kind, entity type, and target record(s).
#[derive(Debug, Clone)]
pub struct MutationDescriptor {
    pub kind: MutationKind,
    pub entity: EntityKind,
    /// Records whose per-id locks this mutation holds while in flight.
    pub targets: Vec<RecordId>,
}

impl MutationDescriptor {
    #[must_use]
    pub fn single(kind: MutationKind, entity: EntityKind, target: RecordId) -> Self {
        Self { kind, entity, targets: vec![target] }
    }

    #[must_use]
    pub fn bulk(kind: MutationKind, entity: EntityKind, targets: Vec<RecordId>) -> Self {
        Self { kind, entity, targets }
    }
}

/// Settled result of an optimistic mutation.
#[derive(Debug, Clone)]
pub struct MutationOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<RemoteError>,
}

impl<T> MutationOutcome<T> {
    fn confirmed(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    fn rolled_back(error: RemoteError) -> Self {
        Self { success: false, data: None, error: Some(error) }
    }
}

type IdLock = Arc<Mutex<()>>;

/// Engine coordinating optimistic apply / remote call / confirm-or-rollback.
pub struct MutationEngine {
    locks: DashMap<(EntityKind, RecordId), IdLock>,
    timeout: Duration,
    notices: NoticeHub,
}

impl MutationEngine {
    #[must_use]
    pub fn new(timeout: Duration, notices: NoticeHub) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            notices,
        }
    }

    /// Run one optimistic mutation to settlement.
    ///
    /// 1. Acquire the per-id lock(s) for the descriptor's targets.
    /// 2. `apply_local` - the caller's collection reflects the change
    ///    immediately.
    /// 3. Await `perform_remote` under the mutation timeout.
    /// 4. Success: `confirm_local(&value)` replaces placeholder/merges
    ///    server truth. Failure (including timeout): `rollback_local()`
    ///    restores the exact pre-mutation state and the failure is
    ///    reported as a user-visible notice.
    pub async fn execute<T, Fut>(
        &self,
        descriptor: &MutationDescriptor,
        apply_local: impl FnOnce(),
        perform_remote: Fut,
        confirm_local: impl FnOnce(&T),
        rollback_local: impl FnOnce(),
    ) -> MutationOutcome<T>
    where
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let guards = self.lock_targets(descriptor).await;

        debug!(
            kind = %descriptor.kind,
            entity = %descriptor.entity,
            targets = descriptor.targets.len(),
            "applying optimistic mutation"
        );
        apply_local();

        let result = match tokio::time::timeout(self.timeout, perform_remote).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        let outcome = match result {
            Ok(value) => {
                confirm_local(&value);
                crate::metrics::record_operation(
                    descriptor.entity.path(),
                    &descriptor.kind.to_string(),
                    "success",
                );
                MutationOutcome::confirmed(value)
            }
            Err(error) => {
                rollback_local();
                warn!(
                    kind = %descriptor.kind,
                    entity = %descriptor.entity,
                    error = %error,
                    "remote mutation failed, local state rolled back"
                );
                crate::metrics::record_operation(
                    descriptor.entity.path(),
                    &descriptor.kind.to_string(),
                    "error",
                );
                crate::metrics::record_rollback(
                    descriptor.entity.path(),
                    &descriptor.kind.to_string(),
                );
                self.notices.error(format!(
                    "{} {} failed: {}",
                    descriptor.entity.singular(),
                    descriptor.kind,
                    error
                ));
                MutationOutcome::rolled_back(error)
            }
        };

        drop(guards);
        self.release_targets(descriptor);
        outcome
    }

    /// Lock every target id, in sorted order so two bulk mutations over
    /// overlapping id sets cannot deadlock.
    async fn lock_targets(&self, descriptor: &MutationDescriptor) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let mut ids = descriptor.targets.clone();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let lock = self
                .locks
                .entry((descriptor.entity, id))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Drop lock entries nobody is waiting on, keeping the map bounded by
    /// in-flight work rather than by every id ever touched.
    fn release_targets(&self, descriptor: &MutationDescriptor) {
        for id in &descriptor.targets {
            self.locks
                .remove_if(&(descriptor.entity, id.clone()), |_, lock| {
                    Arc::strong_count(lock) == 1
                });
        }
    }
}
