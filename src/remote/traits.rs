use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::filter::FilterSet;
use crate::record::{EntityKind, Record};

/// Failure taxonomy for remote record-store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the failure is worth retrying.
    ///
    /// Connection-level failures, timeouts, 5xx and 429 are transient;
    /// other 4xx (validation rejections) and malformed responses are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Cancelled => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// One page of a bulk load. `load_all` semantics mean this is the whole
/// filtered result, not a cursor page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage {
    pub records: Vec<Record>,
    /// Set when the server answered from its cache layer.
    pub from_cache: bool,
}

/// Outcome of a bulk delete. `deleted < requested` signals partial failure;
/// only `deleted_ids` may be dropped from local state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulkDeleteOutcome {
    pub requested: usize,
    pub deleted: usize,
    pub deleted_ids: Vec<String>,
    pub errors: Vec<String>,
}

impl BulkDeleteOutcome {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.deleted < self.requested
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load every record matching `filters`, server-sorted.
    async fn list(&self, entity: EntityKind, filters: &FilterSet) -> Result<ListPage, RemoteError>;

    /// Create a record; returns the server-canonical record (with its
    /// assigned id), which replaces any local placeholder.
    async fn create(
        &self,
        entity: EntityKind,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError>;

    /// Partially update a record; returns server truth for the record.
    async fn update(
        &self,
        entity: EntityKind,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError>;

    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), RemoteError>;

    async fn delete_many(
        &self,
        entity: EntityKind,
        ids: &[String],
    ) -> Result<BulkDeleteOutcome, RemoteError>;
}
