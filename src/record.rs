//! Record data structures.
//!
//! The [`Record`] is the core data unit that flows through the sync layer.
//! Beyond `id` and `created_time`, a record is an untyped attribute bag:
//! the sync layer never interprets domain fields, it only moves them.
//!
//! # Example
//!
//! ```
//! use record_sync::{Record, RecordId};
//! use serde_json::json;
//!
//! let record = Record::committed(
//!     "rec0a1b2c3",
//!     [("Name".to_string(), json!("Mario Rossi"))].into_iter().collect(),
//! );
//!
//! assert_eq!(record.id, RecordId::Committed("rec0a1b2c3".into()));
//! assert_eq!(record.field("Name"), Some(&json!("Mario Rossi")));
//! ```

use serde_json::{Map, Value};
use uuid::Uuid;

/// Entity types served by the remote record store.
///
/// Each kind maps to one REST collection and carries the singular key used
/// by mutation response envelopes (`{ success, lead: {...} }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Leads,
    Activities,
    Products,
    Orders,
    ProductVariants,
}

impl EntityKind {
    /// REST path segment under `/api/`.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Leads => "leads",
            Self::Activities => "activities",
            Self::Products => "products",
            Self::Orders => "orders",
            Self::ProductVariants => "product-variants",
        }
    }

    /// Singular envelope key in mutation responses.
    #[must_use]
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Leads => "lead",
            Self::Activities => "activity",
            Self::Products => "product",
            Self::Orders => "order",
            Self::ProductVariants => "variant",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Correlation token for an optimistically created record.
///
/// A `TempId` identifies the local placeholder between optimistic insert
/// and server confirmation. Correlation is by token equality, never by
/// string-prefix convention on the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(Uuid);

impl TempId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pending-{}", self.0)
    }
}

/// Identity of a record in a canonical collection.
///
/// `Committed` ids come from the server. `Pending` ids exist only locally,
/// between an optimistic create and its confirmation, and can never collide
/// with a committed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Committed(String),
    Pending(TempId),
}

impl RecordId {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The server-assigned id, if this record has been committed.
    #[must_use]
    pub fn as_committed(&self) -> Option<&str> {
        match self {
            Self::Committed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    /// True when this is the committed id `id`.
    #[must_use]
    pub fn is(&self, id: &str) -> bool {
        self.as_committed() == Some(id)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed(id) => write!(f, "{}", id),
            Self::Pending(temp) => write!(f, "{}", temp),
        }
    }
}

/// A single entity record: stable identity plus an opaque field bag.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    /// Server-reported creation timestamp (ISO-8601), absent on placeholders.
    pub created_time: Option<String>,
    pub fields: Map<String, Value>,
}

impl Record {
    /// A record with a server-assigned id.
    #[must_use]
    pub fn committed(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: RecordId::Committed(id.into()),
            created_time: None,
            fields,
        }
    }

    /// A local placeholder awaiting server confirmation.
    #[must_use]
    pub fn placeholder(temp: TempId, fields: Map<String, Value>) -> Self {
        Self {
            id: RecordId::Pending(temp),
            created_time: None,
            fields,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Shallow-merge a field patch into this record, overwriting collisions.
    pub fn merge_fields(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}
