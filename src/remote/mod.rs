//! Remote record-store boundary.
//!
//! The sync layer talks to the record store through the [`RecordStore`]
//! trait; [`HttpRecordStore`] is the production implementation over the
//! REST dialect, tests substitute in-memory stores.

pub mod http;
pub mod traits;

pub use http::HttpRecordStore;
pub use traits::{BulkDeleteOutcome, ListPage, RecordStore, RemoteError};
