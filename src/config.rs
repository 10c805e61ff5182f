//! Configuration for the sync layer.
//!
//! # Example
//!
//! ```
//! use record_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.bulk_load_timeout_ms, 20_000);
//!
//! // Full config
//! let config = SyncConfig {
//!     base_url: "https://crm.example.com".into(),
//!     resync_interval_ms: 15_000,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use std::time::Duration;

/// How bulk loads interact with HTTP caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Append cache-busting parameters and send `Cache-Control: no-store`;
    /// every load hits the origin.
    #[default]
    AlwaysFresh,
    /// Let the HTTP layer serve stale-but-valid cached responses.
    Smart,
}

/// Configuration for the sync layer.
///
/// All fields have sensible defaults. At minimum, you should configure
/// `base_url` for production use.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Record-store origin (e.g. "https://crm.example.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bulk-load cache behavior
    #[serde(default)]
    pub cache_mode: CacheMode,

    /// Retry budget for bulk loads (initial attempt excluded)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff delay cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-attempt timeout for bulk loads (heavier payloads)
    #[serde(default = "default_bulk_load_timeout_ms")]
    pub bulk_load_timeout_ms: u64,

    /// Timeout for a single mutation round-trip
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,

    /// Periodic resync cadence
    #[serde(default = "default_resync_interval_ms")]
    pub resync_interval_ms: u64,

    /// Consecutive resync failures before a target is put in cooldown
    #[serde(default = "default_resync_error_threshold")]
    pub resync_error_threshold: u32,

    /// Cooldown before a failing resync target is re-enabled
    #[serde(default = "default_resync_cooldown_ms")]
    pub resync_cooldown_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_bulk_load_timeout_ms() -> u64 {
    20_000
}
fn default_mutation_timeout_ms() -> u64 {
    15_000
}
fn default_resync_interval_ms() -> u64 {
    30_000
}
fn default_resync_error_threshold() -> u32 {
    3
}
fn default_resync_cooldown_ms() -> u64 {
    120_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_mode: CacheMode::default(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            bulk_load_timeout_ms: default_bulk_load_timeout_ms(),
            mutation_timeout_ms: default_mutation_timeout_ms(),
            resync_interval_ms: default_resync_interval_ms(),
            resync_error_threshold: default_resync_error_threshold(),
            resync_cooldown_ms: default_resync_cooldown_ms(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    #[must_use]
    pub fn resync_cooldown(&self) -> Duration {
        Duration::from_millis(self.resync_cooldown_ms)
    }
}
