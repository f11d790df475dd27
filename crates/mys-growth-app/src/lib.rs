//! Application layer for mys-growth.
//!
//! This crate wires the series model to a key-value backend and an upstream
//! source: the gated slot store, the refresh path, the read path with its
//! fallbacks, and the configuration shared by every host.

pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod read_service;
pub mod series_store;
pub mod source;
pub mod updater;

// Re-exports for convenience
pub use backend::{GitBackend, KvBackend, MemoryBackend};
pub use config::ServiceConfig;
pub use error::SeriesError;
pub use handlers::{handle_read, handle_scheduled};
pub use read_service::{RESPONSE_HEADERS, ReadResponse, ReadService, ReadSource};
pub use series_store::{
    BACKUP_PREFIX, DecodePolicy, LAST_GOOD_BACKUP_KEY, PRIMARY_KEY, RetentionPolicy,
    TimeSeriesStore, backup_instant, backup_key, trusted_series,
};
pub use source::{
    DEFAULT_ENDPOINT, HttpSource, MemberSource, REQUEST_CONTENT_TYPE, SourcePayload,
    coerce_member_count, fetch_latest_point,
};
pub use updater::{CommitOutcome, Updater};
