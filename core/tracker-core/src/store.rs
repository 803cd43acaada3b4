//! History store capability consumed by the reconciliation engine.

use chrono::Duration;
use locotrack_daemon_protocol::{HistoryRecord, TelemetryPoint};
use std::sync::Arc;

use crate::error::Result;

/// Default retention window for stored points.
pub const DEFAULT_RETENTION_HOURS: i64 = 6;

pub fn default_retention() -> Duration {
    Duration::hours(DEFAULT_RETENTION_HOURS)
}

/// Time-ordered, auto-expiring point store.
///
/// Records older than the retention window must not be returned by
/// `list_ascending`; when they are physically removed is up to the
/// implementation. Both operations report failures as
/// [`TrackError::StoreUnavailable`](crate::TrackError::StoreUnavailable).
pub trait HistoryStore: Send + Sync {
    /// Records for `asset_id`, oldest first. Empty when none are retained.
    fn list_ascending(&self, asset_id: &str) -> Result<Vec<HistoryRecord>>;

    /// Persists `point` and returns the stored record with its creation time.
    fn insert(&self, asset_id: &str, point: &TelemetryPoint) -> Result<HistoryRecord>;
}

impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    fn list_ascending(&self, asset_id: &str) -> Result<Vec<HistoryRecord>> {
        (**self).list_ascending(asset_id)
    }

    fn insert(&self, asset_id: &str, point: &TelemetryPoint) -> Result<HistoryRecord> {
        (**self).insert(asset_id, point)
    }
}
