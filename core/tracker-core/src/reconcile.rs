//! Reconciliation engine.
//!
//! One call = one telemetry fetch, one history read, at most one insert. The
//! result is a [`Snapshot`] whose `history` is the stored trail, extended with
//! the live point when the asset moved (persisted or not) or when nothing was
//! stored yet. When the asset has not moved, the live point is reported only
//! through `current`; renderers merge the two (see [`Snapshot::trail`]).

use locotrack_daemon_protocol::{HistoryEntry, HistoryRecord, Snapshot, TelemetryPoint};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackError};
use crate::movement::MovementPolicy;
use crate::session::SnapshotProvider;
use crate::store::HistoryStore;
use crate::telemetry::{latest_row, parse_row, TelemetrySource};

pub struct ReconciliationEngine<S, H> {
    source: S,
    store: H,
    policy: MovementPolicy,
}

impl<S: TelemetrySource, H: HistoryStore> ReconciliationEngine<S, H> {
    pub fn new(source: S, store: H, policy: MovementPolicy) -> Self {
        Self {
            source,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> MovementPolicy {
        self.policy
    }

    pub fn store(&self) -> &H {
        &self.store
    }

    pub fn reconcile(&self, asset_id: &str) -> Result<Snapshot> {
        let asset_id = asset_id.trim();
        if asset_id.is_empty() {
            return Err(TrackError::InvalidRequest(
                "asset_id is required".to_string(),
            ));
        }

        let raw = self.source.fetch(asset_id)?;
        let current = parse_row(latest_row(&raw, asset_id)?)?;

        let stored = match self.store.list_ascending(asset_id) {
            Ok(records) => records,
            Err(err) => {
                // Without the stored trail we cannot judge movement, so skip
                // the insert and serve the live point alone.
                warn!(
                    asset_id = %asset_id,
                    error = %err,
                    "History unavailable; serving live point only"
                );
                return Ok(Snapshot {
                    history: vec![HistoryEntry::Live(current.clone())],
                    current,
                });
            }
        };

        let last = stored.last().map(|record| &record.point.position);
        let moved = self.policy.has_moved(last, &current.position);
        let inserted = if moved {
            self.persist(asset_id, &current)
        } else {
            None
        };

        debug!(
            asset_id = %asset_id,
            stored = stored.len(),
            moved,
            persisted = inserted.is_some(),
            "Reconciled telemetry"
        );

        Ok(assemble_snapshot(current, stored, moved, inserted))
    }

    fn persist(&self, asset_id: &str, point: &TelemetryPoint) -> Option<HistoryRecord> {
        match self.store.insert(asset_id, point) {
            Ok(record) => {
                info!(
                    asset_id = %asset_id,
                    lat = record.point.position.lat,
                    lng = record.point.position.lng,
                    station = %record.point.station,
                    "Recorded new position"
                );
                Some(record)
            }
            Err(err) => {
                warn!(
                    asset_id = %asset_id,
                    error = %err,
                    "Failed to persist position; continuing with in-memory point"
                );
                None
            }
        }
    }
}

/// Builds the returned history: stored records oldest first, then the current
/// point. It is the stored record when the insert succeeded, and an in-memory
/// entry when the asset moved but the insert failed or the store was empty.
/// An idle poll on a non-empty trail leaves the point in `current` only.
fn assemble_snapshot(
    current: TelemetryPoint,
    stored: Vec<HistoryRecord>,
    moved: bool,
    inserted: Option<HistoryRecord>,
) -> Snapshot {
    let stored_was_empty = stored.is_empty();
    let mut history: Vec<HistoryEntry> = stored.into_iter().map(HistoryEntry::Stored).collect();

    match inserted {
        Some(record) => history.push(HistoryEntry::Stored(record)),
        None if moved || stored_was_empty => history.push(HistoryEntry::Live(current.clone())),
        None => {}
    }

    Snapshot { current, history }
}

impl<S, H> SnapshotProvider for ReconciliationEngine<S, H>
where
    S: TelemetrySource + 'static,
    H: HistoryStore + 'static,
{
    fn fetch_snapshot(&self, asset_id: &str) -> Result<Snapshot> {
        self.reconcile(asset_id)
    }
}
