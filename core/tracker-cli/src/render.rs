//! Plain-text rendering of snapshots and session state for the terminal.

use locotrack_core::{HistoryEntry, SessionStatus, Snapshot, TrackingSession};
use std::fmt::Write;

pub fn snapshot_text(asset_id: &str, snapshot: &Snapshot) -> String {
    let current = &snapshot.current;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} at {:.5}, {:.5} | station: {} | event: {} | speed: {}",
        asset_id,
        current.position.lat,
        current.position.lng,
        current.station,
        current.event,
        current.speed
    );

    let stored = snapshot.history.iter().filter(|entry| entry.is_stored()).count();
    let _ = writeln!(
        out,
        "trail: {} point(s), {} stored",
        snapshot.trail().len(),
        stored
    );
    for entry in &snapshot.history {
        let _ = writeln!(out, "  {}", history_line(entry));
    }
    out
}

fn history_line(entry: &HistoryEntry) -> String {
    let point = entry.point();
    let when = match entry {
        HistoryEntry::Stored(record) => record.created_at.format("%H:%M:%S").to_string(),
        HistoryEntry::Live(_) => "live".to_string(),
    };
    format!(
        "{:>8}  {:.5}, {:.5}  {}",
        when, point.position.lat, point.position.lng, point.station
    )
}

pub fn session_text(session: &TrackingSession) -> String {
    let asset_id = session.asset_id.as_deref().unwrap_or("-");
    match (&session.status, &session.last_snapshot) {
        (SessionStatus::Idle, _) => "tracking stopped".to_string(),
        (SessionStatus::Active, None) => format!("tracking {}...", asset_id),
        (SessionStatus::Active, Some(snapshot)) => snapshot_text(asset_id, snapshot),
        (SessionStatus::Error(message), _) => {
            format!("tracking {} failed: {} (type `start` to retry)", asset_id, message)
        }
    }
}
