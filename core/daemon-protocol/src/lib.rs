//! IPC protocol types and validation for locotrack-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! It also carries the snapshot data model handed to rendering consumers, so
//! both ends agree on what a position, a stored record and a snapshot look like.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_ASSET_ID_LEN: usize = 64;

/// Placeholder for annotation fields the provider did not report.
pub const NOT_AVAILABLE: &str = "N/A";

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL: u16 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Error payload. `status` mirrors HTTP semantics: 400 for caller mistakes,
/// 404 when the asset has no data, 500 for upstream or internal failures.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self::with_status(STATUS_BAD_REQUEST, code, message)
    }

    pub fn with_status(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            status,
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self::error_with_info(id, ErrorInfo::new(code, message))
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotParams {
    #[serde(default)]
    pub asset_id: Option<String>,
}

impl SnapshotParams {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: Some(asset_id.into()),
        }
    }

    /// Returns the trimmed asset id, rejecting empty or oversized values.
    pub fn validate(&self) -> Result<&str, ErrorInfo> {
        let asset_id = self
            .asset_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ErrorInfo::new("invalid_request", "asset_id is required"))?;

        if asset_id.len() > MAX_ASSET_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_request",
                format!("asset_id must be {} characters or fewer", MAX_ASSET_ID_LEN),
            ));
        }

        Ok(asset_id)
    }
}

pub fn parse_snapshot_params(params: Value) -> Result<String, ErrorInfo> {
    let parsed: SnapshotParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_request",
            format!("snapshot params are invalid: {}", err),
        )
    })?;
    parsed.validate().map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot data model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TelemetryPoint {
    #[serde(flatten)]
    pub position: Position,
    pub station: String,
    pub event: String,
    pub speed: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryRecord {
    pub asset_id: String,
    #[serde(flatten)]
    pub point: TelemetryPoint,
    pub created_at: DateTime<Utc>,
}

/// One element of a snapshot's history: either a stored record or the live
/// point synthesized in memory when nothing was persisted for it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum HistoryEntry {
    Stored(HistoryRecord),
    Live(TelemetryPoint),
}

impl HistoryEntry {
    pub fn point(&self) -> &TelemetryPoint {
        match self {
            HistoryEntry::Stored(record) => &record.point,
            HistoryEntry::Live(point) => point,
        }
    }

    pub fn position(&self) -> Position {
        self.point().position
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, HistoryEntry::Stored(_))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub current: TelemetryPoint,
    pub history: Vec<HistoryEntry>,
}

impl Snapshot {
    /// Positions a renderer should draw, oldest first.
    ///
    /// `history` omits the live point when the asset has not moved since the
    /// last stored record, so `current` is appended here unless it coincides
    /// with the final history position.
    pub fn trail(&self) -> Vec<Position> {
        let mut trail: Vec<Position> = self.history.iter().map(HistoryEntry::position).collect();
        if trail.last() != Some(&self.current.position) {
            trail.push(self.current.position);
        }
        trail
    }
}
