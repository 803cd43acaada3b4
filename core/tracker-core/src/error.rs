//! Error taxonomy for tracking operations.
//! Wire codes are part of the daemon contract; keep them stable.

use locotrack_daemon_protocol::{ErrorInfo, STATUS_BAD_REQUEST, STATUS_INTERNAL, STATUS_NOT_FOUND};

/// Every failure a reconciliation or tracking session can surface.
///
/// Parser and store errors are normalized into one of these kinds at the
/// engine boundary, so callers only ever match on this enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    /// Missing or empty asset id. The caller must correct the request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The telemetry source has no rows for this asset.
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    /// Upstream fetch failed or timed out.
    #[error("Telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// Persistence failure. Non-fatal during reconciliation.
    #[error("History store unavailable: {0}")]
    StoreUnavailable(String),

    /// The provider payload did not have the expected shape.
    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(String),
}

impl TrackError {
    pub fn code(&self) -> &'static str {
        match self {
            TrackError::InvalidRequest(_) => "invalid_request",
            TrackError::AssetNotFound(_) => "asset_not_found",
            TrackError::TelemetryUnavailable(_) => "telemetry_unavailable",
            TrackError::StoreUnavailable(_) => "store_unavailable",
            TrackError::MalformedTelemetry(_) => "malformed_telemetry",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            TrackError::InvalidRequest(_) => STATUS_BAD_REQUEST,
            TrackError::AssetNotFound(_) => STATUS_NOT_FOUND,
            TrackError::TelemetryUnavailable(_)
            | TrackError::StoreUnavailable(_)
            | TrackError::MalformedTelemetry(_) => STATUS_INTERNAL,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            TrackError::InvalidRequest(detail)
            | TrackError::AssetNotFound(detail)
            | TrackError::TelemetryUnavailable(detail)
            | TrackError::StoreUnavailable(detail)
            | TrackError::MalformedTelemetry(detail) => detail,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::with_status(self.status(), self.code(), self.detail())
    }

    /// Rebuilds an error from its wire form. Unknown codes fall back on the
    /// status class so clients still halt with a sensible kind.
    pub fn from_wire(info: &ErrorInfo) -> Self {
        let detail = info.message.clone();
        match info.code.as_str() {
            "invalid_request" => TrackError::InvalidRequest(detail),
            "asset_not_found" => TrackError::AssetNotFound(detail),
            "telemetry_unavailable" => TrackError::TelemetryUnavailable(detail),
            "store_unavailable" => TrackError::StoreUnavailable(detail),
            "malformed_telemetry" => TrackError::MalformedTelemetry(detail),
            other => {
                let detail = format!("{}: {}", other, info.message);
                match info.status {
                    STATUS_BAD_REQUEST => TrackError::InvalidRequest(detail),
                    STATUS_NOT_FOUND => TrackError::AssetNotFound(detail),
                    _ => TrackError::TelemetryUnavailable(detail),
                }
            }
        }
    }
}

/// Convenience type alias for Results using TrackError.
pub type Result<T> = std::result::Result<T, TrackError>;

impl From<TrackError> for String {
    fn from(err: TrackError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(TrackError::InvalidRequest("x".into()).status(), 400);
        assert_eq!(TrackError::AssetNotFound("x".into()).status(), 404);
        assert_eq!(TrackError::TelemetryUnavailable("x".into()).status(), 500);
        assert_eq!(TrackError::MalformedTelemetry("x".into()).status(), 500);
    }

    #[test]
    fn wire_form_survives_round_trip() {
        let original = TrackError::AssetNotFound("no rows for 12951".to_string());
        let info = original.to_error_info();
        assert_eq!(info.code, "asset_not_found");
        assert_eq!(info.status, 404);
        assert_eq!(TrackError::from_wire(&info), original);
    }

    #[test]
    fn unknown_codes_map_by_status() {
        let info = ErrorInfo::new("invalid_json", "request was not valid JSON");
        assert!(matches!(
            TrackError::from_wire(&info),
            TrackError::InvalidRequest(_)
        ));

        let info = ErrorInfo::with_status(500, "read_error", "boom");
        assert!(matches!(
            TrackError::from_wire(&info),
            TrackError::TelemetryUnavailable(_)
        ));
    }
}
