//! Telemetry source capability and the provider payload parser.
//!
//! The provider answers with a row-count indicator and a list of detail rows.
//! Each row carries coordinate strings and a free-text annotation such as
//! `Station: NDLS<br>Event: Departed<br>Speed: 54 km/h`. Coordinates are
//! mandatory; annotation segments are best effort and fall back to `N/A`.

use locotrack_daemon_protocol::{Position, TelemetryPoint, NOT_AVAILABLE};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Result, TrackError};
use crate::patterns::{RE_ANNOTATION_LABEL, RE_MARKUP_TAG, RE_WHITESPACE_RUN};

/// Fetches the raw provider payload for one asset.
///
/// Implementations map transport failures and timeouts to
/// [`TrackError::TelemetryUnavailable`] and undecodable bodies to
/// [`TrackError::MalformedTelemetry`].
pub trait TelemetrySource: Send + Sync {
    fn fetch(&self, asset_id: &str) -> Result<RawTelemetry>;
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Arc<T> {
    fn fetch(&self, asset_id: &str) -> Result<RawTelemetry> {
        (**self).fetch(asset_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawTelemetry {
    #[serde(default, alias = "rowCount", alias = "total_rows", alias = "totalRows")]
    pub row_count: Option<Value>,
    #[serde(default, alias = "data", alias = "details")]
    pub rows: Vec<RawTelemetryRow>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawTelemetryRow {
    #[serde(default, alias = "latitude")]
    pub lat: Option<Value>,
    #[serde(default, alias = "longitude", alias = "lon")]
    pub lng: Option<Value>,
    #[serde(default, alias = "info", alias = "remarks")]
    pub annotation: Option<String>,
}

impl RawTelemetry {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| {
            TrackError::MalformedTelemetry(format!("provider payload is not valid JSON: {}", err))
        })
    }

    /// A one-row payload, the shape the provider returns for a live asset.
    pub fn single_row(lat: &str, lng: &str, annotation: &str) -> Self {
        Self {
            row_count: Some(Value::from(1)),
            rows: vec![RawTelemetryRow {
                lat: Some(Value::String(lat.to_string())),
                lng: Some(Value::String(lng.to_string())),
                annotation: Some(annotation.to_string()),
            }],
        }
    }

    pub fn empty() -> Self {
        Self {
            row_count: Some(Value::from(0)),
            rows: Vec::new(),
        }
    }

    /// The row-count indicator, accepting either a number or a numeric string.
    pub fn reported_row_count(&self) -> Option<u64> {
        match self.row_count.as_ref()? {
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Picks the row describing the asset's latest reading (the provider lists
/// newest first). Zero reported rows means the asset is unknown upstream.
pub fn latest_row<'a>(raw: &'a RawTelemetry, asset_id: &str) -> Result<&'a RawTelemetryRow> {
    let reported = raw.reported_row_count();
    if reported == Some(0) {
        return Err(TrackError::AssetNotFound(format!(
            "telemetry source reported no rows for {}",
            asset_id
        )));
    }

    match raw.rows.first() {
        Some(row) => Ok(row),
        None if reported.is_some() => Err(TrackError::MalformedTelemetry(format!(
            "telemetry source reported rows for {} but sent none",
            asset_id
        ))),
        None => Err(TrackError::AssetNotFound(format!(
            "telemetry source returned no rows for {}",
            asset_id
        ))),
    }
}

/// Normalizes one provider row into a [`TelemetryPoint`].
pub fn parse_row(row: &RawTelemetryRow) -> Result<TelemetryPoint> {
    let position = Position::new(
        parse_coordinate(row.lat.as_ref(), "lat")?,
        parse_coordinate(row.lng.as_ref(), "lng")?,
    );
    if !position.is_valid() {
        return Err(TrackError::MalformedTelemetry(format!(
            "coordinates out of range: {}, {}",
            position.lat, position.lng
        )));
    }

    let fields = row
        .annotation
        .as_deref()
        .map(parse_annotation)
        .unwrap_or_default();
    Ok(fields.into_point(position))
}

fn parse_coordinate(value: Option<&Value>, field: &str) -> Result<f64> {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite()).ok_or_else(|| {
        TrackError::MalformedTelemetry(format!("{} is missing or not numeric", field))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationFields {
    pub station: Option<String>,
    pub event: Option<String>,
    pub speed: Option<String>,
}

impl AnnotationFields {
    pub fn into_point(self, position: Position) -> TelemetryPoint {
        let or_na = |value: Option<String>| value.unwrap_or_else(|| NOT_AVAILABLE.to_string());
        TelemetryPoint {
            position,
            station: or_na(self.station),
            event: or_na(self.event),
            speed: or_na(self.speed),
        }
    }
}

/// Extracts labeled segments from a free-text annotation. Each field is found
/// independently; a missing or empty segment leaves that field unset. When a
/// label repeats, the first occurrence wins.
pub fn parse_annotation(text: &str) -> AnnotationFields {
    let cleaned = RE_MARKUP_TAG.replace_all(text, " ");
    let labels: Vec<(String, usize, usize)> = RE_ANNOTATION_LABEL
        .captures_iter(&cleaned)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            Some((name, whole.start(), whole.end()))
        })
        .collect();

    let mut fields = AnnotationFields::default();
    for (index, (name, _, value_start)) in labels.iter().enumerate() {
        let value_end = labels
            .get(index + 1)
            .map(|(_, next_start, _)| *next_start)
            .unwrap_or(cleaned.len());
        let value = clean_segment(&cleaned[*value_start..value_end]);

        let slot = match name.as_str() {
            "station" => &mut fields.station,
            "event" => &mut fields.event,
            "speed" => &mut fields.speed,
            _ => continue,
        };
        if slot.is_none() {
            *slot = value;
        }
    }
    fields
}

fn clean_segment(raw: &str) -> Option<String> {
    let collapsed = RE_WHITESPACE_RUN.replace_all(raw, " ");
    let trimmed = collapsed
        .trim()
        .trim_matches(|c: char| matches!(c, ',' | ';' | '|'))
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_row() {
        let raw = RawTelemetry::single_row(
            "28.6139",
            "77.2090",
            "Station: NEW DELHI (NDLS)<br>Event: Departed<br>Speed: 54 km/h",
        );
        let row = latest_row(&raw, "12951").unwrap();
        let point = parse_row(row).unwrap();

        assert_eq!(point.position, Position::new(28.6139, 77.2090));
        assert_eq!(point.station, "NEW DELHI (NDLS)");
        assert_eq!(point.event, "Departed");
        assert_eq!(point.speed, "54 km/h");
    }

    #[test]
    fn missing_segments_fall_back_to_sentinel() {
        let raw = RawTelemetry::single_row("28.61", "77.20", "Speed: 0 km/h");
        let point = parse_row(&raw.rows[0]).unwrap();
        assert_eq!(point.station, NOT_AVAILABLE);
        assert_eq!(point.event, NOT_AVAILABLE);
        assert_eq!(point.speed, "0 km/h");
    }

    #[test]
    fn missing_annotation_is_not_an_error() {
        let row = RawTelemetryRow {
            lat: Some(json!(28.61)),
            lng: Some(json!(77.2)),
            annotation: None,
        };
        let point = parse_row(&row).unwrap();
        assert_eq!(point.station, NOT_AVAILABLE);
        assert_eq!(point.position, Position::new(28.61, 77.2));
    }

    #[test]
    fn non_numeric_coordinates_are_malformed() {
        let raw = RawTelemetry::single_row("twenty-eight", "77.20", "Station: NDLS");
        let err = parse_row(&raw.rows[0]).unwrap_err();
        assert!(matches!(err, TrackError::MalformedTelemetry(_)));

        let row = RawTelemetryRow {
            lat: Some(json!("28.61")),
            lng: None,
            annotation: None,
        };
        assert!(matches!(
            parse_row(&row),
            Err(TrackError::MalformedTelemetry(_))
        ));
    }

    #[test]
    fn out_of_range_coordinates_are_malformed() {
        let raw = RawTelemetry::single_row("128.61", "77.20", "");
        assert!(matches!(
            parse_row(&raw.rows[0]),
            Err(TrackError::MalformedTelemetry(_))
        ));

        let raw = RawTelemetry::single_row("NaN", "77.20", "");
        assert!(matches!(
            parse_row(&raw.rows[0]),
            Err(TrackError::MalformedTelemetry(_))
        ));
    }

    #[test]
    fn zero_rows_is_asset_not_found() {
        let err = latest_row(&RawTelemetry::empty(), "99999").unwrap_err();
        assert!(matches!(err, TrackError::AssetNotFound(_)));

        let raw = RawTelemetry {
            row_count: Some(json!("0")),
            rows: Vec::new(),
        };
        assert!(matches!(
            latest_row(&raw, "99999"),
            Err(TrackError::AssetNotFound(_))
        ));
    }

    #[test]
    fn reported_rows_without_detail_is_malformed() {
        let raw = RawTelemetry {
            row_count: Some(json!(2)),
            rows: Vec::new(),
        };
        assert!(matches!(
            latest_row(&raw, "12951"),
            Err(TrackError::MalformedTelemetry(_))
        ));
    }

    #[test]
    fn decodes_provider_aliases() {
        let body = br#"{
            "rowCount": "1",
            "data": [
                { "latitude": "28.61", "longitude": "77.20", "info": "Event: Arrived" }
            ]
        }"#;
        let raw = RawTelemetry::from_slice(body).unwrap();
        assert_eq!(raw.reported_row_count(), Some(1));
        let point = parse_row(latest_row(&raw, "12951").unwrap()).unwrap();
        assert_eq!(point.event, "Arrived");
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            RawTelemetry::from_slice(b"<html>busy</html>"),
            Err(TrackError::MalformedTelemetry(_))
        ));
    }

    #[test]
    fn annotation_labels_are_case_insensitive_and_first_wins() {
        let fields =
            parse_annotation("STATION : Agra Cantt, event: Halted; Station: Mathura | speed:");
        assert_eq!(fields.station.as_deref(), Some("Agra Cantt"));
        assert_eq!(fields.event.as_deref(), Some("Halted"));
        assert_eq!(fields.speed, None);
    }

    #[test]
    fn annotation_without_labels_is_empty() {
        assert_eq!(
            parse_annotation("running late by 10 minutes"),
            AnnotationFields::default()
        );
    }
}
