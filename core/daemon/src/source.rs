//! HTTP telemetry source backed by a blocking reqwest client.

use locotrack_core::{RawTelemetry, TelemetrySource, TrackError};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::config::{TelemetryConfig, ASSET_ID_PLACEHOLDER};

const USER_AGENT: &str = concat!("locotrack-daemon/", env!("CARGO_PKG_VERSION"));
// Stands in for `{asset_id}` while the template is parsed, since braces would
// otherwise be percent-encoded by the URL parser.
const ASSET_ID_MARKER: &str = "locotrack-asset-id";

#[derive(Clone)]
pub struct HttpTelemetrySource {
    client: reqwest::blocking::Client,
    template: Url,
}

impl HttpTelemetrySource {
    pub fn new(config: &TelemetryConfig) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| format!("Failed to create HTTP client: {}", err))?;

        let template = Url::parse(&config.endpoint.replace(ASSET_ID_PLACEHOLDER, ASSET_ID_MARKER))
            .map_err(|err| format!("Invalid telemetry endpoint {}: {}", config.endpoint, err))?;
        if template.cannot_be_a_base() {
            return Err(format!(
                "Invalid telemetry endpoint {}: not a hierarchical URL",
                config.endpoint
            ));
        }

        Ok(Self { client, template })
    }

    /// Substitutes the asset id into the template, encoded as a path segment
    /// in the path and as a form value in the query.
    fn url_for(&self, asset_id: &str) -> Result<Url, TrackError> {
        let mut scratch = self.template.clone();
        scratch
            .path_segments_mut()
            .map_err(|_| {
                TrackError::TelemetryUnavailable("telemetry endpoint has no path".to_string())
            })?
            .clear()
            .push(asset_id);
        let in_path = scratch.path().trim_start_matches('/').to_string();
        scratch.query_pairs_mut().clear().append_pair("v", asset_id);
        let in_query = scratch
            .query()
            .and_then(|query| query.strip_prefix("v="))
            .unwrap_or_default()
            .to_string();

        let mut url = self.template.clone();
        let path = url.path().replace(ASSET_ID_MARKER, &in_path);
        url.set_path(&path);
        if let Some(query) = url
            .query()
            .map(|query| query.replace(ASSET_ID_MARKER, &in_query))
        {
            url.set_query(Some(&query));
        }
        Ok(url)
    }
}

impl TelemetrySource for HttpTelemetrySource {
    fn fetch(&self, asset_id: &str) -> locotrack_core::Result<RawTelemetry> {
        let url = self.url_for(asset_id)?;
        debug!(asset_id = %asset_id, url = %url, "Fetching telemetry");

        let response = self.client.get(url).send().map_err(|err| {
            if err.is_timeout() {
                TrackError::TelemetryUnavailable(format!("telemetry request timed out: {}", err))
            } else {
                TrackError::TelemetryUnavailable(format!("telemetry request failed: {}", err))
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TrackError::AssetNotFound(format!(
                "telemetry source has no record of {}",
                asset_id
            )));
        }
        if !status.is_success() {
            return Err(TrackError::TelemetryUnavailable(format!(
                "telemetry source returned {}",
                status
            )));
        }

        let body = response.bytes().map_err(|err| {
            TrackError::TelemetryUnavailable(format!("failed to read telemetry body: {}", err))
        })?;
        RawTelemetry::from_slice(&body)
    }
}
