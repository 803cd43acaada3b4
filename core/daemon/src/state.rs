//! Shared state managed by the daemon.
//!
//! Wraps the reconciliation engine so every connection thread goes through a
//! single writer: reconciliations are serialized, which keeps "read history,
//! maybe insert" atomic with respect to other clients of the same daemon.

use locotrack_core::{ReconciliationEngine, Snapshot, TelemetrySource};
use reqwest::Url;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{DaemonConfig, ASSET_ID_PLACEHOLDER};
use crate::db::Db;

pub struct SharedState<S: TelemetrySource> {
    engine: ReconciliationEngine<S, Arc<Db>>,
    config: DaemonConfig,
    writer: Mutex<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub retention_hours: i64,
    pub prune_interval_secs: u64,
    pub epsilon_degrees: f64,
    pub telemetry_timeout_secs: u64,
    pub telemetry_host: Option<String>,
}

impl<S: TelemetrySource> SharedState<S> {
    pub fn new(source: S, db: Db, config: DaemonConfig) -> Self {
        let engine = ReconciliationEngine::new(source, Arc::new(db), config.movement);
        Self {
            engine,
            config,
            writer: Mutex::new(()),
        }
    }

    pub fn snapshot(&self, asset_id: &str) -> locotrack_core::Result<Snapshot> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.engine.reconcile(asset_id)
    }

    pub fn prune_expired(&self) -> Result<usize, String> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.engine.store().prune_expired()
    }

    pub fn config_summary(&self) -> ConfigSummary {
        ConfigSummary {
            retention_hours: self.engine.store().retention().num_hours(),
            prune_interval_secs: self.config.history.prune_interval_secs,
            epsilon_degrees: self.engine.policy().epsilon_degrees,
            telemetry_timeout_secs: self.config.telemetry.timeout_secs,
            telemetry_host: endpoint_host(&self.config.telemetry.endpoint),
        }
    }

    pub fn prune_interval_secs(&self) -> u64 {
        self.config.history.prune_interval_secs
    }
}

/// Host (and non-default port) of the endpoint template, without scheme,
/// path or credentials.
fn endpoint_host(endpoint: &str) -> Option<String> {
    let url = Url::parse(&endpoint.replace(ASSET_ID_PLACEHOLDER, "0")).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
