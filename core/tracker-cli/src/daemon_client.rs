//! Socket client for the locotrack daemon.
//!
//! The daemon owns the history store; the CLI only asks it for snapshots. A
//! failed connect is retried once after a short delay. Once a request has
//! been written it is never resent, since a second snapshot request would run
//! a second reconciliation. Failures surface as `TelemetryUnavailable` so the
//! session treats them like any other failed poll.

use chrono::Utc;
use locotrack_core::{Snapshot, SnapshotProvider, TrackError};
use locotrack_daemon_protocol::{
    Method, Request, Response, SnapshotParams, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SOCKET_ENV: &str = "LOCOTRACK_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
// Must outlast the daemon's own upstream timeout.
const READ_TIMEOUT_MS: u64 = 15_000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn from_env() -> Result<Self, String> {
        socket_path(env::var(SOCKET_ENV).ok()).map(Self::new)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn health(&self) -> Result<Value, String> {
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        };

        let response = self.send_with_retry(&request, "health check")?;
        match response {
            Response {
                ok: true,
                data: Some(data),
                ..
            } => Ok(data),
            Response { error, .. } => Err(error
                .map(|err| format!("{}: {}", err.code, err.message))
                .unwrap_or_else(|| "Unknown daemon error".to_string())),
        }
    }

    fn send_with_retry(&self, request: &Request, label: &str) -> Result<Response, String> {
        let mut stream = match connect(&self.socket) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to connect for {}", label);
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                connect(&self.socket).map_err(|retry_err| {
                    tracing::warn!(
                        error = %retry_err,
                        "Retry failed connecting for {}",
                        label
                    );
                    retry_err
                })?
            }
        };
        exchange(&mut stream, request)
    }
}

impl SnapshotProvider for DaemonClient {
    fn fetch_snapshot(&self, asset_id: &str) -> locotrack_core::Result<Snapshot> {
        let params = serde_json::to_value(SnapshotParams::new(asset_id))
            .map_err(|err| TrackError::InvalidRequest(format!("bad params: {}", err)))?;
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetSnapshot,
            id: Some(make_request_id()),
            params: Some(params),
        };

        let response = self
            .send_with_retry(&request, "snapshot request")
            .map_err(TrackError::TelemetryUnavailable)?;
        decode_snapshot(response)
    }
}

fn decode_snapshot(response: Response) -> locotrack_core::Result<Snapshot> {
    if !response.ok {
        return Err(match response.error {
            Some(info) => TrackError::from_wire(&info),
            None => TrackError::TelemetryUnavailable("Unknown daemon error".to_string()),
        });
    }

    let data = response.data.ok_or_else(|| {
        TrackError::TelemetryUnavailable("daemon response carried no snapshot".to_string())
    })?;
    serde_json::from_value(data).map_err(|err| {
        TrackError::MalformedTelemetry(format!("daemon snapshot did not decode: {}", err))
    })
}

fn socket_path(override_path: Option<String>) -> Result<PathBuf, String> {
    if let Some(path) = override_path.filter(|path| !path.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".locotrack").join(SOCKET_NAME))
}

fn connect(socket: &Path) -> Result<UnixStream, String> {
    let stream = UnixStream::connect(socket)
        .map_err(|err| format!("Failed to connect to daemon socket: {}", err))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));
    Ok(stream)
}

fn exchange(stream: &mut UnixStream, request: &Request) -> Result<Response, String> {
    serde_json::to_writer(&mut *stream, request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

fn make_request_id() -> String {
    let rand = rand::thread_rng().next_u64();
    format!("req-{}-{}-{:x}", Utc::now().timestamp_millis(), std::process::id(), rand)
}
