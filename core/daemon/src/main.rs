//! locotrack daemon entrypoint.
//!
//! A small, single-writer service that owns the position history. It listens
//! on a Unix socket for newline-delimited JSON requests, reconciles fresh
//! telemetry against the SQLite history on every `get_snapshot`, and prunes
//! expired points in the background.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use locotrack_core::TelemetrySource;
use locotrack_daemon_protocol::{
    parse_snapshot_params, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION, STATUS_INTERNAL,
};

mod config;
mod db;
mod source;
mod state;

use config::DaemonConfig;
use db::Db;
use source::HttpTelemetrySource;
use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let config = load_daemon_config();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path, config.retention()) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let source = match HttpTelemetrySource::new(&config.telemetry) {
        Ok(source) => source,
        Err(err) => {
            error!(error = %err, "Failed to initialize telemetry client");
            std::process::exit(1);
        }
    };

    info!(
        retention_hours = config.history.retention_hours,
        epsilon_degrees = config.movement.epsilon_degrees,
        timeout_secs = config.telemetry.timeout_secs,
        "Daemon config loaded"
    );
    let shared_state = Arc::new(SharedState::new(source, db, config));
    spawn_retention_reaper(Arc::clone(&shared_state));

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "locotrack daemon started");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(move || handle_connection(stream, &state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn load_daemon_config() -> DaemonConfig {
    let mut config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon config; using defaults");
            DaemonConfig::default()
        }
    };
    config.apply_overrides(|key| env::var(key).ok());
    if let Err(err) = config.validate() {
        warn!(error = %err, "Invalid daemon config override; using defaults");
        config = DaemonConfig::default();
    }
    config
}

fn spawn_retention_reaper<S: TelemetrySource + 'static>(state: Arc<SharedState<S>>) {
    let interval = Duration::from_secs(state.prune_interval_secs());
    thread::spawn(move || loop {
        match state.prune_expired() {
            Ok(0) => {}
            Ok(removed) => info!(removed, "Pruned expired history"),
            Err(err) => warn!(error = %err, "History pruning failed"),
        }
        thread::sleep(interval);
    });
}

fn init_logging() {
    let debug_enabled = env::var("LOCOTRACK_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".locotrack").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".locotrack").join("daemon").join("history.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection<S: TelemetrySource>(mut stream: UnixStream, state: &SharedState<S>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
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
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::with_status(
                    STATUS_INTERNAL,
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    parse_request_bytes(&buffer)
}

fn parse_request_bytes(buffer: &[u8]) -> Result<Request, ErrorInfo> {
    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer,
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request<S: TelemetrySource>(request: Request, state: &SharedState<S>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(value) = serde_json::to_value(state.config_summary()) {
                data["config"] = value;
            }
            Response::ok(request.id, data)
        }
        Method::GetSnapshot => handle_snapshot(request, state),
    }
}

fn handle_snapshot<S: TelemetrySource>(request: Request, state: &SharedState<S>) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_request", "asset_id is required"),
    };

    let asset_id = match parse_snapshot_params(params) {
        Ok(asset_id) => asset_id,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    match state.snapshot(&asset_id) {
        Ok(snapshot) => {
            tracing::debug!(
                asset_id = %asset_id,
                history = snapshot.history.len(),
                "Snapshot served"
            );
            match serde_json::to_value(&snapshot) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error_with_info(
                    request.id,
                    ErrorInfo::with_status(
                        STATUS_INTERNAL,
                        "serialization_error",
                        format!("Failed to serialize snapshot: {}", err),
                    ),
                ),
            }
        }
        Err(err) => {
            warn!(
                asset_id = %asset_id,
                code = err.code(),
                error = %err,
                "Snapshot request failed"
            );
            Response::error_with_info(request.id, err.to_error_info())
        }
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
