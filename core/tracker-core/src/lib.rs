//! # locotrack-core
//!
//! Core library for locotrack: everything between "poll the telemetry
//! provider" and "hand a snapshot to a renderer", shared by the daemon and the
//! CLI client.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. The session ticker is a
//!   plain thread; clients can wrap with async if needed.
//! - **Capabilities at the seams**: the telemetry transport
//!   ([`TelemetrySource`]) and the persistent store ([`HistoryStore`]) are
//!   traits, so the engine is testable without network or disk.
//! - **Availability over durability**: a failed insert never fails a poll.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use locotrack_core::{MovementPolicy, ReconciliationEngine, SessionHandle};
//!
//! let engine = ReconciliationEngine::new(source, store, MovementPolicy::default());
//! let session = SessionHandle::new(engine, locotrack_core::DEFAULT_POLL_INTERVAL);
//! session.start("12951")?;
//! ```

pub mod error;
pub mod movement;
pub mod patterns;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod telemetry;

pub use error::{Result, TrackError};
pub use movement::{has_moved, MovementPolicy, DEFAULT_EPSILON_DEGREES};
pub use reconcile::ReconciliationEngine;
pub use session::{
    CancellationToken, SessionHandle, SessionObserver, SessionStatus, SnapshotProvider,
    TrackingSession, DEFAULT_POLL_INTERVAL,
};
pub use store::{default_retention, HistoryStore, DEFAULT_RETENTION_HOURS};
pub use telemetry::{
    latest_row, parse_annotation, parse_row, AnnotationFields, RawTelemetry, RawTelemetryRow,
    TelemetrySource,
};

pub use locotrack_daemon_protocol::{
    HistoryEntry, HistoryRecord, Position, Snapshot, TelemetryPoint, NOT_AVAILABLE,
};
