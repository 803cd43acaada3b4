//! Client-side tracking session state machine.
//!
//! ```text
//! Idle ──start──▶ Active ──tick ok──▶ Active
//!   ▲               │  └──tick err──▶ Error ──start──▶ Active
//!   └─────stop──────┘
//! ```
//!
//! A session owns at most one ticker thread at a time, guarded by a
//! [`CancellationToken`]. Every start or stop bumps a generation counter under
//! the state lock; a poll result is applied only if its generation is still
//! current, so a tick that was in flight when `stop` returned is discarded.

use locotrack_daemon_protocol::Snapshot;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackError};

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Produces a fresh snapshot for an asset. Implemented by the in-process
/// engine and by the daemon client.
pub trait SnapshotProvider: Send + Sync + 'static {
    fn fetch_snapshot(&self, asset_id: &str) -> Result<Snapshot>;
}

impl<T: SnapshotProvider + ?Sized> SnapshotProvider for Arc<T> {
    fn fetch_snapshot(&self, asset_id: &str) -> Result<Snapshot> {
        (**self).fetch_snapshot(asset_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Active,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSession {
    pub asset_id: Option<String>,
    pub status: SessionStatus,
    pub last_snapshot: Option<Snapshot>,
}

impl Default for TrackingSession {
    fn default() -> Self {
        Self {
            asset_id: None,
            status: SessionStatus::Idle,
            last_snapshot: None,
        }
    }
}

/// One-shot cancellation flag that sleeping tickers can wait on.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`. Returns true if cancelled before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = condvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Called after every applied transition. Calls are serialized and never
/// follow the `stop` notification for an older generation. An observer must
/// not call `start` or `stop` on its own handle.
pub type SessionObserver = Box<dyn Fn(&TrackingSession) + Send + Sync>;

struct Inner {
    session: TrackingSession,
    generation: u64,
    token: Option<CancellationToken>,
}

struct Shared<P> {
    provider: P,
    interval: Duration,
    inner: Mutex<Inner>,
    observer: Option<SessionObserver>,
    // Held across "check generation, mutate, notify" so observer calls are
    // delivered in generation order. Acquired before `inner`.
    notifying: Mutex<()>,
}

impl<P: SnapshotProvider> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_guard(&self) -> MutexGuard<'_, ()> {
        self.notifying.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, session: &TrackingSession) {
        if let Some(observer) = &self.observer {
            observer(session);
        }
    }

    /// Applies a poll result if `generation` is still current. Returns false
    /// when the result was discarded.
    fn apply(&self, generation: u64, result: &Result<Snapshot>) -> bool {
        let _notifying = self.notify_guard();
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(generation, "Discarding stale poll result");
            return false;
        }

        match result {
            Ok(snapshot) => {
                inner.session.status = SessionStatus::Active;
                inner.session.last_snapshot = Some(snapshot.clone());
            }
            Err(err) => {
                warn!(
                    asset_id = ?inner.session.asset_id,
                    code = err.code(),
                    error = %err,
                    "Tracking halted"
                );
                if let Some(token) = inner.token.take() {
                    token.cancel();
                }
                inner.session.status = SessionStatus::Error(err.to_string());
                inner.session.last_snapshot = None;
            }
        }

        let view = inner.session.clone();
        drop(inner);
        self.notify(&view);
        true
    }
}

/// Handle to a tracking session. Dropping the handle cancels its ticker.
pub struct SessionHandle<P: SnapshotProvider> {
    shared: Arc<Shared<P>>,
}

impl<P: SnapshotProvider> SessionHandle<P> {
    pub fn new(provider: P, interval: Duration) -> Self {
        Self::build(provider, interval, None)
    }

    pub fn with_observer(
        provider: P,
        interval: Duration,
        observer: impl Fn(&TrackingSession) + Send + Sync + 'static,
    ) -> Self {
        Self::build(provider, interval, Some(Box::new(observer)))
    }

    fn build(provider: P, interval: Duration, observer: Option<SessionObserver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                interval,
                inner: Mutex::new(Inner {
                    session: TrackingSession::default(),
                    generation: 0,
                    token: None,
                }),
                observer,
                notifying: Mutex::new(()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn session(&self) -> TrackingSession {
        self.shared.lock().session.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.lock().session.status.clone()
    }

    /// Starts (or restarts) tracking. Valid from every state: any running
    /// ticker is cancelled first. The first poll runs on the calling thread;
    /// the cadence begins only if it succeeds.
    pub fn start(&self, asset_id: &str) -> Result<()> {
        let asset_id = asset_id.trim().to_string();

        let generation = {
            let mut inner = self.shared.lock();
            if let Some(token) = inner.token.take() {
                token.cancel();
            }
            inner.generation += 1;
            inner.session = TrackingSession {
                asset_id: Some(asset_id.clone()),
                status: SessionStatus::Active,
                last_snapshot: None,
            };
            inner.generation
        };

        let result = if asset_id.is_empty() {
            Err(TrackError::InvalidRequest(
                "asset_id is required".to_string(),
            ))
        } else {
            self.shared.provider.fetch_snapshot(&asset_id)
        };

        if !self.shared.apply(generation, &result) {
            return result.map(|_| ());
        }
        result?;

        let token = CancellationToken::new();
        {
            let mut inner = self.shared.lock();
            if inner.generation != generation {
                return Ok(());
            }
            inner.token = Some(token.clone());
        }

        info!(
            asset_id = %asset_id,
            interval_ms = self.shared.interval.as_millis() as u64,
            "Tracking started"
        );
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || run_ticker(shared, asset_id, generation, token));
        Ok(())
    }

    /// Stops tracking and discards the last snapshot. Once this returns, no
    /// further poll result is applied or reported to the observer. Waits for
    /// an observer call already in progress.
    pub fn stop(&self) {
        let _notifying = self.shared.notify_guard();
        let view = {
            let mut inner = self.shared.lock();
            if let Some(token) = inner.token.take() {
                token.cancel();
            }
            inner.generation += 1;
            inner.session = TrackingSession::default();
            inner.session.clone()
        };
        info!("Tracking stopped");
        self.shared.notify(&view);
    }
}

impl<P: SnapshotProvider> Drop for SessionHandle<P> {
    fn drop(&mut self) {
        if let Some(token) = self.shared.lock().token.take() {
            token.cancel();
        }
    }
}

fn run_ticker<P: SnapshotProvider>(
    shared: Arc<Shared<P>>,
    asset_id: String,
    generation: u64,
    token: CancellationToken,
) {
    loop {
        if token.wait_timeout(shared.interval) {
            break;
        }
        let result = shared.provider.fetch_snapshot(&asset_id);
        if !shared.apply(generation, &result) || result.is_err() {
            break;
        }
    }
    debug!(asset_id = %asset_id, generation, "Ticker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use locotrack_daemon_protocol::{HistoryEntry, Position, TelemetryPoint, NOT_AVAILABLE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    const FAST: Duration = Duration::from_millis(10);
    const NEVER: Duration = Duration::from_secs(3600);

    fn snapshot(lat: f64) -> Snapshot {
        let current = TelemetryPoint {
            position: Position::new(lat, 77.20),
            station: NOT_AVAILABLE.to_string(),
            event: NOT_AVAILABLE.to_string(),
            speed: NOT_AVAILABLE.to_string(),
        };
        Snapshot {
            history: vec![HistoryEntry::Live(current.clone())],
            current,
        }
    }

    /// Scripted provider: call N returns `script(N)`; calls are recorded.
    struct Scripted<F> {
        script: F,
        calls: Mutex<Vec<String>>,
    }

    impl<F> Scripted<F>
    where
        F: Fn(usize) -> Result<Snapshot> + Send + Sync + 'static,
    {
        fn new(script: F) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl<F> SnapshotProvider for Scripted<F>
    where
        F: Fn(usize) -> Result<Snapshot> + Send + Sync + 'static,
    {
        fn fetch_snapshot(&self, asset_id: &str) -> Result<Snapshot> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(asset_id.to_string());
                calls.len()
            };
            (self.script)(call)
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn starts_idle() {
        let provider = Scripted::new(|_| Ok(snapshot(28.61)));
        let handle = SessionHandle::new(provider.clone(), NEVER);
        assert_eq!(handle.session(), TrackingSession::default());
        assert_eq!(provider.count(), 0);
    }

    #[test]
    fn start_polls_synchronously() {
        let provider = Scripted::new(|_| Ok(snapshot(28.61)));
        let handle = SessionHandle::new(provider.clone(), NEVER);

        handle.start("12951").unwrap();

        let session = handle.session();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.asset_id.as_deref(), Some("12951"));
        assert_eq!(session.last_snapshot, Some(snapshot(28.61)));
        assert_eq!(provider.count(), 1);
    }

    #[test]
    fn failed_first_poll_halts_without_ticking() {
        let provider = Scripted::new(|_| Err(TrackError::AssetNotFound("no rows".to_string())));
        let handle = SessionHandle::new(provider.clone(), FAST);

        let err = handle.start("00000").unwrap_err();
        assert!(matches!(err, TrackError::AssetNotFound(_)));
        assert!(matches!(handle.status(), SessionStatus::Error(_)));

        thread::sleep(FAST * 5);
        assert_eq!(provider.count(), 1);
    }

    #[test]
    fn blank_asset_id_errors_without_polling() {
        let provider = Scripted::new(|_| Ok(snapshot(28.61)));
        let handle = SessionHandle::new(provider.clone(), FAST);

        assert!(matches!(
            handle.start("   "),
            Err(TrackError::InvalidRequest(_))
        ));
        assert!(matches!(handle.status(), SessionStatus::Error(_)));
        assert_eq!(provider.count(), 0);
    }

    #[test]
    fn ticks_replace_last_snapshot() {
        let provider = Scripted::new(|call| Ok(snapshot(28.0 + call as f64 / 100.0)));
        let handle = SessionHandle::new(provider.clone(), FAST);

        handle.start("12951").unwrap();
        assert!(wait_until(Duration::from_secs(2), || provider.count() >= 3));

        let session = handle.session();
        assert_eq!(session.status, SessionStatus::Active);
        let lat = session.last_snapshot.unwrap().current.position.lat;
        assert!(lat > 28.01);
        handle.stop();
    }

    #[test]
    fn tick_failure_moves_to_error_and_cancels_cadence() {
        let provider = Scripted::new(|call| {
            if call >= 2 {
                Err(TrackError::TelemetryUnavailable("upstream 503".to_string()))
            } else {
                Ok(snapshot(28.61))
            }
        });
        let handle = SessionHandle::new(provider.clone(), FAST);

        handle.start("12951").unwrap();
        assert!(wait_until(Duration::from_secs(2), || matches!(
            handle.status(),
            SessionStatus::Error(_)
        )));

        thread::sleep(FAST * 5);
        assert_eq!(provider.count(), 2);
        let session = handle.session();
        assert_eq!(session.last_snapshot, None);
        match session.status {
            SessionStatus::Error(message) => assert!(message.contains("upstream 503")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn stop_returns_to_idle_and_discards_snapshot() {
        let provider = Scripted::new(|_| Ok(snapshot(28.61)));
        let handle = SessionHandle::new(provider.clone(), FAST);

        handle.start("12951").unwrap();
        handle.stop();
        assert_eq!(handle.session(), TrackingSession::default());

        let after_stop = provider.count();
        thread::sleep(FAST * 5);
        assert!(provider.count() <= after_stop + 1);
        assert_eq!(handle.session(), TrackingSession::default());
    }

    #[test]
    fn in_flight_tick_is_discarded_after_stop() {
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);

        let provider = Scripted::new(move |call| {
            if call == 2 {
                let _ = entered_tx.lock().unwrap().send(());
                let _ = release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(2));
            }
            Ok(snapshot(28.0 + call as f64))
        });
        let handle = SessionHandle::new(provider.clone(), FAST);

        handle.start("12951").unwrap();
        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("second poll started");

        handle.stop();
        release_tx.send(()).unwrap();
        thread::sleep(FAST * 5);

        assert_eq!(handle.session(), TrackingSession::default());
        assert_eq!(provider.count(), 2);
    }

    #[test]
    fn retry_from_error_reenters_active() {
        let provider = Scripted::new(|call| {
            if call == 1 {
                Err(TrackError::TelemetryUnavailable("timeout".to_string()))
            } else {
                Ok(snapshot(28.61))
            }
        });
        let handle = SessionHandle::new(provider.clone(), NEVER);

        assert!(handle.start("12951").is_err());
        assert!(matches!(handle.status(), SessionStatus::Error(_)));

        handle.start("12951").unwrap();
        assert_eq!(handle.status(), SessionStatus::Active);
        assert!(handle.session().last_snapshot.is_some());
    }

    #[test]
    fn restart_cancels_previous_ticker() {
        let provider = Scripted::new(|_| Ok(snapshot(28.61)));
        let handle = SessionHandle::new(provider.clone(), FAST);

        handle.start("12951").unwrap();
        handle.start("12302").unwrap();
        thread::sleep(FAST * 10);

        provider.calls.lock().unwrap().clear();
        thread::sleep(FAST * 10);
        let calls = provider.calls.lock().unwrap().clone();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|asset_id| asset_id == "12302"));
        assert_eq!(handle.session().asset_id.as_deref(), Some("12302"));
    }

    #[test]
    fn slow_observer_cannot_report_after_stop() {
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observed = AtomicUsize::new(0);

        let provider = Scripted::new(|call| Ok(snapshot(28.0 + call as f64)));
        let handle = SessionHandle::with_observer(provider, FAST, move |session| {
            // The first tick's notification stalls while `stop` runs.
            if observed.fetch_add(1, Ordering::SeqCst) == 1 {
                let _ = entered_tx.lock().unwrap().send(());
                thread::sleep(Duration::from_millis(50));
            }
            sink.lock().unwrap().push(session.status.clone());
        });

        handle.start("12951").unwrap();
        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("tick notification started");
        handle.stop();
        thread::sleep(FAST * 5);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                SessionStatus::Active,
                SessionStatus::Active,
                SessionStatus::Idle
            ]
        );
        assert_eq!(handle.session(), TrackingSession::default());
    }

    #[test]
    fn observer_sees_transitions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let provider = Scripted::new(|_| Ok(snapshot(28.61)));
        let handle = SessionHandle::with_observer(provider, NEVER, move |session| {
            sink.lock().unwrap().push(session.status.clone());
        });

        handle.start("12951").unwrap();
        handle.stop();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![SessionStatus::Active, SessionStatus::Idle]);
    }

    #[test]
    fn token_wait_returns_early_on_cancel() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let started = Instant::now();
        let join = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();

        assert!(join.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(token.is_cancelled());
        assert!(!CancellationToken::new().wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn drives_the_engine_end_to_end() {
        use crate::movement::MovementPolicy;
        use crate::reconcile::ReconciliationEngine;
        use crate::store::HistoryStore;
        use crate::telemetry::{RawTelemetry, TelemetrySource};
        use locotrack_daemon_protocol::HistoryRecord;

        struct Fixed;
        impl TelemetrySource for Fixed {
            fn fetch(&self, _asset_id: &str) -> Result<RawTelemetry> {
                Ok(RawTelemetry::single_row("28.61", "77.20", "Station: Agra"))
            }
        }

        struct Broken;
        impl HistoryStore for Broken {
            fn list_ascending(&self, _asset_id: &str) -> Result<Vec<HistoryRecord>> {
                Ok(Vec::new())
            }
            fn insert(&self, _asset_id: &str, _point: &TelemetryPoint) -> Result<HistoryRecord> {
                Err(TrackError::StoreUnavailable("read-only".to_string()))
            }
        }

        let engine = ReconciliationEngine::new(Fixed, Broken, MovementPolicy::default());
        let handle = SessionHandle::new(engine, NEVER);
        handle.start("12951").unwrap();

        let snapshot = handle.session().last_snapshot.unwrap();
        assert_eq!(snapshot.current.station, "Agra");
        assert_eq!(snapshot.history.len(), 1);
    }
}
