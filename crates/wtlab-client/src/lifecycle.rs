//! Session lifecycle manager.
//!
//! One [`SessionLifecycle`] per connection attempt. It owns the state
//! machine `Connecting → Ready → Closed`, with `Failed` reachable from
//! `Connecting`. Every transition goes through a compare-and-set on a
//! `watch` channel, so when the local close request and the transport's own
//! closure race, only the winner logs.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;
use wtlab_core::transport::BoxFuture;
use wtlab_core::{CancelSignal, CertificatePin, EventSink, LogEntry, Session, WtError, WtResult};

/// How long `close` waits for the transport to acknowledge.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle state of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Establishes a session to an endpoint, optionally pinned to a
/// certificate hash.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        pin: Option<&'a CertificatePin>,
    ) -> BoxFuture<'a, WtResult<Arc<dyn Session>>>;
}

/// State machine and session ownership for one connection attempt.
pub struct SessionLifecycle {
    state: watch::Sender<SessionState>,
    session: OnceLock<Arc<dyn Session>>,
    sink: Arc<dyn EventSink>,
    /// Aborts bootstrap and connect before the session exists; stops the
    /// channel loops after it does.
    stop: CancelSignal,
}

impl SessionLifecycle {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            state,
            session: OnceLock::new(),
            sink,
            stop: CancelSignal::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The signal tied to this attempt.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.stop.clone()
    }

    /// The session, only while `Ready`.
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        if self.state() != SessionState::Ready {
            return None;
        }
        self.session.get().cloned()
    }

    /// Compare-and-set. Returns `true` if this call made the transition.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if changed {
            debug!(?from, ?to, "session state changed");
        }
        changed
    }

    /// Connect through `connector` and move to `Ready`.
    ///
    /// If the attempt is closed first, no session is kept: one that was
    /// constructed in the meantime is closed immediately and `Cancelled` is
    /// returned. A connect failure moves to `Failed` and is logged.
    pub async fn connect(
        self: &Arc<Self>,
        connector: &dyn Connector,
        endpoint: &str,
        pin: Option<&CertificatePin>,
    ) -> WtResult<Arc<dyn Session>> {
        match self.state() {
            SessionState::Connecting if !self.stop.is_cancelled() => {}
            SessionState::Connecting | SessionState::Closed => return Err(WtError::Cancelled),
            state => {
                return Err(WtError::Session(format!("attempt is already {state:?}")));
            }
        }

        let result = tokio::select! {
            biased;
            _ = self.stop.cancelled() => Err(WtError::Cancelled),
            r = connector.connect(endpoint, pin) => r,
        };

        let session = match result {
            Ok(session) => session,
            Err(WtError::Cancelled) => return Err(WtError::Cancelled),
            Err(e) => {
                let e = match e {
                    WtError::Session(_) => e,
                    other => WtError::Session(other.to_string()),
                };
                self.fail(&e);
                return Err(e);
            }
        };

        let stored = self.session.set(session.clone()).is_ok();
        if !stored || !self.transition(SessionState::Connecting, SessionState::Ready) {
            session.close(0, b"cancelled");
            return Err(WtError::Cancelled);
        }

        self.sink.on_log(LogEntry::success("WebTransport is ready"));
        self.watch_closure(session.clone());
        Ok(session)
    }

    /// Move from `Connecting` to `Failed`, logging `err`. Used when
    /// bootstrap fails before any connect is tried.
    pub fn fail(&self, err: &WtError) {
        if self.transition(SessionState::Connecting, SessionState::Failed) {
            self.sink.on_log(LogEntry::error(err.to_string()));
            self.stop.cancel();
        }
    }

    fn watch_closure(self: &Arc<Self>, session: Arc<dyn Session>) {
        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = session.closed().await;
            lifecycle.on_transport_closed(outcome);
        });
    }

    fn on_transport_closed(&self, outcome: WtResult<()>) {
        if !self.transition(SessionState::Ready, SessionState::Closed) {
            return;
        }
        match outcome {
            Ok(()) => self.sink.on_log(LogEntry::info("WebTransport is closed")),
            Err(e) => self.sink.on_log(LogEntry::error(format!(
                "WebTransport is closed with error: {e}"
            ))),
        }
        self.stop.cancel();
    }

    /// Close this attempt. Idempotent: only the first call (or the
    /// transport's own closure, whichever wins) logs.
    ///
    /// While `Connecting` this aborts bootstrap and connect. While `Ready`
    /// it closes the session and waits briefly for the transport to
    /// acknowledge.
    pub async fn close(&self, reason: Option<&str>) {
        loop {
            match self.state() {
                SessionState::Connecting => {
                    if self.transition(SessionState::Connecting, SessionState::Closed) {
                        self.stop.cancel();
                        self.sink
                            .on_log(LogEntry::info("connection attempt cancelled"));
                        return;
                    }
                    // Lost to `connect`; re-read the state.
                }
                SessionState::Ready => {
                    if !self.transition(SessionState::Ready, SessionState::Closed) {
                        return;
                    }
                    self.stop.cancel();
                    if let Some(session) = self.session.get() {
                        session.close(0, reason.unwrap_or("").as_bytes());
                        let _ = tokio::time::timeout(CLOSE_ACK_TIMEOUT, session.closed()).await;
                    }
                    self.sink.on_log(LogEntry::info("WebTransport is closed"));
                    return;
                }
                SessionState::Closed | SessionState::Failed => return,
            }
        }
    }

    /// Resolves once the attempt is `Closed` or `Failed`.
    pub async fn terminated(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let reached = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s);
        reached.unwrap_or_else(|_| self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wtlab_core::mock::MockSession;
    use wtlab_core::{Observer, Severity};

    /// Hands out the client end of a fresh mock pair and keeps the server end.
    #[derive(Default)]
    struct Loopback {
        calls: AtomicUsize,
        peers: Mutex<Vec<Arc<MockSession>>>,
    }

    impl Loopback {
        fn peer(&self) -> Arc<MockSession> {
            self.peers.lock().unwrap()[0].clone()
        }
    }

    impl Connector for Loopback {
        fn connect<'a>(
            &'a self,
            _endpoint: &'a str,
            _pin: Option<&'a CertificatePin>,
        ) -> BoxFuture<'a, WtResult<Arc<dyn Session>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let (client, server) = MockSession::pair();
                self.peers.lock().unwrap().push(server);
                Ok(client as Arc<dyn Session>)
            })
        }
    }

    struct Refusing;

    impl Connector for Refusing {
        fn connect<'a>(
            &'a self,
            _endpoint: &'a str,
            _pin: Option<&'a CertificatePin>,
        ) -> BoxFuture<'a, WtResult<Arc<dyn Session>>> {
            Box::pin(async { Err(WtError::Session("connection refused".into())) })
        }
    }

    fn closure_logs(observer: &Observer) -> usize {
        observer
            .entries()
            .iter()
            .filter(|e| e.message.starts_with("WebTransport is closed"))
            .count()
    }

    #[tokio::test]
    async fn connect_reaches_ready_and_logs_once() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer.clone()));
        lifecycle
            .connect(&Loopback::default(), "https://localhost:4433", None)
            .await
            .unwrap();
        assert_eq!(lifecycle.state(), SessionState::Ready);
        assert!(lifecycle.session().is_some());
        let entries = observer.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].severity, Severity::Success);
    }

    #[tokio::test]
    async fn connect_failure_moves_to_failed() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer.clone()));
        let err = lifecycle
            .connect(&Refusing, "https://localhost:4433", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WtError::Session(_)));
        assert_eq!(lifecycle.state(), SessionState::Failed);
        assert!(lifecycle.session().is_none());
        assert_eq!(observer.entries()[0].severity, Severity::Error);
        assert!(lifecycle.cancel_signal().is_cancelled());
    }

    #[tokio::test]
    async fn double_close_logs_once() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer.clone()));
        let connector = Loopback::default();
        lifecycle
            .connect(&connector, "https://localhost:4433", None)
            .await
            .unwrap();

        lifecycle.close(Some("done")).await;
        lifecycle.close(Some("again")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(lifecycle.state(), SessionState::Closed);
        assert!(lifecycle.session().is_none());
        assert_eq!(closure_logs(&observer), 1);
        assert_eq!(connector.peer().close_calls(), 0);
        assert!(connector.peer().is_closed());
    }

    #[tokio::test]
    async fn peer_close_moves_to_closed() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer.clone()));
        let connector = Loopback::default();
        lifecycle
            .connect(&connector, "https://localhost:4433", None)
            .await
            .unwrap();

        connector.peer().close(0, b"");
        let state = tokio::time::timeout(Duration::from_secs(1), lifecycle.terminated())
            .await
            .unwrap();
        assert_eq!(state, SessionState::Closed);
        assert!(lifecycle.cancel_signal().is_cancelled());
        assert_eq!(observer.entries().last().unwrap().severity, Severity::Info);

        // A later local close is a no-op.
        lifecycle.close(None).await;
        assert_eq!(closure_logs(&observer), 1);
    }

    #[tokio::test]
    async fn transport_error_after_ready_is_logged_as_closure() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer.clone()));
        let connector = Loopback::default();
        lifecycle
            .connect(&connector, "https://localhost:4433", None)
            .await
            .unwrap();

        connector.peer().fail("idle timeout");
        let state = tokio::time::timeout(Duration::from_secs(1), lifecycle.terminated())
            .await
            .unwrap();
        assert_eq!(state, SessionState::Closed);
        assert_eq!(observer.entries().last().unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn terminated_reports_failed_attempt() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer));
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.terminated().await })
        };
        assert!(lifecycle
            .connect(&Refusing, "https://localhost:4433", None)
            .await
            .is_err());
        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, SessionState::Failed);
        // Already terminal: resolves immediately.
        assert_eq!(lifecycle.terminated().await, SessionState::Failed);
    }

    #[tokio::test]
    async fn close_while_connecting_prevents_session() {
        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer.clone()));
        lifecycle.close(None).await;
        assert_eq!(lifecycle.state(), SessionState::Closed);

        let connector = Loopback::default();
        let err = lifecycle
            .connect(&connector, "https://localhost:4433", None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WtError::Cancelled));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert!(observer
            .entries()
            .iter()
            .all(|e| e.severity != Severity::Success));
    }
}
