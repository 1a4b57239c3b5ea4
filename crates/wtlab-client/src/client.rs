//! The wtlab client.
//!
//! `WtClient` drives one connection attempt at a time: reset the
//! observer, bootstrap the certificate pin, connect, then start the
//! channel loops exactly once. Reconnecting after a terminal state repeats
//! the whole sequence with fresh counters and log.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use wtlab_core::channel;
use wtlab_core::{
    start_channel_loops, BiStream, CertificatePin, ChannelTasks, EventSink, LogEntry, Observer,
    SendStream, Session, WtError, WtResult,
};

use crate::bootstrap::{fetch_pin, fingerprint_url, FingerprintSource, HttpFingerprintSource};
use crate::connector::WebTransportConnector;
use crate::lifecycle::{Connector, SessionLifecycle, SessionState};

/// Configuration for connecting to a wtlab server.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session endpoint, e.g. `https://localhost:4433`.
    pub endpoint: String,
    /// Fingerprint URL override. Derived from `endpoint` when unset.
    pub fingerprint_url: Option<String>,
    /// Fetch the certificate fingerprint and pin the session to it.
    pub pinning: bool,
    /// A pin obtained out-of-band. Skips bootstrap when set.
    pub pin: Option<CertificatePin>,
    /// Proceed without pinning when bootstrap fails.
    pub bootstrap_fallback: bool,
    /// Skip certificate validation when not pinned.
    pub insecure: bool,
    /// Upper bound on bootstrap and session establishment, in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://localhost:4433".to_string(),
            fingerprint_url: None,
            pinning: true,
            pin: None,
            bootstrap_fallback: false,
            insecure: false,
            connect_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn fingerprint_url(&self) -> WtResult<String> {
        match &self.fingerprint_url {
            Some(url) => Ok(url.clone()),
            None => fingerprint_url(&self.endpoint),
        }
    }
}

/// A live or finished connection attempt.
struct Attempt {
    lifecycle: Arc<SessionLifecycle>,
    tasks: Option<ChannelTasks>,
}

/// The wtlab client.
pub struct WtClient {
    config: ClientConfig,
    source: Arc<dyn FingerprintSource>,
    connector: Arc<dyn Connector>,
    observer: Arc<Observer>,
    current: Mutex<Option<Attempt>>,
}

impl WtClient {
    /// A client using HTTP bootstrap and the `wtransport` connector.
    pub fn new(config: ClientConfig) -> WtResult<Self> {
        let timeout = config.connect_timeout();
        let source = Arc::new(HttpFingerprintSource::new(timeout)?);
        let connector = Arc::new(WebTransportConnector::new(config.insecure, timeout));
        Ok(Self::with_parts(config, source, connector))
    }

    /// A client with custom bootstrap and connect implementations.
    pub fn with_parts(
        config: ClientConfig,
        source: Arc<dyn FingerprintSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            config,
            source,
            connector,
            observer: Arc::new(Observer::new()),
            current: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Log and counters of the current attempt.
    pub fn observer(&self) -> Arc<Observer> {
        self.observer.clone()
    }

    /// State of the current attempt, if any was started.
    pub async fn state(&self) -> Option<SessionState> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|a| a.lifecycle.state())
    }

    /// Lifecycle of the current attempt.
    pub async fn lifecycle(&self) -> Option<Arc<SessionLifecycle>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|a| a.lifecycle.clone())
    }

    /// Start a new connection attempt and wait until it is `Ready`.
    ///
    /// A previous attempt that is still live is closed first. Counters and
    /// log are reset before bootstrap begins.
    pub async fn connect(&self) -> WtResult<Arc<SessionLifecycle>> {
        let lifecycle = {
            let mut current = self.current.lock().await;
            if let Some(previous) = current.take() {
                previous.lifecycle.close(Some("reconnecting")).await;
            }
            self.observer.reset();
            let lifecycle = Arc::new(SessionLifecycle::new(self.observer.clone()));
            *current = Some(Attempt {
                lifecycle: lifecycle.clone(),
                tasks: None,
            });
            lifecycle
        };

        let pin = match self.resolve_pin(&lifecycle).await {
            Ok(pin) => pin,
            Err(WtError::Cancelled) => return Err(WtError::Cancelled),
            Err(e) if self.config.bootstrap_fallback => {
                self.observer.on_log(LogEntry::warning(format!(
                    "{e}; proceeding without certificate pinning"
                )));
                None
            }
            Err(e) => {
                lifecycle.fail(&e);
                return Err(e);
            }
        };

        let session = lifecycle
            .connect(&*self.connector, &self.config.endpoint, pin.as_ref())
            .await?;

        let tasks = start_channel_loops(
            session.clone(),
            self.observer.clone(),
            lifecycle.cancel_signal(),
        );
        let mut current = self.current.lock().await;
        match current.as_mut() {
            Some(attempt) if Arc::ptr_eq(&attempt.lifecycle, &lifecycle) => {
                attempt.tasks = Some(tasks);
            }
            _ => {
                // Superseded by a newer attempt while connecting.
                tasks.abort();
                lifecycle.close(Some("superseded")).await;
                return Err(WtError::Cancelled);
            }
        }
        info!(endpoint = %self.config.endpoint, session = session.id(), "session ready");
        Ok(lifecycle)
    }

    async fn resolve_pin(&self, lifecycle: &SessionLifecycle) -> WtResult<Option<CertificatePin>> {
        if let Some(pin) = &self.config.pin {
            return Ok(Some(pin.clone()));
        }
        if !self.config.pinning {
            return Ok(None);
        }
        let url = self.config.fingerprint_url()?;
        let cancel = lifecycle.cancel_signal();
        let pin = fetch_pin(&*self.source, &url, &cancel).await?;
        self.observer
            .on_log(LogEntry::info(format!("Pinned certificate {pin}")));
        Ok(Some(pin))
    }

    /// Close the current attempt. Safe to call at any time, any number of
    /// times.
    pub async fn close(&self, reason: Option<&str>) {
        let lifecycle = self.lifecycle().await;
        if let Some(lifecycle) = lifecycle {
            lifecycle.close(reason).await;
        }
    }

    /// Wait for the loops of the current attempt to finish.
    pub async fn join(&self) {
        let tasks = {
            let mut current = self.current.lock().await;
            current.as_mut().and_then(|a| a.tasks.take())
        };
        if let Some(tasks) = tasks {
            tasks.join().await;
        }
    }

    async fn ready_session(&self) -> Option<Arc<dyn Session>> {
        self.lifecycle().await.and_then(|l| l.session())
    }

    /// Open a bidirectional stream on the ready session.
    pub async fn create_bidirectional(&self) -> WtResult<BiStream> {
        let session = self
            .ready_session()
            .await
            .ok_or_else(|| WtError::StreamCreation("session is not ready".into()))?;
        channel::create_bidirectional(&*session, &*self.observer).await
    }

    /// Open a unidirectional stream on the ready session.
    pub async fn create_unidirectional(&self) -> WtResult<Box<dyn SendStream>> {
        let session = self
            .ready_session()
            .await
            .ok_or_else(|| WtError::StreamCreation("session is not ready".into()))?;
        channel::create_unidirectional(&*session, &*self.observer).await
    }

    /// Send one datagram. Failures are logged and returned; the session
    /// stays open.
    pub async fn send_datagram(&self, payload: &[u8]) -> WtResult<()> {
        let session = self
            .ready_session()
            .await
            .ok_or_else(|| WtError::Datagram("session is not ready".into()))?;
        channel::send_datagram(&*session, payload, &*self.observer)
    }
}
