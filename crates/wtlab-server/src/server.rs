//! The wtlab server.
//!
//! `WtServer` runs the accept loop: every session coming out of the
//! listener is registered and handed to its own handler task. On shutdown
//! the loop stops accepting and every registered session is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use wtransport::VarInt;

use wtlab_core::{CancelSignal, ChannelKind, EventSink, Session, WtResult};

use crate::cert;
use crate::config::ServerConfig;
use crate::fingerprint_http;
use crate::handler::handle_session;
use crate::registry::SessionRegistry;
use crate::transport::webtransport;

/// Session handling and shutdown, independent of the listener.
pub struct WtServer {
    write_interval: Duration,
    shutdown_grace: Duration,
    registry: Arc<SessionRegistry>,
}

impl WtServer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            write_interval: config.write_interval,
            shutdown_grace: config.shutdown_grace,
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Accept sessions from `incoming` until `shutdown` fires or the
    /// listener goes away, then close everything still registered.
    ///
    /// Returns the number of sessions accepted.
    pub async fn run(
        &self,
        mut incoming: mpsc::Receiver<Arc<dyn Session>>,
        shutdown: CancelSignal,
    ) -> u64 {
        let mut accepted = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting sessions");
                    break;
                }
                next = incoming.recv() => next,
            };
            match next {
                Some(session) => {
                    accepted += 1;
                    self.spawn_session(session, shutdown.clone()).await;
                }
                None => {
                    info!("listener closed, shutting down");
                    break;
                }
            }
        }
        drop(incoming);

        let closed = self
            .registry
            .close_all("server shutdown", self.shutdown_grace)
            .await;
        info!(accepted, closed, "accept loop finished");
        accepted
    }

    async fn spawn_session(&self, session: Arc<dyn Session>, shutdown: CancelSignal) {
        let id = session.id();
        let (entry, live) = self.registry.register(session.clone()).await;
        info!(session = id, live, "session registered");

        let registry = self.registry.clone();
        let write_interval = self.write_interval;
        tokio::spawn(async move {
            let sink: Arc<dyn EventSink> = entry.sink.clone();
            handle_session(session, sink, write_interval, shutdown).await;
            registry.remove(id).await;

            let live = registry.len().await;
            let counters = entry.sink.counters();
            info!(
                session = id,
                live,
                datagrams = counters.get(ChannelKind::Datagram),
                bidirectional = counters.get(ChannelKind::Bidirectional),
                unidirectional = counters.get(ChannelKind::Unidirectional),
                "session finished"
            );
        });
    }
}

/// Run the full server: fingerprint endpoint, WebTransport listener and
/// accept loop, until `shutdown` fires.
pub async fn serve(config: ServerConfig, shutdown: CancelSignal) -> WtResult<()> {
    let pin = cert::load_pin(&config.cert_path)?;
    info!(fingerprint = %pin.to_colon_hex(), "certificate loaded");

    let (http_addr, http_task) =
        fingerprint_http::start(config.http_addr(), pin, shutdown.clone()).await?;

    let (endpoint, incoming) = match webtransport::start_listener(
        config.quic_addr(),
        &config.cert_path,
        &config.key_path,
        config.path.clone(),
        shutdown.clone(),
    )
    .await
    {
        Ok(listener) => listener,
        Err(e) => {
            shutdown.cancel();
            let _ = http_task.await;
            return Err(e);
        }
    };

    info!(
        url = %config.session_url(),
        fingerprint_url = %format!("http://{}:{}/fingerprint", config.host, http_addr.port()),
        "wtlab-server ready"
    );

    let server = WtServer::new(&config);
    server.run(incoming, shutdown.clone()).await;

    endpoint.close(VarInt::from_u32(0), b"server shutdown");
    if tokio::time::timeout(config.shutdown_grace, endpoint.wait_idle())
        .await
        .is_err()
    {
        warn!(
            grace_secs = config.shutdown_grace.as_secs(),
            "endpoint did not drain within grace period"
        );
    }
    let _ = http_task.await;
    Ok(())
}
