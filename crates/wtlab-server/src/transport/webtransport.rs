//! WebTransport listener using wtransport (QUIC + HTTP/3).
//!
//! Accepts incoming sessions, filters them by request path, and hands each
//! accepted session to the server's accept loop over a channel.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wtransport::endpoint::endpoint_side::Server;
use wtransport::endpoint::IncomingSession;
use wtransport::{Endpoint, Identity, ServerConfig};

use wtlab_core::{CancelSignal, Session, WebTransportSession, WtError, WtResult};

const KEEP_ALIVE: Duration = Duration::from_secs(3);

/// Whether a session request for `requested` targets `expected`. The
/// query string is ignored.
pub fn path_matches(requested: &str, expected: &str) -> bool {
    requested.split('?').next() == Some(expected)
}

/// Start the WebTransport listener.
///
/// Returns the endpoint (for closing it on shutdown) and a receiver that
/// yields accepted sessions. The background accept task stops when `stop`
/// fires.
pub async fn start_listener(
    bind_addr: SocketAddr,
    cert_path: &Path,
    key_path: &Path,
    path: String,
    stop: CancelSignal,
) -> WtResult<(Arc<Endpoint<Server>>, mpsc::Receiver<Arc<dyn Session>>)> {
    let identity = Identity::load_pemfiles(cert_path, key_path)
        .await
        .map_err(|e| WtError::Config(format!("cannot load TLS identity: {e}")))?;

    let config = ServerConfig::builder()
        .with_bind_address(bind_addr)
        .with_identity(identity)
        .keep_alive_interval(Some(KEEP_ALIVE))
        .build();

    let endpoint = Endpoint::server(config)
        .map_err(|e| WtError::Session(format!("QUIC bind failed: {e}")))?;
    let endpoint = Arc::new(endpoint);

    info!(addr = %bind_addr, path = %path, "WebTransport listener started");

    let (tx, rx) = mpsc::channel::<Arc<dyn Session>>(64);
    let ep = endpoint.clone();

    tokio::spawn(async move {
        loop {
            let incoming = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                incoming = ep.accept() => incoming,
            };

            let tx = tx.clone();
            let path = path.clone();
            tokio::spawn(async move {
                match handshake(incoming, &path).await {
                    Ok(Some(session)) => {
                        if tx.send(session).await.is_err() {
                            warn!("session channel closed, dropping session");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "WebTransport handshake failed"),
                }
            });
        }
        info!("WebTransport listener stopped");
    });

    Ok((endpoint, rx))
}

async fn handshake(incoming: IncomingSession, path: &str) -> WtResult<Option<Arc<dyn Session>>> {
    let request = incoming
        .await
        .map_err(|e| WtError::Session(format!("incoming session: {e}")))?;

    if !path_matches(request.path(), path) {
        debug!(requested = request.path(), expected = path, "rejecting session request");
        request.not_found().await;
        return Ok(None);
    }

    let authority = request.authority().to_string();
    let connection = request
        .accept()
        .await
        .map_err(|e| WtError::Session(format!("accepting session: {e}")))?;
    let session = WebTransportSession::new(connection);
    info!(
        session = session.id(),
        remote = %session.remote_addr(),
        authority = %authority,
        "session accepted"
    );
    Ok(Some(Arc::new(session)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert;
    use std::net::{IpAddr, Ipv4Addr};
    use wtlab_client::{Connector, SessionLifecycle, SessionState, WebTransportConnector};
    use wtlab_core::{CertificatePin, Observer};

    struct Listener {
        endpoint: Arc<Endpoint<Server>>,
        incoming: mpsc::Receiver<Arc<dyn Session>>,
        pin: CertificatePin,
        port: u16,
        stop: CancelSignal,
        _dir: tempfile::TempDir,
    }

    async fn listen(path: &str) -> Listener {
        let dir = tempfile::tempdir().unwrap();
        let (cert_path, key_path) = cert::generate_self_signed(dir.path(), 10).unwrap();
        let pin = cert::load_pin(&cert_path).unwrap();
        let stop = CancelSignal::new();
        let (endpoint, incoming) = start_listener(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            &cert_path,
            &key_path,
            path.to_string(),
            stop.clone(),
        )
        .await
        .unwrap();
        let port = endpoint.local_addr().unwrap().port();
        Listener {
            endpoint,
            incoming,
            pin,
            port,
            stop,
            _dir: dir,
        }
    }

    fn connector() -> WebTransportConnector {
        WebTransportConnector::new(false, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn matching_pin_reaches_ready() {
        let mut listener = listen("/").await;
        let url = format!("https://127.0.0.1:{}/", listener.port);

        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer));
        lifecycle
            .connect(&connector(), &url, Some(&listener.pin))
            .await
            .unwrap();
        assert_eq!(lifecycle.state(), SessionState::Ready);

        let accepted = tokio::time::timeout(Duration::from_secs(5), listener.incoming.recv())
            .await
            .unwrap();
        assert!(accepted.is_some());

        lifecycle.close(None).await;
        assert_eq!(lifecycle.state(), SessionState::Closed);
        listener.stop.cancel();
        listener.endpoint.close(wtransport::VarInt::from_u32(0), b"");
    }

    #[tokio::test]
    async fn mismatched_pin_fails_the_attempt() {
        let listener = listen("/").await;
        let url = format!("https://127.0.0.1:{}/", listener.port);
        let wrong = CertificatePin::sha256(&[0u8; 32]).unwrap();
        assert_ne!(wrong, listener.pin);

        let observer = Arc::new(Observer::new());
        let lifecycle = Arc::new(SessionLifecycle::new(observer));
        let err = lifecycle
            .connect(&connector(), &url, Some(&wrong))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WtError::Session(_)), "{err:?}");
        assert_eq!(lifecycle.state(), SessionState::Failed);
        assert!(lifecycle.session().is_none());
        listener.stop.cancel();
    }

    #[tokio::test]
    async fn unknown_path_is_rejected() {
        let mut listener = listen("/lab").await;
        let url = format!("https://127.0.0.1:{}/elsewhere", listener.port);

        let err = connector()
            .connect(&url, Some(&listener.pin))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WtError::Session(_)), "{err:?}");
        assert!(listener.incoming.try_recv().is_err());
        listener.stop.cancel();
    }

    #[test]
    fn path_filter() {
        assert!(path_matches("/", "/"));
        assert!(path_matches("/?token=1", "/"));
        assert!(path_matches("/lab", "/lab"));
        assert!(!path_matches("/lab", "/"));
        assert!(!path_matches("/", "/lab"));
        assert!(!path_matches("/lab/extra", "/lab"));
    }
}
