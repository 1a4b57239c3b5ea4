//! `wtransport`-backed connector.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use wtransport::tls::Sha256Digest;
use wtransport::{ClientConfig as TransportConfig, Endpoint};

use wtlab_core::transport::BoxFuture;
use wtlab_core::{CertificatePin, Session, WebTransportSession, WtError, WtResult};

use crate::lifecycle::Connector;

/// Connects over QUIC with `wtransport`.
///
/// With a pin, only a certificate whose SHA-256 matches is accepted. Without
/// one, the platform root store is used, unless `insecure` is set.
#[derive(Debug, Clone)]
pub struct WebTransportConnector {
    pub insecure: bool,
    pub timeout: Duration,
}

impl WebTransportConnector {
    pub fn new(insecure: bool, timeout: Duration) -> Self {
        Self { insecure, timeout }
    }

    fn transport_config(&self, pin: Option<&CertificatePin>) -> TransportConfig {
        let builder = TransportConfig::builder().with_bind_default();
        match pin {
            Some(pin) => builder
                .with_server_certificate_hashes([Sha256Digest::new(pin.digest)])
                .build(),
            None if self.insecure => {
                warn!("certificate validation disabled");
                builder.with_no_cert_validation().build()
            }
            None => builder.with_native_certs().build(),
        }
    }
}

impl Connector for WebTransportConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        pin: Option<&'a CertificatePin>,
    ) -> BoxFuture<'a, WtResult<Arc<dyn Session>>> {
        Box::pin(async move {
            let client = Endpoint::client(self.transport_config(pin))
                .map_err(|e| WtError::Session(format!("client endpoint: {e}")))?;

            let connection = tokio::time::timeout(self.timeout, client.connect(endpoint))
                .await
                .map_err(|_| {
                    WtError::Session(format!(
                        "connecting to {endpoint} timed out after {}s",
                        self.timeout.as_secs()
                    ))
                })?
                .map_err(|e| WtError::Session(format!("connecting to {endpoint}: {e}")))?;

            info!(
                endpoint,
                remote = %connection.remote_address(),
                pinned = pin.is_some(),
                "WebTransport connection established"
            );
            Ok(Arc::new(WebTransportSession::new(connection)) as Arc<dyn Session>)
        })
    }
}
