//! Fingerprint bootstrap.
//!
//! Before a session is created, the client asks the server for the SHA-256
//! digest of its certificate over plain HTTP (`GET /fingerprint`) and turns
//! the JSON byte array into a [`CertificatePin`]. The fetch is cancellable:
//! once the attempt's signal fires, bootstrap returns `Cancelled` and the
//! caller must not create a session at all.

use std::time::Duration;

use tracing::debug;
use wtlab_core::transport::BoxFuture;
use wtlab_core::{CancelSignal, CertificatePin, WtError, WtResult};

/// Something that can fetch the raw fingerprint body.
pub trait FingerprintSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, WtResult<Vec<u8>>>;
}

/// Fetches the fingerprint over HTTP with `reqwest`.
pub struct HttpFingerprintSource {
    http: reqwest::Client,
}

impl HttpFingerprintSource {
    /// Every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> WtResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WtError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

impl FingerprintSource for HttpFingerprintSource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, WtResult<Vec<u8>>> {
        Box::pin(async move {
            let resp = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| WtError::Bootstrap(format!("GET {url} failed: {e}")))?
                .error_for_status()
                .map_err(|e| WtError::Bootstrap(format!("GET {url}: {e}")))?;
            let body = resp
                .bytes()
                .await
                .map_err(|e| WtError::Bootstrap(format!("reading {url}: {e}")))?;
            Ok(body.to_vec())
        })
    }
}

/// Derive the plaintext fingerprint URL from a session endpoint:
/// `https://host:port/any/path` → `http://host:port/fingerprint`.
pub fn fingerprint_url(endpoint: &str) -> WtResult<String> {
    let lower = endpoint.to_lowercase();
    let rest = if lower.starts_with("https://") {
        &endpoint[8..]
    } else if lower.starts_with("http://") {
        &endpoint[7..]
    } else {
        return Err(WtError::Config(format!(
            "unsupported endpoint URL: {endpoint} (expected https://)"
        )));
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(WtError::Config(format!("endpoint has no host: {endpoint}")));
    }
    Ok(format!("http://{authority}/fingerprint"))
}

/// Fetch and parse the peer's certificate fingerprint.
///
/// Returns `WtError::Cancelled` if `cancel` fired before or during the
/// fetch, even when the response had already arrived.
pub async fn fetch_pin(
    source: &dyn FingerprintSource,
    url: &str,
    cancel: &CancelSignal,
) -> WtResult<CertificatePin> {
    if cancel.is_cancelled() {
        return Err(WtError::Cancelled);
    }

    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(WtError::Cancelled),
        body = source.fetch(url) => body,
    };

    if cancel.is_cancelled() {
        return Err(WtError::Cancelled);
    }

    let pin = CertificatePin::from_json(&body?)?;
    debug!(url, fingerprint = %pin.to_colon_hex(), "fetched certificate fingerprint");
    Ok(pin)
}
