//! `wtlab fingerprint`: fetch and print a server's certificate pin.

use std::time::Duration;

use anyhow::{Context, Result};
use wtlab_client::{fetch_pin, HttpFingerprintSource};
use wtlab_core::{CancelSignal, CertificatePin};

/// Fetch the pin from `url` and print it.
pub async fn run(url: &str, timeout: Duration) -> Result<()> {
    let source = HttpFingerprintSource::new(timeout)?;
    let pin = fetch_pin(&source, url, &CancelSignal::new())
        .await
        .with_context(|| format!("failed to fetch fingerprint from {url}"))?;
    print!("{}", describe(url, &pin));
    Ok(())
}

fn describe(url: &str, pin: &CertificatePin) -> String {
    format!(
        "  {:<12} {}\n  {:<12} {}\n  {:<12} {}\n",
        "source",
        url,
        "sha-256",
        pin.to_colon_hex(),
        "json",
        pin.to_json()
    )
}
