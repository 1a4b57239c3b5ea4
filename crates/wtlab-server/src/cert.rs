//! Self-signed certificates and their fingerprints.
//!
//! Browsers accept a certificate by hash only if it is an ECDSA certificate
//! valid for at most 14 days, so generated certificates are short-lived and
//! regenerated on demand.

use std::path::{Path, PathBuf};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::info;
use wtlab_core::{CertificatePin, WtError, WtResult};

/// Backdating applied to `not_before` to tolerate clock skew.
const CLOCK_SKEW: TimeDuration = TimeDuration::minutes(5);

fn rcgen_error(e: rcgen::Error) -> WtError {
    WtError::Other(format!("certificate generation failed: {e}"))
}

/// Generate an ECDSA P-256 certificate for `localhost`, `127.0.0.1` and
/// `::1`, valid for `validity_days`, and write `cert.pem` / `key.pem`
/// into `dir`.
pub fn generate_self_signed(dir: &Path, validity_days: u32) -> WtResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let mut params = CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(rcgen_error)?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "wtlab-server dev cert");
    let not_before = OffsetDateTime::now_utc() - CLOCK_SKEW;
    params.not_before = not_before;
    params.not_after = not_before + TimeDuration::days(i64::from(validity_days));

    let key_pair = KeyPair::generate().map_err(rcgen_error)?;
    let cert = params.self_signed(&key_pair).map_err(rcgen_error)?;

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    let pin = CertificatePin::of_certificate(cert.der());
    info!(
        cert = %cert_path.display(),
        validity_days,
        fingerprint = %pin.to_colon_hex(),
        "generated self-signed certificate"
    );
    Ok((cert_path, key_path))
}

/// SHA-256 fingerprint of the first (leaf) certificate in a PEM file.
pub fn load_pin(cert_path: &Path) -> WtResult<CertificatePin> {
    let pem = std::fs::read(cert_path).map_err(|e| {
        WtError::Config(format!("cannot read cert {}: {e}", cert_path.display()))
    })?;
    pin_from_pem(&pem)
        .map_err(|e| WtError::Config(format!("{}: {e}", cert_path.display())))
}

fn pin_from_pem(pem: &[u8]) -> WtResult<CertificatePin> {
    let leaf = rustls_pemfile::certs(&mut &pem[..])
        .next()
        .ok_or_else(|| WtError::Config("no certificate found in PEM".into()))??;
    Ok(CertificatePin::of_certificate(leaf.as_ref()))
}
