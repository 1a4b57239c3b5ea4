//! Certificate fingerprints and the trust-pinning parameter built from them.
//!
//! The server publishes SHA-256(leaf certificate DER) as a JSON array of
//! bytes. Clients turn that array into a `CertificatePin` and hand it to
//! session creation, which then accepts exactly that certificate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{WtError, WtResult};

/// Length of a SHA-256 digest in bytes.
pub const SHA256_LEN: usize = 32;

/// Hash algorithm of a pinned certificate digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "sha-256")]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha-256",
        }
    }
}

/// Pinning parameter for session creation: `{algorithm, digest}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePin {
    pub algorithm: HashAlgorithm,
    pub digest: [u8; SHA256_LEN],
}

impl CertificatePin {
    /// Build a SHA-256 pin from raw digest bytes.
    pub fn sha256(bytes: &[u8]) -> WtResult<Self> {
        let digest: [u8; SHA256_LEN] = bytes.try_into().map_err(|_| {
            WtError::Bootstrap(format!(
                "expected {SHA256_LEN} digest bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self {
            algorithm: HashAlgorithm::Sha256,
            digest,
        })
    }

    /// Pin the given DER-encoded certificate.
    pub fn of_certificate(der: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            digest: Sha256::digest(der).into(),
        }
    }

    /// Parse the body of `GET /fingerprint`: a JSON array of byte values.
    pub fn from_json(body: &[u8]) -> WtResult<Self> {
        let bytes: Vec<u8> = serde_json::from_slice(body)?;
        Self::sha256(&bytes)
    }

    /// Parse `AB:CD:...` (the form certificate tools print).
    pub fn from_colon_hex(s: &str) -> WtResult<Self> {
        let compact: String = s.trim().split(':').collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| WtError::Bootstrap(format!("invalid fingerprint hex: {e}")))?;
        Self::sha256(&bytes)
    }

    /// JSON array body served by the fingerprint endpoint.
    pub fn to_json(&self) -> String {
        // Serializing a byte slice as a JSON array cannot fail.
        serde_json::to_string(&self.digest[..]).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn to_colon_hex(&self) -> String {
        self.digest
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for CertificatePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm.as_str(), self.to_colon_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_digest() -> Vec<u8> {
        (0..32u8).map(|i| i.wrapping_mul(10).wrapping_add(10)).collect()
    }

    #[test]
    fn parse_json_array() {
        let digest = sample_digest();
        let body = serde_json::to_vec(&digest).unwrap();
        let pin = CertificatePin::from_json(&body).unwrap();
        assert_eq!(pin.algorithm, HashAlgorithm::Sha256);
        assert_eq!(&pin.digest[..3], &[10, 20, 30]);
        assert_eq!(pin.to_json(), String::from_utf8(body).unwrap());
    }

    #[test]
    fn reject_wrong_length() {
        let err = CertificatePin::from_json(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, WtError::Bootstrap(_)));
    }

    #[test]
    fn reject_out_of_range_values() {
        let body = format!("[{}]", vec!["256"; 32].join(","));
        assert!(matches!(
            CertificatePin::from_json(body.as_bytes()),
            Err(WtError::Bootstrap(_))
        ));
    }

    #[test]
    fn reject_non_array() {
        assert!(CertificatePin::from_json(b"{\"digest\":1}").is_err());
        assert!(CertificatePin::from_json(b"<html>").is_err());
    }

    #[test]
    fn colon_hex_round_trip() {
        let pin = CertificatePin::sha256(&sample_digest()).unwrap();
        let printed = pin.to_colon_hex();
        assert!(printed.starts_with("0A:14:1E:"));
        assert_eq!(CertificatePin::from_colon_hex(&printed).unwrap(), pin);
        assert_eq!(
            CertificatePin::from_colon_hex(&printed.to_lowercase()).unwrap(),
            pin
        );
    }

    #[test]
    fn certificate_digest_is_sha256() {
        let pin = CertificatePin::of_certificate(b"");
        assert_eq!(
            hex::encode(pin.digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn pin_serializes_with_algorithm_tag() {
        let pin = CertificatePin::sha256(&[0u8; 32]).unwrap();
        let json = serde_json::to_value(&pin).unwrap();
        assert_eq!(json["algorithm"], "sha-256");
        assert_eq!(json["digest"].as_array().unwrap().len(), 32);
    }
}
