//! How the client decides to trust the receiver's certificate.
//!
//! Receivers usually run with a self-signed certificate, so besides the
//! platform roots the client can pin leaf fingerprints or, for development,
//! accept anything.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use camlink_common::tls::{fingerprint_sha256, parse_pin_set, TLS_PINS_ENV};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig as RustlsClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_tungstenite::Connector;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrustPolicy {
    /// Platform trust store.
    #[default]
    SystemRoots,
    /// Leaf certificate SHA-256 must be one of these (lowercase hex).
    Pinned(HashSet<String>),
    /// Any certificate. Development only.
    AcceptAny,
}

impl TrustPolicy {
    /// `--insecure` wins over pins; pins come from the flag or from
    /// `CAMLINK_TLS_PINS_SHA256`.
    pub fn resolve(insecure: bool, pins: Option<&str>) -> Result<Self> {
        if insecure {
            warn!("certificate verification disabled; use only on a trusted network");
            return Ok(Self::AcceptAny);
        }
        let from_env = match std::env::var(TLS_PINS_ENV) {
            Ok(value) if !value.trim().is_empty() => Some(value),
            Ok(_) | Err(std::env::VarError::NotPresent) => None,
            Err(e) => return Err(anyhow!("failed to read {}: {e}", TLS_PINS_ENV)),
        };
        match pins.map(str::to_string).or(from_env) {
            Some(value) => Ok(Self::Pinned(parse_pin_set(&value)?)),
            None => Ok(Self::SystemRoots),
        }
    }

    pub fn verifies_chain(&self) -> bool {
        matches!(self, Self::SystemRoots)
    }

    /// `None` lets the WebSocket library use its built-in root store.
    pub fn connector(&self) -> Option<Connector> {
        let verifier = match self {
            Self::SystemRoots => return None,
            Self::Pinned(pins) => FingerprintVerifier::pinned(pins.clone()),
            Self::AcceptAny => FingerprintVerifier::accept_any(),
        };
        let config = RustlsClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        Some(Connector::Rustls(Arc::new(config)))
    }
}

#[derive(Debug)]
struct FingerprintVerifier {
    /// Empty means any certificate is accepted.
    pins: HashSet<String>,
    provider: Arc<CryptoProvider>,
}

impl FingerprintVerifier {
    fn pinned(pins: HashSet<String>) -> Self {
        Self {
            pins,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    fn accept_any() -> Self {
        Self::pinned(HashSet::new())
    }

    fn check(&self, end_entity: &[u8]) -> std::result::Result<(), String> {
        if self.pins.is_empty() {
            return Ok(());
        }
        let presented = fingerprint_sha256(end_entity);
        if self.pins.contains(&presented) {
            Ok(())
        } else {
            Err(format!(
                "certificate pin mismatch; expected one of {} configured fingerprint(s), got leaf sha256={}",
                self.pins.len(),
                presented
            ))
        }
    }
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.check(end_entity.as_ref())
            .map(|()| ServerCertVerified::assertion())
            .map_err(rustls::Error::General)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_insecure_flag_wins() {
        assert_eq!(
            TrustPolicy::resolve(true, Some(PIN)).unwrap(),
            TrustPolicy::AcceptAny
        );
    }

    #[test]
    fn test_pins_from_flag() {
        match TrustPolicy::resolve(false, Some(PIN)).unwrap() {
            TrustPolicy::Pinned(pins) => assert!(pins.contains(PIN)),
            other => panic!("unexpected policy {other:?}"),
        }
        assert!(TrustPolicy::resolve(false, Some("abcd")).is_err());
    }

    #[test]
    fn test_system_roots_use_default_connector() {
        assert!(TrustPolicy::SystemRoots.connector().is_none());
        assert!(TrustPolicy::SystemRoots.verifies_chain());
        assert!(TrustPolicy::AcceptAny.connector().is_some());
    }

    #[test]
    fn test_fingerprint_check() {
        let cert = b"not really a certificate";
        let pin = fingerprint_sha256(cert);

        let verifier = FingerprintVerifier::pinned([pin].into_iter().collect());
        assert!(verifier.check(cert).is_ok());
        let err = verifier.check(b"another certificate").unwrap_err();
        assert!(err.contains("pin mismatch"));

        assert!(FingerprintVerifier::accept_any().check(cert).is_ok());
    }
}
