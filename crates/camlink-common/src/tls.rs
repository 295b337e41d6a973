//! Certificate fingerprints used for pinning self-signed signaling servers.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Environment variable holding the pin set (`;` or `,` separated).
pub const TLS_PINS_ENV: &str = "CAMLINK_TLS_PINS_SHA256";

/// Lowercase hex SHA-256 of a DER-encoded certificate.
pub fn fingerprint_sha256(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// Colon-separated uppercase form, as `openssl x509 -fingerprint` prints it.
pub fn display_fingerprint(hex_fingerprint: &str) -> String {
    hex_fingerprint
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}

pub fn normalize_fingerprint(input: &str) -> Result<String> {
    let normalized: String = input.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if normalized.len() != 64 {
        return Err(Error::tls(format!(
            "invalid certificate fingerprint length in {}: expected 64 hex chars",
            TLS_PINS_ENV
        )));
    }
    Ok(normalized.to_ascii_lowercase())
}

pub fn parse_pin_set(value: &str) -> Result<HashSet<String>> {
    let mut pins = HashSet::new();
    for raw in value.split([',', ';']) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        pins.insert(normalize_fingerprint(trimmed)?);
    }

    if pins.is_empty() {
        return Err(Error::tls(format!(
            "{} is set but no usable certificate fingerprints were found",
            TLS_PINS_ENV
        )));
    }
    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fingerprint_accepts_colons_and_case() {
        let fp = "AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33:44:55:66:77:88:99";
        let normalized = normalize_fingerprint(fp).expect("normalize");
        assert_eq!(normalized.len(), 64);
        assert!(normalized.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(normalized, normalized.to_ascii_lowercase());
    }

    #[test]
    fn test_parse_pin_set_multiple_entries() {
        let value = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef;aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let pins = parse_pin_set(value).expect("parse");
        assert_eq!(pins.len(), 2);
    }

    #[test]
    fn test_parse_pin_set_rejects_invalid_length() {
        assert!(parse_pin_set("abcd").is_err());
        assert!(parse_pin_set(" ; , ").is_err());
    }

    #[test]
    fn test_display_fingerprint_matches_normalized_input() {
        let fp = fingerprint_sha256(b"certificate");
        let shown = display_fingerprint(&fp);
        assert_eq!(shown.len(), 64 + 31);
        assert_eq!(normalize_fingerprint(&shown).unwrap(), fp);
    }
}
