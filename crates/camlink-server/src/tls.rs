use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use camlink_common::tls::fingerprint_sha256;
use rustls::ServerConfig as RustlsServerConfig;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsFiles;

/// TLS acceptor plus the SHA-256 fingerprint of the leaf certificate.
#[derive(Clone)]
pub struct ServerTls {
    pub acceptor: TlsAcceptor,
    pub fingerprint: String,
}

/// Shell command that creates a self-signed pair at the configured paths.
pub fn self_signed_command(files: &TlsFiles) -> String {
    format!(
        "openssl req -x509 -newkey rsa:2048 -keyout {} -out {} -sha256 -days 3650 -nodes -subj \"/CN=localhost\"",
        files.key.display(),
        files.cert.display()
    )
}

pub fn load_server_tls(files: &TlsFiles) -> Result<ServerTls> {
    let missing: Vec<&Path> = [files.cert.as_path(), files.key.as_path()]
        .into_iter()
        .filter(|path| !path.exists())
        .collect();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
        return Err(anyhow!(
            "TLS certificate files not found: {}\ngenerate a self-signed pair with:\n  {}\nor start with --no-tls for plain ws:// on a trusted network",
            names.join(", "),
            self_signed_command(files)
        ));
    }

    let certs = read_certs(&files.cert)?;
    let key = read_key(&files.key)?;
    let fingerprint = fingerprint_sha256(certs[0].as_ref());

    let mut config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("certificate and private key do not form a usable pair")?;
    // Upgrades ride on HTTP/1.1; never negotiate h2.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(ServerTls {
        acceptor: TlsAcceptor::from(Arc::new(config)),
        fingerprint,
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("parse certificates in {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificates found in {}", path.display()));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("parse private key in {}", path.display()))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn test_missing_files_explain_how_to_generate_them() {
        let dir = tempfile::tempdir().unwrap();
        let files = TlsFiles {
            cert: dir.path().join("cert.pem"),
            key: dir.path().join("key.pem"),
        };
        let message = load_server_tls(&files).err().unwrap().to_string();
        assert!(message.contains("openssl req -x509"));
        assert!(message.contains("cert.pem"));
        assert!(message.contains("--no-tls"));
    }

    #[test]
    fn test_loads_fixture_pair() {
        let files = TlsFiles {
            cert: fixture("cert.pem"),
            key: fixture("key.pem"),
        };
        let tls = load_server_tls(&files).unwrap();
        assert_eq!(
            tls.fingerprint,
            "94a5f1ed783e6191eb3d08f9bab330fb6eca8834ccf559ad39f5de5531c1c39e"
        );
    }

    #[test]
    fn test_swapped_files_are_rejected() {
        let files = TlsFiles {
            cert: fixture("key.pem"),
            key: fixture("cert.pem"),
        };
        assert!(load_server_tls(&files).is_err());
    }
}
