use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use camlink_common::{Error, Result, DEFAULT_PORT};
use camlink_media::RecorderConfig;

/// Frames buffered between the receivers and the display loop.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 30;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PLI_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            cert: PathBuf::from("cert.pem"),
            key: PathBuf::from("key.pem"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// `None` serves plain `ws://` and `http://`.
    pub tls: Option<TlsFiles>,
    pub ice_servers: Vec<String>,
    pub frame_queue_capacity: usize,
    pub recorder: Option<RecorderConfig>,
    pub stats_interval: Duration,
    pub pli_interval: Duration,
    pub max_message_bytes: usize,
    pub mdns: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            tls: Some(TlsFiles::default()),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            recorder: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
            pli_interval: DEFAULT_PLI_INTERVAL,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            mdns: true,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_queue_capacity == 0 {
            return Err(Error::config("frame queue capacity must be at least 1"));
        }
        if self.stats_interval.is_zero() {
            return Err(Error::config("stats interval must be non-zero"));
        }
        if self.pli_interval.is_zero() {
            return Err(Error::config("picture loss interval must be non-zero"));
        }
        if self.max_message_bytes < 1024 {
            return Err(Error::config("max message size must be at least 1024 bytes"));
        }
        for url in &self.ice_servers {
            let lower = url.to_ascii_lowercase();
            if !(lower.starts_with("stun:") || lower.starts_with("turn:") || lower.starts_with("turns:")) {
                return Err(Error::config(format!("unsupported ICE server URL: {url}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_published_endpoints() {
        let config = ServerConfig::default();
        assert_eq!(config.listen.port(), 5001);
        assert_eq!(config.frame_queue_capacity, 30);
        assert_eq!(config.tls, Some(TlsFiles::default()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServerConfig {
            frame_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.frame_queue_capacity = 30;
        config.ice_servers = vec!["http://example.com".into()];
        assert!(config.validate().is_err());

        config.ice_servers.clear();
        config.tls = None;
        assert!(config.validate().is_ok());
    }
}
