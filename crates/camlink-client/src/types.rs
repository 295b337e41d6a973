use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use camlink_common::helpers::{signaling_url, trust_page_url};
use camlink_common::DEFAULT_PORT;

use crate::tls::TrustPolicy;

/// Mirrors the WebSocket `readyState` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninstantiated => "UNINSTANTIATED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for HintLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One-line diagnosis of the signaling connection shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHint {
    pub level: HintLevel,
    pub message: String,
}

impl ConnectionHint {
    pub fn new(level: HintLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(HintLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(HintLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(HintLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(HintLevel::Error, message)
    }
}

impl fmt::Display for ConnectionHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Outcome of the trust-page connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestResult {
    Testing { url: String },
    Success { url: String, status: u16 },
    Failure { url: String, reason: String },
}

impl TestResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testing { url } => write!(f, "testing {url}..."),
            Self::Success { url, status } => write!(
                f,
                "reached {url} (HTTP {status}); make sure the certificate has been accepted"
            ),
            Self::Failure { url, reason } => write!(
                f,
                "could not reach {url}: {reason}; check the address, port and firewall"
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: Option<String>,
    pub port: u16,
    /// `wss://` when set; plain `ws://` for receivers started with `--no-tls`.
    pub tls: bool,
    pub devices_dir: PathBuf,
    pub fps: u32,
    pub trust: TrustPolicy,
    pub reconnect: ReconnectPolicy,
    pub ice_servers: Vec<String>,
    pub test_timeout: Duration,
    /// Pause between tearing down and re-offering after a device switch.
    pub restart_delay: Duration,
}

impl ClientConfig {
    /// Signaling endpoint for the configured host, if one is set.
    pub fn signaling_url(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let url = signaling_url(host, self.port);
        Some(if self.tls {
            url
        } else {
            url.replacen("wss://", "ws://", 1)
        })
    }

    /// Page used both for the connectivity test and for trusting the certificate.
    pub fn trust_page_url(&self) -> Option<String> {
        let host = self.host.as_deref()?;
        let url = trust_page_url(host, self.port);
        Some(if self.tls {
            url
        } else {
            url.replacen("https://", "http://", 1)
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            tls: true,
            devices_dir: PathBuf::from("cameras"),
            fps: 30,
            trust: TrustPolicy::SystemRoots,
            reconnect: ReconnectPolicy::default(),
            ice_servers: Vec::new(),
            test_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_names() {
        assert_eq!(ReadyState::Open.to_string(), "OPEN");
        assert!(ReadyState::Open.is_open());
        assert!(!ReadyState::Connecting.is_open());
    }

    #[test]
    fn test_hint_display() {
        let hint = ConnectionHint::warning("closed unexpectedly (code 1011)");
        assert_eq!(hint.to_string(), "[warning] closed unexpectedly (code 1011)");
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 5001);
        assert!(config.tls);
        assert_eq!(config.reconnect.interval, Duration::from_secs(3));
        assert_eq!(config.reconnect.max_attempts, 20);
        assert_eq!(config.test_timeout, Duration::from_secs(5));
        assert_eq!(config.restart_delay, Duration::from_millis(100));
        assert!(config.signaling_url().is_none());
    }

    #[test]
    fn test_urls_follow_tls_flag() {
        let mut config = ClientConfig {
            host: Some("192.168.1.20".into()),
            ..Default::default()
        };
        assert_eq!(config.signaling_url().unwrap(), "wss://192.168.1.20:5001");
        assert_eq!(config.trust_page_url().unwrap(), "https://192.168.1.20:5001");

        config.tls = false;
        assert_eq!(config.signaling_url().unwrap(), "ws://192.168.1.20:5001");
        assert_eq!(config.trust_page_url().unwrap(), "http://192.168.1.20:5001");
    }
}
