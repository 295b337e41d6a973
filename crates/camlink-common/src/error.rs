//! Common error types for Camlink.

use thiserror::Error;

/// Result type alias using Camlink's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Camlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Signaling message (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS setup or certificate error
    #[error("tls error: {0}")]
    Tls(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a TLS error from any displayable type.
    pub fn tls(msg: impl std::fmt::Display) -> Self {
        Self::Tls(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_map_to_serialization() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("serialization error"));
    }
}
