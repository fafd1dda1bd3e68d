//! Error types for seisgulp

use thiserror::Error;

/// Result type alias for seisgulp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for seisgulp
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream source failed to deliver a chunk (network, parse, protocol)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid time range supplied by a caller
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand used by upstream implementations.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::Upstream(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::upstream("connection reset");
        assert_eq!(e.to_string(), "Upstream error: connection reset");

        let e: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(e, Error::Serialization(_)));
    }
}
