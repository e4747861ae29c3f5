//! Error types for the drone uplink

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in drone uplink operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling transport failure (dial, read or write)
    #[error("Signaling transport error: {0}")]
    Transport(String),

    /// Malformed envelope or payload
    #[error("Malformed signaling payload: {0}")]
    Decode(String),

    /// Failure reported by the connectivity engine
    #[error("Connectivity engine error: {0}")]
    Engine(String),

    /// Media relay failure
    #[error("Media relay error: {0}")]
    Relay(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error came from the connectivity engine
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Error::Engine(_))
    }
}
