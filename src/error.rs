use thiserror::Error;

/// Errors that can occur around the eBike decoding core
///
/// The decoder, aggregator and encoders themselves never fail: malformed
/// input degrades to partial results. These errors come from the edges:
/// capture parsing, file access and delivery to collaborators.
#[derive(Error, Debug)]
pub enum EbikeError {
    /// A hex dump could not be decoded
    #[error("Invalid hex data: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// A capture line did not contain any recognizable payload
    #[error("Unrecognized capture line: {0}")]
    UnrecognizedLine(String),

    /// Status sink rejected an update
    #[error("Status sink error: {0}")]
    Sink(String),

    /// Invalid firmware profile or session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A record could not be serialized for export
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for eBike operations
pub type Result<T> = std::result::Result<T, EbikeError>;

impl EbikeError {
    /// Check if processing can continue after this error
    ///
    /// Bad capture lines and sink hiccups only lose one item; the session keeps
    /// running.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidHex(_) | Self::UnrecognizedLine(_) | Self::Sink(_)
        )
    }
}
