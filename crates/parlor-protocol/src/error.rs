//! Error types for the protocol layer.

/// Errors raised while encoding or decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed bytes, missing fields or
    /// truncated input.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The value decoded but violates a protocol rule (for example a
    /// room code outside the six digit range).
    #[error("invalid value: {0}")]
    Invalid(String),
}
