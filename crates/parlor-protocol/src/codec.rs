//! Codecs for persisted room snapshots and room-code records.
//!
//! The room engine never prescribes a byte format. It only needs
//! something that implements [`Codec`] and round-trips a snapshot
//! losslessly. [`JsonCodec`] is the default: readable in the store,
//! easy to inspect when a room misbehaves.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes them back.
///
/// `Send + Sync + 'static` because a codec lives inside long-running
/// room tasks and is shared between them.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value can't be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ## Example
///
/// ```rust
/// use parlor_protocol::{Codec, JsonCodec, RoomEvent, RoomId};
///
/// let codec = JsonCodec;
/// let event = RoomEvent::Dissolved { room_id: RoomId(3) };
///
/// let bytes = codec.encode(&event).unwrap();
/// let decoded: RoomEvent = codec.decode(&bytes).unwrap();
/// assert_eq!(event, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{PlayerId, RoomId};

    #[test]
    fn test_decode_truncated_input_is_decode_error() {
        let codec = JsonCodec;
        let result: Result<RoomId, _> = codec.decode(b"{\"broken");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_wrong_type_is_decode_error() {
        let codec = JsonCodec;
        let result: Result<PlayerId, _> = codec.decode(b"\"not a number\"");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
