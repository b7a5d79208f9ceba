//! Unified error type for the Parlor facade.

use parlor_protocol::ProtocolError;
use parlor_room::{RoomError, ServiceError};
use parlor_session::SessionError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `parlor` facade you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute
/// on each variant lets `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ParlorError {
    /// Encoding or decoding a persisted value failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (unknown player, bad reconnection token).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A room-level error (full, not found, wrong phase).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// A collaborator call failed, such as the component router.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Waiting for the shutdown signal failed.
    #[error("shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ParlorError {
    /// Returns `true` when the client can render the reason itself.
    pub fn is_client_actionable(&self) -> bool {
        match self {
            Self::Room(err) => err.is_client_actionable(),
            Self::Session(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use parlor_protocol::{PlayerId, RoomId};

    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::Invalid("bad code".into());
        let parlor_err: ParlorError = err.into();
        assert!(matches!(parlor_err, ParlorError::Protocol(_)));
        assert!(parlor_err.to_string().contains("bad code"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(PlayerId(3));
        let parlor_err: ParlorError = err.into();
        assert!(matches!(parlor_err, ParlorError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::NotFound(RoomId(1));
        let parlor_err: ParlorError = err.into();
        assert!(matches!(parlor_err, ParlorError::Room(_)));
        assert!(parlor_err.is_client_actionable());
    }

    #[test]
    fn test_service_errors_are_generic() {
        let err = ServiceError::CodeSpaceExhausted { attempts: 10 };
        let parlor_err: ParlorError = err.into();
        assert!(!parlor_err.is_client_actionable());

        let wrapped: ParlorError = RoomError::Unavailable(RoomId(2)).into();
        assert!(!wrapped.is_client_actionable());
    }
}
