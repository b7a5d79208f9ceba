//! Error types for the room layer.

use std::error::Error;

use parlor_protocol::{PlayerId, ProtocolError, RoomCode, RoomId, RoomPhase};

/// Result alias for collaborator calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// A collaborator (store, player directory, config source) failed.
///
/// The room engine never retries these. Failures inside a Drive are
/// logged and swallowed; failures inside a caller-driven operation are
/// surfaced as a generic server error.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    /// A snapshot or room-code record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// Every attempt to draw an unused room code collided.
    #[error("no free room code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
}

impl ServiceError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        ServiceError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// Errors returned by room and room-manager operations.
///
/// Room operations return these to the manager, which hands them to
/// the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    // -- capacity / validation ---------------------------------------------
    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("room limit of {limit} reached")]
    CapacityReached { limit: usize },

    #[error("seat {index} is out of range")]
    InvalidSeat { index: usize },

    #[error("seat {index} is taken")]
    SeatTaken { index: usize },

    #[error("amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfRange { amount: i64, min: i64, max: i64 },

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("the paying party cannot cover the room fee")]
    PayerCannotCover,

    #[error("player {0} just left room {1}")]
    RecentlyLeft(PlayerId, RoomId),

    // -- not found / state -------------------------------------------------
    #[error("room {0} not found")]
    NotFound(RoomId),

    #[error("no room with code {0}")]
    UnknownCode(RoomCode),

    #[error("player {0} is not in room {1}")]
    NotInRoom(PlayerId, RoomId),

    #[error("player {0} is not in any room")]
    NotInAnyRoom(PlayerId),

    #[error("player {player} is already in room {room}")]
    InOtherRoom { player: PlayerId, room: RoomId },

    #[error("player {0} already holds a table seat in room {1}")]
    AlreadySeated(PlayerId, RoomId),

    #[error("player {0} has not bought in")]
    NotBoughtIn(PlayerId),

    #[error("{action} is not allowed during {phase}")]
    PhaseForbidden { action: &'static str, phase: RoomPhase },

    #[error("room {0} is dissolved")]
    RoomDead(RoomId),

    #[error("invalid room state: {0}")]
    InvalidState(String),

    // -- server side -------------------------------------------------------
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// An invariant the engine relies on does not hold. Points at a
    /// configuration or bootstrap defect.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Returns `true` when the client can render the reason itself.
    /// Everything else is reported as a generic server error.
    pub fn is_client_actionable(&self) -> bool {
        !matches!(
            self,
            Self::Unavailable(_) | Self::Service(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_actionable_split() {
        assert!(RoomError::RoomFull(RoomId(1)).is_client_actionable());
        assert!(
            RoomError::PhaseForbidden {
                action: "exit",
                phase: RoomPhase::Game(0)
            }
            .is_client_actionable()
        );
        assert!(!RoomError::Internal("short table".into()).is_client_actionable());
        let io = std::io::Error::other("down");
        assert!(!RoomError::from(ServiceError::unavailable("store", io)).is_client_actionable());
    }

    #[test]
    fn test_amount_out_of_range_message() {
        let err = RoomError::AmountOutOfRange {
            amount: 500,
            min: 1000,
            max: 100_000,
        };
        assert_eq!(err.to_string(), "amount 500 outside allowed range [1000, 100000]");
    }
}
