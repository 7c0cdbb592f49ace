//! Domain errors raised by room operations, mapped onto the wire [`ErrorCode`] set.

use duel_core::protocol::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room not found")]
    RoomNotFound,
    #[error("game already in progress")]
    GameInProgress,
    #[error("room is full")]
    RoomFull,
    #[error("not in a room")]
    NotInRoom,
    #[error("not your turn")]
    NotYourTurn,
    #[error("rate limit exceeded")]
    RateLimit,
    #[error("kicked for repeated rate-limit violations")]
    Kicked,
    #[error("player not found")]
    PlayerNotFound,
    #[error("player is not disconnected")]
    NotDisconnected,
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::RoomNotFound => ErrorCode::RoomNotFound,
            RoomError::GameInProgress => ErrorCode::GameInProgress,
            RoomError::RoomFull => ErrorCode::RoomFull,
            RoomError::NotInRoom => ErrorCode::NotInRoom,
            RoomError::NotYourTurn => ErrorCode::NotYourTurn,
            RoomError::RateLimit => ErrorCode::RateLimit,
            RoomError::Kicked => ErrorCode::Kicked,
            RoomError::PlayerNotFound => ErrorCode::PlayerNotFound,
            RoomError::NotDisconnected => ErrorCode::NotDisconnected,
        }
    }
}
