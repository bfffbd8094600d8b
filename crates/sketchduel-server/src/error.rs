use sketchduel_core::net::messages::{ErrorCode, GameId, ServerMessage};
use sketchduel_core::net::protocol::ProtocolError;
use sketchduel_core::room::TurnError;
use sketchduel_core::stroke::StrokeError;

use crate::persistence::PersistenceError;

/// Everything a message handler can refuse with. Each variant becomes one
/// `error{message,code}` frame to the sender; none of them are fatal.
#[derive(Debug)]
pub enum SessionError {
    Protocol(ProtocolError),
    InvalidStroke(StrokeError),
    NotInGame,
    RoomNotFound(GameId),
    AlreadyInGame,
    AlreadyInQueue,
    Turn(TurnError),
    RateLimited,
    SubmitFailed(PersistenceError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol(e) => e.code(),
            Self::InvalidStroke(_) => ErrorCode::InvalidStroke,
            Self::NotInGame | Self::Turn(TurnError::NotSeated) => ErrorCode::NotInGame,
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::AlreadyInGame => ErrorCode::AlreadyInGame,
            Self::AlreadyInQueue => ErrorCode::AlreadyInQueue,
            Self::Turn(TurnError::NotYourTurn) => ErrorCode::NotYourTurn,
            Self::Turn(TurnError::GameCompleted) => ErrorCode::GameCompleted,
            Self::RateLimited => ErrorCode::RateLimited,
            Self::SubmitFailed(_) => ErrorCode::SubmitFailed,
        }
    }

    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::error(self.code(), self.to_string())
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "{e}"),
            Self::InvalidStroke(e) => write!(f, "{e}"),
            Self::NotInGame => write!(f, "not in a game"),
            Self::RoomNotFound(id) => write!(f, "game {id} no longer exists"),
            Self::AlreadyInGame => write!(f, "already in a game"),
            Self::AlreadyInQueue => write!(f, "already waiting in the queue"),
            Self::Turn(e) => write!(f, "{e}"),
            Self::RateLimited => write!(f, "too many messages, slow down"),
            // Store internals stay in the logs.
            Self::SubmitFailed(_) => write!(f, "turn could not be saved, please retry"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<StrokeError> for SessionError {
    fn from(e: StrokeError) -> Self {
        Self::InvalidStroke(e)
    }
}

impl From<TurnError> for SessionError {
    fn from(e: TurnError) -> Self {
        Self::Turn(e)
    }
}

impl From<PersistenceError> for SessionError {
    fn from(e: PersistenceError) -> Self {
        Self::SubmitFailed(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(
            SessionError::from(ProtocolError::InvalidEncoding).code(),
            ErrorCode::InvalidEncoding
        );
        assert_eq!(
            SessionError::from(TurnError::NotSeated).code(),
            ErrorCode::NotInGame
        );
        assert_eq!(
            SessionError::from(TurnError::GameCompleted).code(),
            ErrorCode::GameCompleted
        );
        assert_eq!(
            SessionError::from(StrokeError::BadWidth).code(),
            ErrorCode::InvalidStroke
        );
    }

    #[test]
    fn submit_failure_hides_store_detail() {
        let err = SessionError::from(PersistenceError::Unavailable("db password wrong".into()));
        let ServerMessage::Error(msg) = err.to_message() else {
            panic!("expected error frame");
        };
        assert_eq!(msg.code, ErrorCode::SubmitFailed);
        assert!(!msg.message.contains("password"));
    }
}
