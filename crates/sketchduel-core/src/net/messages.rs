use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a persisted game; a live room shares its game's id.
pub type GameId = Uuid;

/// Server-assigned identifier for one live socket.
pub type ConnectionId = u64;

/// One of the two fixed turn-holder slots in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    #[serde(rename = "seatA")]
    SeatA,
    #[serde(rename = "seatB")]
    SeatB,
}

impl Seat {
    pub fn other(self) -> Self {
        match self {
            Self::SeatA => Self::SeatB,
            Self::SeatB => Self::SeatA,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SeatA => "seatA",
            Self::SeatB => "seatB",
        }
    }
}

impl std::fmt::Display for Seat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a room. `Completed` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Active,
    Completed,
    Abandoned,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Completed => f.write_str("completed"),
            Self::Abandoned => f.write_str("abandoned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A finished stroke as submitted at the end of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnStroke {
    pub points: Vec<Point>,
    pub color: String,
    pub width: f64,
}

/// An in-progress stroke relayed live to the opponent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStroke {
    pub id: String,
    pub path: String,
    pub color: String,
    pub stroke_width: f64,
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinQueue,
    LeaveQueue,
    DrawStroke(DrawStrokeMsg),
    DrawUndo,
    DrawClear,
    SubmitTurn(SubmitTurnMsg),
    Ping,
}

impl ClientMessage {
    /// Wire name of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinQueue => "join_queue",
            Self::LeaveQueue => "leave_queue",
            Self::DrawStroke(_) => "draw_stroke",
            Self::DrawUndo => "draw_undo",
            Self::DrawClear => "draw_clear",
            Self::SubmitTurn(_) => "submit_turn",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawStrokeMsg {
    pub stroke: LiveStroke,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTurnMsg {
    pub strokes: Vec<TurnStroke>,
    /// Round the client believes it is drawing for. Lets a retried
    /// submission be recognised as stale once the room has moved on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    QueueJoined(QueueJoinedMsg),
    QueueLeft,
    MatchFound(MatchFoundMsg),
    GameState(GameStateMsg),
    TurnSubmitted(TurnSubmittedMsg),
    RoundComplete(RoundCompleteMsg),
    GameComplete(GameCompleteMsg),
    OpponentStroke(OpponentStrokeMsg),
    OpponentClear,
    OpponentUndo,
    OpponentDisconnected,
    Error(ErrorMsg),
    Pong,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorMsg {
            message: message.into(),
            code,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueJoinedMsg {
    /// 1-based position in the waiting line.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFoundMsg {
    pub game_id: GameId,
    pub seat: Seat,
    pub opponent_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateMsg {
    pub game_id: GameId,
    pub current_round: u32,
    pub current_seat: Seat,
    pub total_rounds: u32,
    pub status: GameStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnSubmittedMsg {
    pub seat: Seat,
    pub round: u32,
    pub strokes: Vec<TurnStroke>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundCompleteMsg {
    pub round: u32,
    pub next_round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCompleteMsg {
    pub game_id: GameId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentStrokeMsg {
    pub stroke: LiveStroke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub message: String,
    pub code: ErrorCode,
}

/// Closed set of error codes delivered in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Protocol / input
    InvalidEncoding,
    MessageTooLarge,
    InvalidJson,
    ValidationFailed,
    InvalidStroke,
    // Session
    NotInGame,
    RoomNotFound,
    AlreadyInGame,
    AlreadyInQueue,
    // Turn order
    NotYourTurn,
    GameCompleted,
    // Throughput
    RateLimited,
    // Infrastructure
    SubmitFailed,
    MatchmakingTimeout,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidEncoding => "INVALID_ENCODING",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::InvalidJson => "INVALID_JSON",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::InvalidStroke => "INVALID_STROKE",
            Self::NotInGame => "NOT_IN_GAME",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::AlreadyInGame => "ALREADY_IN_GAME",
            Self::AlreadyInQueue => "ALREADY_IN_QUEUE",
            Self::NotYourTurn => "NOT_YOUR_TURN",
            Self::GameCompleted => "GAME_COMPLETED",
            Self::RateLimited => "RATE_LIMITED",
            Self::SubmitFailed => "SUBMIT_FAILED",
            Self::MatchmakingTimeout => "MATCHMAKING_TIMEOUT",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
