//! Client half of the duel protocol: the local view of the session, the
//! guards that keep a client from sending messages the server would reject,
//! and the reconnect / resubmit timing policies.
//!
//! The view tolerates at-least-once delivery: `game_state` is applied as an
//! idempotent snapshot and is the resynchronisation signal after any doubt.

use std::time::Duration;

use crate::net::messages::{
    ClientMessage, ErrorCode, GameId, GameStatus, Seat, ServerMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Queued,
    Matched,
    Playing,
    Completed,
}

/// Why a local send was refused before touching the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    NotConnected,
    AlreadyQueued,
    NotQueued,
    InGame,
    NotPlaying,
    NotYourTurn,
    /// A turn submission is still waiting for its acknowledgement.
    SubmitPending,
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::AlreadyQueued => write!(f, "already waiting in the queue"),
            Self::NotQueued => write!(f, "not in the queue"),
            Self::InGame => write!(f, "already in a game"),
            Self::NotPlaying => write!(f, "no game in progress"),
            Self::NotYourTurn => write!(f, "not your turn"),
            Self::SubmitPending => write!(f, "previous turn still awaiting acknowledgement"),
        }
    }
}

impl std::error::Error for GuardError {}

/// What the client knows about its current game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameView {
    pub game_id: GameId,
    pub seat: Seat,
    pub opponent_name: String,
    pub current_round: u32,
    pub current_seat: Seat,
    pub total_rounds: u32,
    pub status: GameStatus,
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    link: LinkState,
    phase: Phase,
    game: Option<GameView>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            link: LinkState::Disconnected,
            phase: Phase::Idle,
            game: None,
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn game(&self) -> Option<&GameView> {
        self.game.as_ref()
    }

    pub fn on_connecting(&mut self) {
        self.link = LinkState::Connecting;
    }

    pub fn on_connected(&mut self) {
        self.link = LinkState::Connected;
    }

    /// The server drops queue entries and abandons rooms when a socket goes
    /// away, so nothing session-scoped survives a disconnect.
    pub fn on_disconnected(&mut self) {
        self.link = LinkState::Disconnected;
        self.phase = Phase::Idle;
        self.game = None;
    }

    pub fn is_my_turn(&self) -> bool {
        self.phase == Phase::Playing
            && self
                .game
                .as_ref()
                .is_some_and(|g| g.status == GameStatus::Active && g.current_seat == g.seat)
    }

    /// Local mirror of the server's checks for `msg`.
    pub fn guard(&self, msg: &ClientMessage) -> Result<(), GuardError> {
        if self.link != LinkState::Connected {
            return Err(GuardError::NotConnected);
        }
        match msg {
            ClientMessage::Ping => Ok(()),
            ClientMessage::JoinQueue => match self.phase {
                Phase::Idle | Phase::Completed => Ok(()),
                Phase::Queued => Err(GuardError::AlreadyQueued),
                Phase::Matched | Phase::Playing => Err(GuardError::InGame),
            },
            ClientMessage::LeaveQueue => {
                if self.phase == Phase::Queued {
                    Ok(())
                } else {
                    Err(GuardError::NotQueued)
                }
            },
            ClientMessage::DrawStroke(_)
            | ClientMessage::DrawUndo
            | ClientMessage::DrawClear
            | ClientMessage::SubmitTurn(_) => {
                if self.phase != Phase::Playing {
                    Err(GuardError::NotPlaying)
                } else if !self.is_my_turn() {
                    Err(GuardError::NotYourTurn)
                } else {
                    Ok(())
                }
            },
        }
    }

    /// Fold one server message into the local view.
    pub fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::QueueJoined(_) => {
                self.phase = Phase::Queued;
                self.game = None;
            },
            ServerMessage::QueueLeft => self.phase = Phase::Idle,
            ServerMessage::MatchFound(m) => {
                self.phase = Phase::Matched;
                self.game = Some(GameView {
                    game_id: m.game_id,
                    seat: m.seat,
                    opponent_name: m.opponent_name.clone(),
                    current_round: 1,
                    current_seat: Seat::SeatA,
                    total_rounds: 0,
                    status: GameStatus::Active,
                });
            },
            ServerMessage::GameState(state) => {
                let Some(game) = self.game.as_mut().filter(|g| g.game_id == state.game_id) else {
                    tracing::debug!(game_id = %state.game_id, "Ignoring state for unknown game");
                    return;
                };
                game.current_round = state.current_round;
                game.current_seat = state.current_seat;
                game.total_rounds = state.total_rounds;
                game.status = state.status;
                self.phase = if state.status.is_terminal() {
                    Phase::Completed
                } else {
                    Phase::Playing
                };
            },
            ServerMessage::GameComplete(done) => {
                if let Some(game) = self.game.as_mut().filter(|g| g.game_id == done.game_id) {
                    game.status = GameStatus::Completed;
                    self.phase = Phase::Completed;
                }
            },
            ServerMessage::OpponentDisconnected => {
                if let Some(game) = self.game.as_mut()
                    && game.status == GameStatus::Active
                {
                    game.status = GameStatus::Abandoned;
                }
                if matches!(self.phase, Phase::Matched | Phase::Playing) {
                    self.phase = Phase::Completed;
                }
            },
            ServerMessage::Error(err) => match err.code {
                ErrorCode::MatchmakingTimeout => self.phase = Phase::Idle,
                ErrorCode::AlreadyInQueue => self.phase = Phase::Queued,
                ErrorCode::GameCompleted => {
                    if let Some(game) = self.game.as_mut()
                        && game.status == GameStatus::Active
                    {
                        game.status = GameStatus::Completed;
                    }
                    self.phase = Phase::Completed;
                },
                _ => {},
            },
            ServerMessage::TurnSubmitted(_)
            | ServerMessage::RoundComplete(_)
            | ServerMessage::OpponentStroke(_)
            | ServerMessage::OpponentClear
            | ServerMessage::OpponentUndo
            | ServerMessage::Pong => {},
        }
    }
}

/// Exponential reconnect delay: `base * factor^attempt`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: u32,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 2,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(self.factor.saturating_pow(self.attempt))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Resubmission policy for `submit_turn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total sends including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// How long to wait for the `turn_submitted` echo before resending.
    pub ack_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before resend number `attempt` (1 = first resend), or `None`
    /// once the attempts are used up. `sent` counts sends so far.
    pub fn next_retry(&self, sent: u32) -> Option<Duration> {
        if sent >= self.max_attempts {
            return None;
        }
        let exp = sent.saturating_sub(1);
        Some(self.initial_delay.saturating_mul(2u32.saturating_pow(exp)))
    }
}
