use std::time::{Duration, Instant};

use crate::net::messages::{ConnectionId, GameId, GameStateMsg, GameStatus, Seat};

/// Rounds per duel unless configured otherwise.
pub const DEFAULT_TOTAL_ROUNDS: u32 = 3;

/// Why a turn submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnError {
    /// The sender does not occupy a seat in this room.
    NotSeated,
    NotYourTurn,
    /// The room already reached a terminal status.
    GameCompleted,
}

impl std::fmt::Display for TurnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSeated => write!(f, "not seated in this game"),
            Self::NotYourTurn => write!(f, "it is not your turn"),
            Self::GameCompleted => write!(f, "game is already over"),
        }
    }
}

impl std::error::Error for TurnError {}

/// The turn a submission claims to complete: which seat, in which round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnClaim {
    pub seat: Seat,
    pub round: u32,
}

/// Effect of an accepted submission on the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnAdvance {
    /// First seat of the round moved; the other seat now holds the turn.
    NextSeat { seat: Seat },
    /// Both seats moved; the next round opens with seat A.
    NextRound { completed: u32, next: u32 },
    /// The final round finished and the room is completed.
    Finished,
}

/// Result of vacating a seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vacated {
    pub seat: Seat,
    /// Connection still seated on the other side, if any.
    pub opponent: Option<ConnectionId>,
    /// True if this vacancy moved the room from active to abandoned.
    pub abandoned: bool,
}

/// A paired two-player session and its turn state machine.
///
/// `status` only ever moves `Active -> Completed` or `Active -> Abandoned`,
/// and `completed_at` is set exactly when it leaves `Active`. Seat A always
/// opens a round, so seat B moving ends it.
#[derive(Debug, Clone)]
pub struct GameRoom {
    id: GameId,
    seat_a: Option<ConnectionId>,
    seat_b: Option<ConnectionId>,
    current_round: u32,
    current_seat: Seat,
    total_rounds: u32,
    status: GameStatus,
    completed_at: Option<Instant>,
}

impl GameRoom {
    pub fn new(id: GameId, seat_a: ConnectionId, seat_b: ConnectionId, total_rounds: u32) -> Self {
        Self {
            id,
            seat_a: Some(seat_a),
            seat_b: Some(seat_b),
            current_round: 1,
            current_seat: Seat::SeatA,
            total_rounds: total_rounds.max(1),
            status: GameStatus::Active,
            completed_at: None,
        }
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn current_seat(&self) -> Seat {
        self.current_seat
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    pub fn occupant(&self, seat: Seat) -> Option<ConnectionId> {
        match seat {
            Seat::SeatA => self.seat_a,
            Seat::SeatB => self.seat_b,
        }
    }

    pub fn seat_of(&self, conn: ConnectionId) -> Option<Seat> {
        if self.seat_a == Some(conn) {
            Some(Seat::SeatA)
        } else if self.seat_b == Some(conn) {
            Some(Seat::SeatB)
        } else {
            None
        }
    }

    /// The connection seated opposite `conn`, if both are present.
    pub fn opponent_of(&self, conn: ConnectionId) -> Option<ConnectionId> {
        self.seat_of(conn)
            .and_then(|seat| self.occupant(seat.other()))
    }

    /// Every occupied seat with its connection.
    pub fn occupants(&self) -> Vec<(Seat, ConnectionId)> {
        [Seat::SeatA, Seat::SeatB]
            .into_iter()
            .filter_map(|seat| self.occupant(seat).map(|conn| (seat, conn)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.seat_a.is_none() && self.seat_b.is_none()
    }

    /// Validate a submission from `conn` without mutating anything.
    /// `claimed_round`, when the client sends one, must match the live round.
    pub fn check_submit(
        &self,
        conn: ConnectionId,
        claimed_round: Option<u32>,
    ) -> Result<TurnClaim, TurnError> {
        if self.status.is_terminal() {
            return Err(TurnError::GameCompleted);
        }
        let seat = self.seat_of(conn).ok_or(TurnError::NotSeated)?;
        if seat != self.current_seat {
            return Err(TurnError::NotYourTurn);
        }
        if claimed_round.is_some_and(|r| r != self.current_round) {
            return Err(TurnError::NotYourTurn);
        }
        Ok(TurnClaim {
            seat,
            round: self.current_round,
        })
    }

    /// What accepting `claim` would do to the room.
    pub fn plan_advance(&self, claim: TurnClaim) -> TurnAdvance {
        match claim.seat {
            Seat::SeatA => TurnAdvance::NextSeat { seat: Seat::SeatB },
            Seat::SeatB if claim.round >= self.total_rounds => TurnAdvance::Finished,
            Seat::SeatB => TurnAdvance::NextRound {
                completed: claim.round,
                next: claim.round + 1,
            },
        }
    }

    /// Whether `claim` still describes the live turn held by `conn`. Used to
    /// re-validate after a suspension before committing.
    pub fn claim_is_current(&self, conn: ConnectionId, claim: TurnClaim) -> bool {
        self.status == GameStatus::Active
            && self.current_round == claim.round
            && self.current_seat == claim.seat
            && self.occupant(claim.seat) == Some(conn)
    }

    /// Commit an accepted submission. The caller must have confirmed
    /// [`claim_is_current`](Self::claim_is_current) under the same lock.
    pub fn apply_advance(&mut self, claim: TurnClaim, now: Instant) -> TurnAdvance {
        let advance = self.plan_advance(claim);
        match advance {
            TurnAdvance::NextSeat { seat } => self.current_seat = seat,
            TurnAdvance::NextRound { next, .. } => {
                self.current_round = next;
                self.current_seat = Seat::SeatA;
            },
            TurnAdvance::Finished => self.finish(GameStatus::Completed, now),
        }
        advance
    }

    /// Live drawing is only accepted from the seat holding the turn.
    pub fn can_draw(&self, conn: ConnectionId) -> bool {
        self.status == GameStatus::Active && self.seat_of(conn) == Some(self.current_seat)
    }

    /// Empty the seat held by `conn`. An active room becomes abandoned.
    pub fn vacate(&mut self, conn: ConnectionId, now: Instant) -> Option<Vacated> {
        let seat = self.seat_of(conn)?;
        match seat {
            Seat::SeatA => self.seat_a = None,
            Seat::SeatB => self.seat_b = None,
        }
        let abandoned = self.status == GameStatus::Active;
        if abandoned {
            self.finish(GameStatus::Abandoned, now);
        }
        Some(Vacated {
            seat,
            opponent: self.occupant(seat.other()),
            abandoned,
        })
    }

    /// Force an active room into `abandoned` (pairing fell through).
    /// Returns false if the room was already terminal.
    pub fn abandon(&mut self, now: Instant) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.finish(GameStatus::Abandoned, now);
        true
    }

    /// Terminal rooms are kept for `retention` after finishing; empty rooms
    /// have nobody left to show the final state to.
    pub fn is_removable(&self, now: Instant, retention: Duration) -> bool {
        if self.is_empty() && self.status.is_terminal() {
            return true;
        }
        self.completed_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }

    pub fn snapshot(&self) -> GameStateMsg {
        GameStateMsg {
            game_id: self.id,
            current_round: self.current_round,
            current_seat: self.current_seat,
            total_rounds: self.total_rounds,
            status: self.status,
        }
    }

    fn finish(&mut self, status: GameStatus, now: Instant) {
        self.status = status;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}
