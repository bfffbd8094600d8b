//! Durable record of games and turns.
//!
//! The live room table stays authoritative for turn arbitration; the store is
//! written through on every accepted transition and every call may fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use sketchduel_core::net::messages::{GameId, GameStatus, Seat, TurnStroke};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    Unavailable(String),
    NotFound(GameId),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(m) => write!(f, "store unavailable: {m}"),
            Self::NotFound(id) => write!(f, "game {id} not found"),
        }
    }
}

impl std::error::Error for PersistenceError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRecord {
    pub id: GameId,
    pub current_round: u32,
    pub current_seat: Seat,
    pub total_rounds: u32,
    pub status: GameStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameUpdate {
    pub current_round: Option<u32>,
    pub current_seat: Option<Seat>,
    pub status: Option<GameStatus>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GameUpdate {
    pub fn turn(round: u32, seat: Seat) -> Self {
        Self {
            current_round: Some(round),
            current_seat: Some(seat),
            ..Self::default()
        }
    }

    pub fn finished(status: GameStatus) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub game_id: GameId,
    pub seat: Seat,
    pub round: u32,
    pub strokes: Vec<TurnStroke>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRecord {
    pub id: Uuid,
    pub game_id: GameId,
    pub seat: Seat,
    pub round: u32,
    pub strokes: Vec<TurnStroke>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait GameStore: Send + Sync {
    async fn create_game(&self, total_rounds: u32) -> Result<GameRecord, PersistenceError>;

    async fn update_game(
        &self,
        id: GameId,
        update: GameUpdate,
    ) -> Result<GameRecord, PersistenceError>;

    async fn create_turn(&self, turn: NewTurn) -> Result<TurnRecord, PersistenceError>;
}

/// Process-local store. Turns are append-only.
#[derive(Default)]
pub struct InMemoryGameStore {
    games: RwLock<HashMap<GameId, GameRecord>>,
    turns: RwLock<Vec<TurnRecord>>,
    fail_next: AtomicU32,
    fail_next_update: AtomicU32,
    delay: RwLock<Option<Duration>>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `update_game` calls fail, leaving other calls alone.
    pub fn fail_next_update(&self, n: u32) {
        self.fail_next_update.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every call before answering.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write().await = delay;
    }

    pub async fn game(&self, id: GameId) -> Option<GameRecord> {
        self.games.read().await.get(&id).cloned()
    }

    pub async fn game_count(&self) -> usize {
        self.games.read().await.len()
    }

    pub async fn turns_for(&self, id: GameId) -> Vec<TurnRecord> {
        self.turns
            .read()
            .await
            .iter()
            .filter(|t| t.game_id == id)
            .cloned()
            .collect()
    }

    async fn enter(&self) -> Result<(), PersistenceError> {
        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_one(&self.fail_next) {
            return Err(PersistenceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl GameStore for InMemoryGameStore {
    async fn create_game(&self, total_rounds: u32) -> Result<GameRecord, PersistenceError> {
        self.enter().await?;
        let now = Utc::now();
        let record = GameRecord {
            id: Uuid::new_v4(),
            current_round: 1,
            current_seat: Seat::SeatA,
            total_rounds,
            status: GameStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.games.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_game(
        &self,
        id: GameId,
        update: GameUpdate,
    ) -> Result<GameRecord, PersistenceError> {
        self.enter().await?;
        if take_one(&self.fail_next_update) {
            return Err(PersistenceError::Unavailable("injected update failure".into()));
        }
        let mut games = self.games.write().await;
        let record = games.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
        if let Some(round) = update.current_round {
            record.current_round = round;
        }
        if let Some(seat) = update.current_seat {
            record.current_seat = seat;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(at) = update.completed_at {
            record.completed_at = Some(at);
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn create_turn(&self, turn: NewTurn) -> Result<TurnRecord, PersistenceError> {
        self.enter().await?;
        if !self.games.read().await.contains_key(&turn.game_id) {
            return Err(PersistenceError::NotFound(turn.game_id));
        }
        let record = TurnRecord {
            id: Uuid::new_v4(),
            game_id: turn.game_id,
            seat: turn.seat,
            round: turn.round,
            strokes: turn.strokes,
            created_at: Utc::now(),
        };
        self.turns.write().await.push(record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_update_and_record_turns() {
        let store = InMemoryGameStore::new();
        let game = store.create_game(3).await.unwrap();
        assert_eq!(game.status, GameStatus::Active);
        assert_eq!(game.current_round, 1);

        let updated = store
            .update_game(game.id, GameUpdate::turn(1, Seat::SeatB))
            .await
            .unwrap();
        assert_eq!(updated.current_seat, Seat::SeatB);
        assert_eq!(updated.status, GameStatus::Active);

        store
            .create_turn(NewTurn {
                game_id: game.id,
                seat: Seat::SeatA,
                round: 1,
                strokes: vec![],
            })
            .await
            .unwrap();
        assert_eq!(store.turns_for(game.id).await.len(), 1);

        let done = store
            .update_game(game.id, GameUpdate::finished(GameStatus::Completed))
            .await
            .unwrap();
        assert_eq!(done.status, GameStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let store = InMemoryGameStore::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.update_game(id, GameUpdate::default()).await,
            Err(PersistenceError::NotFound(id))
        );
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryGameStore::new();
        store.fail_next(2);
        assert!(store.create_game(3).await.is_err());
        assert!(store.create_game(3).await.is_err());
        assert!(store.create_game(3).await.is_ok());
        assert_eq!(store.game_count().await, 1);
    }
}
