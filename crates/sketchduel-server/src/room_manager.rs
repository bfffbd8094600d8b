//! Table of live rooms and the handlers that mutate them.
//!
//! Each room sits behind its own mutex. Handlers that call the store follow
//! the same shape: validate under the lock, release it, await the store,
//! re-lock and check the claim still describes the live turn, then commit or
//! abort. Lock order is room, then room table, then connection registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use sketchduel_core::net::messages::{
    ConnectionId, GameCompleteMsg, GameId, GameStatus, LiveStroke, MatchFoundMsg,
    OpponentStrokeMsg, RoundCompleteMsg, Seat, ServerMessage, TurnStroke, TurnSubmittedMsg,
};
use sketchduel_core::room::{GameRoom, TurnAdvance, TurnClaim, TurnError};

use crate::connections::{ConnectionRegistry, RoomBinding};
use crate::error::SessionError;
use crate::persistence::{GameStore, GameUpdate, NewTurn};

pub type SharedRoom = Arc<Mutex<GameRoom>>;

/// Live drawing event relayed to the opponent of the turn holder.
#[derive(Debug, Clone)]
pub enum DrawRelay {
    Stroke(LiveStroke),
    Undo,
    Clear,
}

impl DrawRelay {
    fn into_message(self) -> ServerMessage {
        match self {
            Self::Stroke(stroke) => ServerMessage::OpponentStroke(OpponentStrokeMsg { stroke }),
            Self::Undo => ServerMessage::OpponentUndo,
            Self::Clear => ServerMessage::OpponentClear,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub active: usize,
    /// Finished or abandoned rooms waiting out their retention window.
    pub retained: usize,
}

#[derive(Default)]
pub struct RoomManager {
    rooms: RwLock<HashMap<GameId, SharedRoom>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: GameId) -> Option<SharedRoom> {
        self.rooms.read().await.get(&id).map(Arc::clone)
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    pub async fn stats(&self) -> RoomStats {
        let rooms: Vec<SharedRoom> = self.rooms.read().await.values().map(Arc::clone).collect();
        let mut stats = RoomStats::default();
        for room in rooms {
            if room.lock().await.status() == GameStatus::Active {
                stats.active += 1;
            } else {
                stats.retained += 1;
            }
        }
        stats
    }

    /// Publish the live room for a freshly persisted game, bind both players
    /// and send each of them `match_found` followed by `game_state`. Returns
    /// false, leaving nothing behind, if either player is gone or already
    /// bound.
    pub async fn open(
        &self,
        registry: &ConnectionRegistry,
        game_id: GameId,
        seat_a: ConnectionId,
        seat_b: ConnectionId,
        total_rounds: u32,
    ) -> bool {
        let room: SharedRoom = Arc::new(Mutex::new(GameRoom::new(
            game_id,
            seat_a,
            seat_b,
            total_rounds,
        )));
        // Held until both players have their intro so a racing disconnect
        // cannot slip `opponent_disconnected` in before `match_found`.
        let guard = room.lock().await;
        self.rooms.write().await.insert(game_id, Arc::clone(&room));

        if !registry.bind_pair(seat_a, seat_b, game_id).await {
            self.rooms.write().await.remove(&game_id);
            return false;
        }

        let name_a = registry.display_name(seat_a).await.unwrap_or_default();
        let name_b = registry.display_name(seat_b).await.unwrap_or_default();
        for (conn, seat, opponent_name) in [
            (seat_a, Seat::SeatA, name_b),
            (seat_b, Seat::SeatB, name_a),
        ] {
            registry
                .send(
                    conn,
                    &ServerMessage::MatchFound(MatchFoundMsg {
                        game_id,
                        seat,
                        opponent_name,
                    }),
                )
                .await;
        }
        registry
            .broadcast(&[seat_a, seat_b], &ServerMessage::GameState(guard.snapshot()))
            .await;

        tracing::info!(%game_id, seat_a, seat_b, total_rounds, "Room opened");
        true
    }

    /// Relay a live drawing event. Anything not coming from the current turn
    /// holder of an active room is dropped without a reply.
    pub async fn relay_draw(
        &self,
        registry: &ConnectionRegistry,
        conn: ConnectionId,
        event: DrawRelay,
    ) {
        let Some(binding) = registry.binding(conn).await else {
            tracing::debug!(conn_id = conn, "Dropping draw event outside a game");
            return;
        };
        let Some(room) = self.get(binding.game_id).await else {
            tracing::debug!(conn_id = conn, game_id = %binding.game_id, "Dropping draw event for removed room");
            return;
        };
        let room = room.lock().await;
        if !room.can_draw(conn) {
            tracing::debug!(
                conn_id = conn,
                game_id = %binding.game_id,
                "Dropping draw event from seat not holding the turn"
            );
            return;
        }
        if let Some(opponent) = room.opponent_of(conn) {
            registry.send(opponent, &event.into_message()).await;
        }
    }

    /// Record and apply a turn. Nothing in memory changes unless both store
    /// writes succeed and the turn is still the sender's afterwards.
    pub async fn submit_turn(
        &self,
        registry: &ConnectionRegistry,
        store: &dyn GameStore,
        conn: ConnectionId,
        strokes: Vec<TurnStroke>,
        claimed_round: Option<u32>,
    ) -> Result<TurnAdvance, SessionError> {
        let binding = registry.binding(conn).await.ok_or(SessionError::NotInGame)?;
        let game_id = binding.game_id;
        let room = self
            .get(game_id)
            .await
            .ok_or(SessionError::RoomNotFound(game_id))?;

        let claim = room.lock().await.check_submit(conn, claimed_round)?;

        store
            .create_turn(NewTurn {
                game_id,
                seat: claim.seat,
                round: claim.round,
                strokes: strokes.clone(),
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(%game_id, seat = %claim.seat, round = claim.round, error = %e, "Failed to record turn");
            })?;

        let update = {
            let room = room.lock().await;
            if !room.claim_is_current(conn, claim) {
                return Err(stale_claim(&room, conn, claim));
            }
            match room.plan_advance(claim) {
                TurnAdvance::NextSeat { seat } => GameUpdate::turn(claim.round, seat),
                TurnAdvance::NextRound { next, .. } => GameUpdate::turn(next, Seat::SeatA),
                TurnAdvance::Finished => GameUpdate::finished(GameStatus::Completed),
            }
        };

        store.update_game(game_id, update).await.inspect_err(|e| {
            tracing::warn!(%game_id, seat = %claim.seat, round = claim.round, error = %e, "Failed to advance game record");
        })?;

        let mut guard = room.lock().await;
        if !guard.claim_is_current(conn, claim) {
            let err = stale_claim(&guard, conn, claim);
            let status = guard.status();
            drop(guard);
            // The write above may have overwritten a terminal status recorded
            // by the path that changed the room.
            if status.is_terminal() {
                persist_terminal(store, game_id, status).await;
            }
            return Err(err);
        }

        let advance = guard.apply_advance(claim, Instant::now());
        let players: Vec<ConnectionId> = guard.occupants().into_iter().map(|(_, c)| c).collect();

        registry
            .broadcast(
                &players,
                &ServerMessage::TurnSubmitted(TurnSubmittedMsg {
                    seat: claim.seat,
                    round: claim.round,
                    strokes,
                }),
            )
            .await;
        match advance {
            TurnAdvance::NextSeat { seat } => {
                tracing::debug!(%game_id, round = claim.round, %seat, "Turn passed");
                registry
                    .broadcast(&players, &ServerMessage::GameState(guard.snapshot()))
                    .await;
            },
            TurnAdvance::NextRound { completed, next } => {
                tracing::info!(%game_id, round = completed, "Round complete");
                registry
                    .broadcast(
                        &players,
                        &ServerMessage::RoundComplete(RoundCompleteMsg {
                            round: completed,
                            next_round: next,
                        }),
                    )
                    .await;
                registry
                    .broadcast(&players, &ServerMessage::GameState(guard.snapshot()))
                    .await;
            },
            TurnAdvance::Finished => {
                tracing::info!(%game_id, rounds = claim.round, "Game complete");
                registry
                    .broadcast(
                        &players,
                        &ServerMessage::GameComplete(GameCompleteMsg { game_id }),
                    )
                    .await;
            },
        }
        Ok(advance)
    }

    /// Empty the seat `conn` held in `binding`'s room, tell the opponent and
    /// record the abandonment if the game was still running.
    pub async fn vacate(
        &self,
        registry: &ConnectionRegistry,
        store: &dyn GameStore,
        conn: ConnectionId,
        binding: RoomBinding,
    ) {
        let game_id = binding.game_id;
        let Some(room) = self.get(game_id).await else {
            return;
        };
        let vacated = {
            let mut room = room.lock().await;
            let Some(vacated) = room.vacate(conn, Instant::now()) else {
                return;
            };
            if let Some(opponent) = vacated.opponent {
                registry
                    .send(opponent, &ServerMessage::OpponentDisconnected)
                    .await;
            }
            vacated
        };
        if vacated.abandoned {
            tracing::info!(%game_id, seat = %vacated.seat, "Game abandoned");
            persist_terminal(store, game_id, GameStatus::Abandoned).await;
        }
    }

    /// Drop a binding that points at a finished or vanished room so the
    /// connection can queue again. A binding to an active room is an error.
    pub async fn release_stale_binding(
        &self,
        registry: &ConnectionRegistry,
        conn: ConnectionId,
    ) -> Result<(), SessionError> {
        let Some(binding) = registry.binding(conn).await else {
            return Ok(());
        };
        if let Some(room) = self.get(binding.game_id).await {
            let mut room = room.lock().await;
            if room.status() == GameStatus::Active {
                return Err(SessionError::AlreadyInGame);
            }
            room.vacate(conn, Instant::now());
        }
        registry.unbind(conn, binding.game_id).await;
        Ok(())
    }

    /// Drop a room from the table without touching its players' bindings.
    #[cfg(test)]
    async fn remove(&self, id: GameId) -> Option<SharedRoom> {
        self.rooms.write().await.remove(&id)
    }

    /// Remove terminal rooms past their retention window (and empty terminal
    /// rooms immediately), unbinding any seat still pointing at them.
    pub async fn sweep(
        &self,
        registry: &ConnectionRegistry,
        now: Instant,
        retention: Duration,
    ) -> usize {
        let rooms: Vec<(GameId, SharedRoom)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (*id, Arc::clone(room)))
            .collect();

        let mut removed = 0;
        for (game_id, room) in rooms {
            let room = room.lock().await;
            if !room.is_removable(now, retention) {
                continue;
            }
            for (_, conn) in room.occupants() {
                registry.unbind(conn, game_id).await;
            }
            self.rooms.write().await.remove(&game_id);
            removed += 1;
            tracing::info!(%game_id, status = %room.status(), "Room removed");
        }
        removed
    }
}

/// The error to report when a claim went stale while the store was busy.
fn stale_claim(room: &GameRoom, conn: ConnectionId, claim: TurnClaim) -> SessionError {
    match room.check_submit(conn, Some(claim.round)) {
        Err(e) => e.into(),
        Ok(_) => TurnError::NotYourTurn.into(),
    }
}

async fn persist_terminal(store: &dyn GameStore, game_id: GameId, status: GameStatus) {
    if let Err(e) = store
        .update_game(game_id, GameUpdate::finished(status))
        .await
    {
        tracing::warn!(%game_id, %status, error = %e, "Failed to record final game status");
    }
}
