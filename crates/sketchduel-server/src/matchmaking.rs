//! FIFO waiting line and the pairing cycle that turns its two oldest live
//! entries into a room.
//!
//! Only one pairing cycle runs at a time. A popped pair is held as
//! "reserved" while the store creates the game: reserved connections count
//! as queued for `join_queue`, and a `leave_queue` (or disconnect) during
//! that window withdraws them from the pair. Joining again before the
//! cycle settles takes the withdrawal back.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use sketchduel_core::net::messages::{ConnectionId, ErrorCode, GameStatus, ServerMessage};

use crate::connections::ConnectionRegistry;
use crate::error::SessionError;
use crate::persistence::{GameStore, GameUpdate};
use crate::room_manager::RoomManager;

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    conn: ConnectionId,
    joined_at: Instant,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<QueueEntry>,
    reserved: HashSet<ConnectionId>,
    withdrawn: HashSet<ConnectionId>,
    /// Withdrawn during setup, then joined again.
    rejoined: HashSet<ConnectionId>,
}

impl QueueState {
    fn is_queued(&self, conn: ConnectionId) -> bool {
        (self.reserved.contains(&conn) && !self.withdrawn.contains(&conn))
            || self.entries.iter().any(|e| e.conn == conn)
    }

    /// Put entries back at the head, keeping their relative order.
    fn restore_front(&mut self, entries: &[QueueEntry]) {
        for entry in entries.iter().rev() {
            self.entries.push_front(*entry);
        }
    }
}

/// Outcome of one `try_pair` cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PairingReport {
    pub rooms_opened: usize,
    /// Entries discarded because their connection was gone.
    pub dropped: usize,
    /// The cycle stopped early because the store refused to create a game.
    pub store_failed: bool,
}

#[derive(Default)]
pub struct MatchQueue {
    state: Mutex<QueueState>,
    pairing: Mutex<()>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `conn` and return its 1-based position. A connection that left
    /// while its pair was being set up rejoins that pair at position 1.
    pub async fn enqueue(
        &self,
        registry: &ConnectionRegistry,
        conn: ConnectionId,
    ) -> Result<usize, SessionError> {
        let mut state = self.state.lock().await;
        if state.is_queued(conn) {
            return Err(SessionError::AlreadyInQueue);
        }
        if registry.binding(conn).await.is_some() {
            return Err(SessionError::AlreadyInGame);
        }
        if state.withdrawn.remove(&conn) {
            state.rejoined.insert(conn);
            return Ok(1);
        }
        state.entries.push_back(QueueEntry {
            conn,
            joined_at: Instant::now(),
        });
        Ok(state.entries.len())
    }

    /// Remove `conn` if it is waiting; a no-op otherwise. Returns whether
    /// anything was removed or withdrawn.
    pub async fn dequeue(&self, conn: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        if state.reserved.contains(&conn) {
            state.withdrawn.insert(conn);
            return true;
        }
        let before = state.entries.len();
        state.entries.retain(|e| e.conn != conn);
        state.entries.len() != before
    }

    pub async fn contains(&self, conn: ConnectionId) -> bool {
        self.state.lock().await.is_queued(conn)
    }

    /// Number of connections waiting (not counting a pair being set up).
    pub async fn waiting(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Evict entries that have waited at least `timeout` and return them.
    pub async fn expire(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        state.entries.retain(|e| {
            let keep = now.saturating_duration_since(e.joined_at) < timeout;
            if !keep {
                expired.push(e.conn);
            }
            keep
        });
        expired
    }

    /// Pop the two oldest live entries, discarding dead ones on the way.
    async fn pop_pair(
        &self,
        registry: &ConnectionRegistry,
        report: &mut PairingReport,
    ) -> Option<(QueueEntry, QueueEntry)> {
        let mut state = self.state.lock().await;
        let mut picked: Vec<QueueEntry> = Vec::with_capacity(2);
        while picked.len() < 2 {
            let Some(entry) = state.entries.pop_front() else {
                break;
            };
            if registry.contains(entry.conn).await {
                picked.push(entry);
            } else {
                tracing::debug!(conn_id = entry.conn, "Dropping dead queue entry");
                report.dropped += 1;
            }
        }
        if let [a, b] = picked[..] {
            state.reserved.insert(a.conn);
            state.reserved.insert(b.conn);
            Some((a, b))
        } else {
            state.restore_front(&picked);
            None
        }
    }

    /// Pair waiting connections until fewer than two live entries remain or
    /// the store fails.
    pub async fn try_pair(
        &self,
        registry: &ConnectionRegistry,
        rooms: &RoomManager,
        store: &dyn GameStore,
        total_rounds: u32,
    ) -> PairingReport {
        let _cycle = self.pairing.lock().await;
        let mut report = PairingReport::default();

        while let Some((a, b)) = self.pop_pair(registry, &mut report).await {
            let created = store.create_game(total_rounds).await;

            let mut state = self.state.lock().await;
            state.reserved.remove(&a.conn);
            state.reserved.remove(&b.conn);
            let mut survivors = Vec::with_capacity(2);
            for mut entry in [a, b] {
                let withdrawn = state.withdrawn.remove(&entry.conn);
                if state.rejoined.remove(&entry.conn) {
                    entry.joined_at = Instant::now();
                }
                if !withdrawn && registry.contains(entry.conn).await {
                    survivors.push(entry);
                }
            }

            let game = match created {
                Ok(game) => game,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create game, requeueing pair");
                    state.restore_front(&survivors);
                    report.store_failed = true;
                    break;
                },
            };

            let opened = survivors.len() == 2
                && rooms
                    .open(registry, game.id, a.conn, b.conn, total_rounds)
                    .await;
            if opened {
                report.rooms_opened += 1;
                continue;
            }

            state.restore_front(&survivors);
            report.dropped += 2 - survivors.len();
            drop(state);
            tracing::info!(game_id = %game.id, "Pair broke up during setup, game abandoned");
            if let Err(e) = store
                .update_game(game.id, GameUpdate::finished(GameStatus::Abandoned))
                .await
            {
                tracing::warn!(game_id = %game.id, error = %e, "Failed to mark orphaned game abandoned");
            }
        }
        report
    }

    /// Evict timed-out entries and tell each of them.
    pub async fn sweep(
        &self,
        registry: &ConnectionRegistry,
        now: Instant,
        timeout: Duration,
    ) -> usize {
        let expired = self.expire(now, timeout).await;
        for conn in &expired {
            tracing::info!(conn_id = conn, "Matchmaking timed out");
            registry
                .send(
                    *conn,
                    &ServerMessage::error(
                        ErrorCode::MatchmakingTimeout,
                        "no opponent found, please try again",
                    ),
                )
                .await;
        }
        expired.len()
    }
}
