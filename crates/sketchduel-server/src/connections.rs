//! Registry of live sockets: identity, outbound channel, liveness flag and
//! the optional room binding. Queue and rooms refer to connections by id only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::Message;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use sketchduel_core::names::generate_display_name;
use sketchduel_core::net::messages::{ConnectionId, GameId, Seat, ServerMessage};
use sketchduel_core::net::protocol::encode_server_message;

/// Per-connection sender for outbound WebSocket frames.
/// Bounded so a slow client cannot grow server memory; frames that do not
/// fit are dropped.
pub type PlayerSender = mpsc::Sender<Message>;

/// Which room and seat a connection currently plays in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomBinding {
    pub game_id: GameId,
    pub seat: Seat,
}

struct ConnectionEntry {
    display_name: String,
    sender: PlayerSender,
    alive: AtomicBool,
    binding: Option<RoomBinding>,
    cancel: CancellationToken,
}

/// What was left behind by a connection when it was unregistered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub display_name: String,
    pub binding: Option<RoomBinding>,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a connection with a fresh id and generated display name.
    pub async fn register(
        &self,
        sender: PlayerSender,
        cancel: CancellationToken,
    ) -> (ConnectionId, String) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let display_name = generate_display_name();
        self.connections.write().await.insert(
            id,
            ConnectionEntry {
                display_name: display_name.clone(),
                sender,
                alive: AtomicBool::new(true),
                binding: None,
                cancel,
            },
        );
        (id, display_name)
    }

    /// Remove a connection. Only the first call for an id returns `Some`, so
    /// whichever path gets here first owns the cleanup.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Departed> {
        let entry = self.connections.write().await.remove(&id)?;
        entry.cancel.cancel();
        Some(Departed {
            display_name: entry.display_name,
            binding: entry.binding,
        })
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    pub async fn display_name(&self, id: ConnectionId) -> Option<String> {
        self.connections
            .read()
            .await
            .get(&id)
            .map(|c| c.display_name.clone())
    }

    pub async fn mark_alive(&self, id: ConnectionId) {
        if let Some(entry) = self.connections.read().await.get(&id) {
            entry.alive.store(true, Ordering::Relaxed);
        }
    }

    pub async fn binding(&self, id: ConnectionId) -> Option<RoomBinding> {
        self.connections.read().await.get(&id).and_then(|c| c.binding)
    }

    /// Bind both connections to `game_id` in one step. Fails without
    /// touching either if one is gone or already bound.
    pub async fn bind_pair(
        &self,
        seat_a: ConnectionId,
        seat_b: ConnectionId,
        game_id: GameId,
    ) -> bool {
        let mut connections = self.connections.write().await;
        let ready = [seat_a, seat_b]
            .iter()
            .all(|id| connections.get(id).is_some_and(|c| c.binding.is_none()));
        if !ready {
            return false;
        }
        for (id, seat) in [(seat_a, Seat::SeatA), (seat_b, Seat::SeatB)] {
            if let Some(entry) = connections.get_mut(&id) {
                entry.binding = Some(RoomBinding { game_id, seat });
            }
        }
        true
    }

    /// Clear the binding of `id` if it still points at `game_id`.
    pub async fn unbind(&self, id: ConnectionId, game_id: GameId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&id) {
            Some(entry) if entry.binding.is_some_and(|b| b.game_id == game_id) => {
                entry.binding = None;
                true
            },
            _ => false,
        }
    }

    /// Encode and queue `msg` for one connection. Returns false if the
    /// connection is gone or its buffer is full.
    pub async fn send(&self, id: ConnectionId, msg: &ServerMessage) -> bool {
        let Some(frame) = encode_frame(msg) else {
            return false;
        };
        self.send_frame(id, frame).await
    }

    /// Encode once and queue for each listed connection.
    pub async fn broadcast(&self, ids: &[ConnectionId], msg: &ServerMessage) {
        let Some(frame) = encode_frame(msg) else {
            return;
        };
        let connections = self.connections.read().await;
        for id in ids {
            if let Some(entry) = connections.get(id) {
                try_deliver(*id, &entry.sender, frame.clone());
            }
        }
    }

    async fn send_frame(&self, id: ConnectionId, frame: Message) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&id) {
            Some(entry) => try_deliver(id, &entry.sender, frame),
            None => false,
        }
    }

    /// One heartbeat pass. Connections that stayed silent since the previous
    /// pass are cancelled and returned; the rest are flagged as suspect and
    /// probed with a WebSocket ping.
    pub async fn sweep_liveness(&self) -> Vec<ConnectionId> {
        let connections = self.connections.read().await;
        let mut dead = Vec::new();
        for (id, entry) in connections.iter() {
            if entry.alive.swap(false, Ordering::Relaxed) {
                try_deliver(*id, &entry.sender, Message::Ping(Bytes::new()));
            } else {
                entry.cancel.cancel();
                dead.push(*id);
            }
        }
        dead
    }
}

fn encode_frame(msg: &ServerMessage) -> Option<Message> {
    match encode_server_message(msg) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server message");
            None
        },
    }
}

fn try_deliver(id: ConnectionId, sender: &PlayerSender, frame: Message) -> bool {
    match sender.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::debug!(conn_id = id, "Outbound buffer full, dropping frame");
            false
        },
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchduel_core::net::messages::QueueJoinedMsg;
    use sketchduel_core::net::protocol::decode_server_message;
    use uuid::Uuid;

    fn make_sender() -> (PlayerSender, mpsc::Receiver<Message>) {
        mpsc::channel(16)
    }

    fn recv_server_msg(rx: &mut mpsc::Receiver<Message>) -> Option<ServerMessage> {
        match rx.try_recv().ok()? {
            Message::Text(t) => decode_server_message(t.as_str()).ok(),
            _ => None,
        }
    }

    #[tokio::test]
    async fn register_assigns_unique_ids() {
        let reg = ConnectionRegistry::new();
        let (tx1, _rx1) = make_sender();
        let (tx2, _rx2) = make_sender();
        let (a, name) = reg.register(tx1, CancellationToken::new()).await;
        let (b, _) = reg.register(tx2, CancellationToken::new()).await;
        assert_ne!(a, b);
        assert!(!name.is_empty());
        assert_eq!(reg.len().await, 2);
        assert_eq!(reg.display_name(a).await, Some(name));
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_cancels() {
        let reg = ConnectionRegistry::new();
        let (tx, _rx) = make_sender();
        let cancel = CancellationToken::new();
        let (id, _) = reg.register(tx, cancel.clone()).await;
        assert!(reg.unregister(id).await.is_some());
        assert!(cancel.is_cancelled());
        assert!(reg.unregister(id).await.is_none());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn bind_pair_is_all_or_nothing() {
        let reg = ConnectionRegistry::new();
        let (tx1, _rx1) = make_sender();
        let (tx2, _rx2) = make_sender();
        let (a, _) = reg.register(tx1, CancellationToken::new()).await;
        let (b, _) = reg.register(tx2, CancellationToken::new()).await;
        let game = Uuid::new_v4();

        assert!(!reg.bind_pair(a, 999, game).await);
        assert!(reg.binding(a).await.is_none());

        assert!(reg.bind_pair(a, b, game).await);
        assert_eq!(
            reg.binding(b).await,
            Some(RoomBinding {
                game_id: game,
                seat: Seat::SeatB
            })
        );
        // Already bound.
        assert!(!reg.bind_pair(a, b, Uuid::new_v4()).await);

        assert!(!reg.unbind(a, Uuid::new_v4()).await);
        assert!(reg.unbind(a, game).await);
        assert!(reg.binding(a).await.is_none());

        let departed = reg.unregister(b).await.unwrap();
        assert_eq!(departed.binding.map(|b| b.game_id), Some(game));
    }

    #[tokio::test]
    async fn send_delivers_json_text() {
        let reg = ConnectionRegistry::new();
        let (tx, mut rx) = make_sender();
        let (id, _) = reg.register(tx, CancellationToken::new()).await;
        let msg = ServerMessage::QueueJoined(QueueJoinedMsg { position: 1 });
        assert!(reg.send(id, &msg).await);
        assert_eq!(recv_server_msg(&mut rx), Some(msg));
        assert!(!reg.send(12345, &ServerMessage::Pong).await);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let reg = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let (id, _) = reg.register(tx, CancellationToken::new()).await;
        assert!(reg.send(id, &ServerMessage::Pong).await);
        assert!(!reg.send(id, &ServerMessage::Pong).await);
    }

    #[tokio::test]
    async fn silent_connection_dies_on_second_sweep() {
        let reg = ConnectionRegistry::new();
        let (tx1, mut rx1) = make_sender();
        let (tx2, _rx2) = make_sender();
        let quiet_cancel = CancellationToken::new();
        let (quiet, _) = reg.register(tx1, quiet_cancel.clone()).await;
        let (chatty, _) = reg.register(tx2, CancellationToken::new()).await;

        assert!(reg.sweep_liveness().await.is_empty());
        assert!(matches!(rx1.try_recv(), Ok(Message::Ping(_))));

        reg.mark_alive(chatty).await;
        let dead = reg.sweep_liveness().await;
        assert_eq!(dead, vec![quiet]);
        assert!(quiet_cancel.is_cancelled());
    }
}
