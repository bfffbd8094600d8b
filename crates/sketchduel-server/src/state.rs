use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;
use crate::matchmaking::MatchQueue;
use crate::persistence::{GameStore, InMemoryGameStore};
use crate::room_manager::RoomManager;

pub type IpConnectionCounts = Arc<Mutex<HashMap<IpAddr, usize>>>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub queue: Arc<MatchQueue>,
    pub rooms: Arc<RoomManager>,
    pub store: Arc<dyn GameStore>,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub ws_per_ip: IpConnectionCounts,
    /// Cancelled on shutdown; every connection and sweeper holds a child.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(InMemoryGameStore::new()))
    }

    pub fn with_store(config: ServerConfig, store: Arc<dyn GameStore>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            queue: Arc::new(MatchQueue::new()),
            rooms: Arc::new(RoomManager::new()),
            store,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            ws_per_ip: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Counts one open WebSocket for as long as it lives.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Holds one of an IP address's connection slots.
pub struct IpConnectionGuard {
    ip: IpAddr,
    counts: IpConnectionCounts,
}

impl IpConnectionGuard {
    /// Take a slot for `ip`, or `None` if it already has `max` connections.
    pub async fn try_acquire(ip: IpAddr, counts: IpConnectionCounts, max: usize) -> Option<Self> {
        {
            let mut map = counts.lock().await;
            let current = map.entry(ip).or_insert(0);
            if *current >= max {
                return None;
            }
            *current += 1;
        }
        Some(Self { ip, counts })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        let ip = self.ip;
        let counts = Arc::clone(&self.counts);
        // Drop cannot await; release the slot from a task.
        tokio::spawn(async move {
            let mut map = counts.lock().await;
            if let Some(n) = map.get_mut(&ip) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    map.remove(&ip);
                }
            }
        });
    }
}
