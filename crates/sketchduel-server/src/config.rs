use std::time::Duration;

use serde::Deserialize;

use sketchduel_core::net::protocol::MAX_MESSAGE_SIZE;
use sketchduel_core::room::DEFAULT_TOTAL_ROUNDS;

const CONFIG_FILE: &str = "sketchduel.toml";

/// Top-level server configuration, loaded from `sketchduel.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub limits: LimitsConfig,
    pub timing: TimingConfig,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            limits: LimitsConfig::default(),
            timing: TimingConfig::default(),
            game: GameConfig::default(),
        }
    }
}

/// Connection caps, buffer sizes and message throughput.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
    /// Frames above this get a `MESSAGE_TOO_LARGE` reply.
    pub max_message_bytes: usize,
    /// Transport cap; frames above this drop the socket outright.
    pub max_ws_frame_bytes: usize,
    pub messages_per_window: u32,
    pub rate_window_secs: u64,
    pub player_message_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            max_ws_per_ip: 10,
            max_message_bytes: MAX_MESSAGE_SIZE,
            max_ws_frame_bytes: 1024 * 1024,
            messages_per_window: 300,
            rate_window_secs: 60,
            player_message_buffer: 256,
        }
    }
}

/// Periodic sweeps and the grace windows they enforce.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub heartbeat_interval_secs: u64,
    pub queue_timeout_secs: u64,
    pub queue_sweep_interval_secs: u64,
    pub room_retention_secs: u64,
    pub room_sweep_interval_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            queue_timeout_secs: 120,
            queue_sweep_interval_secs: 10,
            room_retention_secs: 120,
            room_sweep_interval_secs: 60,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }

    pub fn queue_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.queue_sweep_interval_secs)
    }

    pub fn room_retention(&self) -> Duration {
        Duration::from_secs(self.room_retention_secs)
    }

    pub fn room_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.room_sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub total_rounds: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            total_rounds: DEFAULT_TOTAL_ROUNDS,
        }
    }
}

impl ServerConfig {
    /// Check the configuration, naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }

        let limits = &self.limits;
        if limits.max_ws_connections == 0 {
            return Err("limits.max_ws_connections must be > 0".into());
        }
        if limits.max_ws_per_ip == 0 {
            return Err("limits.max_ws_per_ip must be > 0".into());
        }
        if limits.max_message_bytes == 0 {
            return Err("limits.max_message_bytes must be > 0".into());
        }
        if limits.max_ws_frame_bytes < limits.max_message_bytes {
            return Err("limits.max_ws_frame_bytes must be >= limits.max_message_bytes".into());
        }
        if limits.messages_per_window == 0 {
            return Err("limits.messages_per_window must be > 0".into());
        }
        if limits.rate_window_secs == 0 {
            return Err("limits.rate_window_secs must be > 0".into());
        }
        if limits.player_message_buffer == 0 {
            return Err("limits.player_message_buffer must be > 0".into());
        }

        let timing = &self.timing;
        for (name, value) in [
            ("timing.heartbeat_interval_secs", timing.heartbeat_interval_secs),
            ("timing.queue_timeout_secs", timing.queue_timeout_secs),
            ("timing.queue_sweep_interval_secs", timing.queue_sweep_interval_secs),
            ("timing.room_sweep_interval_secs", timing.room_sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("{name} must be > 0"));
            }
        }

        if self.game.total_rounds == 0 {
            return Err("game.total_rounds must be > 0".into());
        }
        Ok(())
    }

    /// Load config from `sketchduel.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from {CONFIG_FILE}");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse {CONFIG_FILE}: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No {CONFIG_FILE} found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("SKETCHDUEL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(val) = var("SKETCHDUEL_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            self.limits.max_ws_connections = n;
        }
        if let Some(val) = var("SKETCHDUEL_RATE_LIMIT")
            && let Ok(n) = val.parse::<u32>()
        {
            self.limits.messages_per_window = n;
        }
        if let Some(val) = var("SKETCHDUEL_TOTAL_ROUNDS")
            && let Ok(n) = val.parse::<u32>()
        {
            self.game.total_rounds = n;
        }
        if let Some(val) = var("SKETCHDUEL_HEARTBEAT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.timing.heartbeat_interval_secs = n;
        }
    }
}
