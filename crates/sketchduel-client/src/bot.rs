//! Scripted player: queues on connect, scribbles a few random strokes
//! whenever it holds the turn and queues again once a game is over.

use rand::Rng;

use sketchduel_core::net::messages::{ErrorCode, GameStatus, Point, ServerMessage, TurnStroke};

use crate::agent::{AgentCommand, AgentEvent, AgentHandle};
use crate::error::AgentError;

const CANVAS_WIDTH: f64 = 800.0;
const CANVAS_HEIGHT: f64 = 600.0;
const PALETTE: &[&str] = &["#000000", "#e63946", "#1d3557", "#2a9d8f", "#f4a261", "purple"];

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub strokes_per_turn: usize,
    /// Stop after this many finished games; `None` plays forever.
    pub games: Option<u32>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            strokes_per_turn: 3,
            games: None,
        }
    }
}

/// Drive `handle` until the configured number of games has finished.
/// Returns how many games the bot saw to the end.
pub async fn run_bot(handle: &mut AgentHandle, config: &BotConfig) -> Result<u32, AgentError> {
    let mut finished = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            AgentEvent::Connected => handle.send(AgentCommand::JoinQueue).await?,
            AgentEvent::Server(ServerMessage::GameState(_)) => {
                if handle.session().is_my_turn() {
                    let strokes = random_strokes(&mut rand::rng(), config.strokes_per_turn);
                    handle.send(AgentCommand::SubmitTurn(strokes)).await?;
                }
            },
            AgentEvent::Server(msg @ (ServerMessage::GameComplete(_)
            | ServerMessage::OpponentDisconnected)) => {
                // A leaver after a completed game does not end a second game.
                let ended = matches!(msg, ServerMessage::GameComplete(_))
                    || handle
                        .session()
                        .game()
                        .is_some_and(|g| g.status == GameStatus::Abandoned);
                if !ended {
                    continue;
                }
                finished += 1;
                tracing::info!(finished, "Game over");
                if config.games.is_some_and(|limit| finished >= limit) {
                    return Ok(finished);
                }
                handle.send(AgentCommand::JoinQueue).await?;
            },
            AgentEvent::Server(ServerMessage::Error(err))
                if err.code == ErrorCode::MatchmakingTimeout =>
            {
                tracing::info!("No opponent yet, queueing again");
                handle.send(AgentCommand::JoinQueue).await?;
            },
            AgentEvent::SubmitAbandoned { round } => {
                tracing::warn!(round, "Turn was dropped");
            },
            _ => {},
        }
    }
    Err(AgentError::Closed)
}

/// `n` short polylines scattered over the canvas.
pub fn random_strokes(rng: &mut impl Rng, n: usize) -> Vec<TurnStroke> {
    (0..n)
        .map(|_| {
            let len = rng.random_range(2..=8);
            let mut x = rng.random_range(0.0..CANVAS_WIDTH);
            let mut y = rng.random_range(0.0..CANVAS_HEIGHT);
            let points = (0..len)
                .map(|_| {
                    x = (x + rng.random_range(-40.0..40.0)).clamp(0.0, CANVAS_WIDTH);
                    y = (y + rng.random_range(-40.0..40.0)).clamp(0.0, CANVAS_HEIGHT);
                    Point { x, y }
                })
                .collect();
            TurnStroke {
                points,
                color: PALETTE[rng.random_range(0..PALETTE.len())].to_string(),
                width: rng.random_range(1.0..12.0),
            }
        })
        .collect()
}
