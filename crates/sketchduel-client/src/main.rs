use tracing_subscriber::EnvFilter;

use sketchduel_client::bot::{BotConfig, run_bot};
use sketchduel_client::{AgentConfig, ClientAgent};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut url = "ws://127.0.0.1:8080/ws".to_string();
    let mut bot = BotConfig::default();
    for arg in std::env::args().skip(1) {
        if let Some(value) = arg.strip_prefix("--url=") {
            url = value.to_string();
        } else if let Some(value) = arg.strip_prefix("--games=")
            && let Ok(n) = value.parse::<u32>()
        {
            bot.games = Some(n);
        } else if let Some(value) = arg.strip_prefix("--strokes=")
            && let Ok(n) = value.parse::<usize>()
        {
            bot.strokes_per_turn = n;
        } else {
            tracing::warn!("Ignoring unrecognised argument {arg}");
        }
    }

    let mut handle = match ClientAgent::spawn(AgentConfig::new(url.clone())) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Cannot start agent: {e}");
            std::process::exit(1);
        },
    };
    tracing::info!("duel-bot connecting to {url}");

    tokio::select! {
        result = run_bot(&mut handle, &bot) => match result {
            Ok(games) => tracing::info!(games, "Bot finished"),
            Err(e) => tracing::error!("Bot stopped: {e}"),
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }
    handle.shutdown().await;
}
