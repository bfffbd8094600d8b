use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use sketchduel_server::config::ServerConfig;
use sketchduel_server::{build_app, spawn_sweepers};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    let addr = config.listen_addr.clone();
    let (app, state) = build_app(config);
    let sweepers = spawn_sweepers(&state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        },
    };
    tracing::info!("sketchduel server listening on {addr}");

    let shutdown = state.shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        // Ends every socket task and sweeper.
        shutdown.cancel();
    })
    .await;

    state.shutdown.cancel();
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Sweeper task failed");
        }
    }

    if let Err(e) = served {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
    tracing::info!("sketchduel server stopped");
}
