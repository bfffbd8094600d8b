use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::extract::FromRequest;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sketchduel_core::net::messages::ConnectionId;
use sketchduel_core::net::protocol::decode_client_frame;

use crate::dispatch::{handle_client_message, handle_disconnect};
use crate::error::SessionError;
use crate::rate_limit::MessageRateLimiter;
use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    // Per-IP connection limit
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let max_per_ip = state.config.limits.max_ws_per_ip;
    let ip_guard =
        IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), max_per_ip).await;
    let Some(ip_guard) = ip_guard else {
        tracing::warn!(%ip, max_per_ip, "Per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    // Frames between the message cap and the transport cap still get a
    // MESSAGE_TOO_LARGE reply; anything bigger drops the socket.
    let frame_cap = state.config.limits.max_ws_frame_bytes;
    Ok(ws
        .max_message_size(frame_cap)
        .max_frame_size(frame_cap)
        .on_upgrade(move |socket| handle_socket(socket, state, ip_guard))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, _ip_guard: IpConnectionGuard) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Message>(state.config.limits.player_message_buffer);
    let cancel = state.shutdown.child_token();
    let (conn_id, display_name) = state.registry.register(tx, cancel.clone()).await;
    tracing::info!(conn_id, name = %display_name, "Connection opened");

    spawn_writer(ws_sender, rx, cancel.clone());

    read_loop(&mut ws_receiver, &state, conn_id, &cancel).await;

    // Socket closed, errored, or was terminated by the heartbeat.
    handle_disconnect(&state, conn_id).await;
}

fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        if let Err(e) = ws_sender.close().await {
            tracing::debug!(error = %e, "Error closing WebSocket");
        }
    });
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    conn_id: ConnectionId,
    cancel: &CancellationToken,
) {
    let limits = &state.config.limits;
    let mut rate_limiter = MessageRateLimiter::new(
        limits.messages_per_window,
        Duration::from_secs(limits.rate_window_secs),
    );

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::debug!(conn_id, error = %e, "WebSocket error");
                break;
            },
            None => break,
        };

        // Any inbound frame, including pongs, proves the peer is alive.
        state.registry.mark_alive(conn_id).await;

        let result = match msg {
            Message::Text(text) => {
                handle_frame(state, conn_id, &mut rate_limiter, text.as_str().as_bytes()).await
            },
            Message::Binary(data) => handle_frame(state, conn_id, &mut rate_limiter, &data).await,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Err(e) = result {
            tracing::warn!(conn_id, code = %e.code(), error = %e, "Rejected client message");
            state.registry.send(conn_id, &e.to_message()).await;
        }
    }
}

async fn handle_frame(
    state: &AppState,
    conn_id: ConnectionId,
    rate_limiter: &mut MessageRateLimiter,
    data: &[u8],
) -> Result<(), SessionError> {
    if !rate_limiter.allow(Instant::now()) {
        return Err(SessionError::RateLimited);
    }
    let msg = decode_client_frame(data, state.config.limits.max_message_bytes)?;
    tracing::trace!(conn_id, kind = msg.kind(), "Client message");
    handle_client_message(state, conn_id, msg).await
}
