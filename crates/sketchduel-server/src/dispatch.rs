//! Routes decoded client messages to the queue and room handlers, and owns
//! the single cleanup path run when a connection goes away.

use sketchduel_core::net::messages::{ClientMessage, ConnectionId, QueueJoinedMsg, ServerMessage};
use sketchduel_core::stroke::{validate_live_stroke, validate_turn_strokes};

use crate::error::SessionError;
use crate::room_manager::DrawRelay;
use crate::state::AppState;

/// Handle one message from `conn`. Callers serialize calls per connection.
pub async fn handle_client_message(
    state: &AppState,
    conn: ConnectionId,
    msg: ClientMessage,
) -> Result<(), SessionError> {
    match msg {
        ClientMessage::Ping => {
            state.registry.send(conn, &ServerMessage::Pong).await;
        },
        ClientMessage::JoinQueue => {
            state.rooms.release_stale_binding(&state.registry, conn).await?;
            let position = state.queue.enqueue(&state.registry, conn).await?;
            tracing::info!(conn_id = conn, position, "Joined queue");
            state
                .registry
                .send(conn, &ServerMessage::QueueJoined(QueueJoinedMsg { position }))
                .await;
            let report = state
                .queue
                .try_pair(
                    &state.registry,
                    &state.rooms,
                    state.store.as_ref(),
                    state.config.game.total_rounds,
                )
                .await;
            if report.store_failed {
                tracing::warn!(conn_id = conn, "Pairing stopped after store failure");
            }
        },
        ClientMessage::LeaveQueue => {
            if state.queue.dequeue(conn).await {
                tracing::info!(conn_id = conn, "Left queue");
            }
            state.registry.send(conn, &ServerMessage::QueueLeft).await;
        },
        ClientMessage::DrawStroke(draw) => {
            validate_live_stroke(&draw.stroke)?;
            state
                .rooms
                .relay_draw(&state.registry, conn, DrawRelay::Stroke(draw.stroke))
                .await;
        },
        ClientMessage::DrawUndo => {
            state
                .rooms
                .relay_draw(&state.registry, conn, DrawRelay::Undo)
                .await;
        },
        ClientMessage::DrawClear => {
            state
                .rooms
                .relay_draw(&state.registry, conn, DrawRelay::Clear)
                .await;
        },
        ClientMessage::SubmitTurn(submit) => {
            validate_turn_strokes(&submit.strokes)?;
            state
                .rooms
                .submit_turn(
                    &state.registry,
                    state.store.as_ref(),
                    conn,
                    submit.strokes,
                    submit.round,
                )
                .await?;
        },
    }
    Ok(())
}

/// Tear down everything `conn` owned. Safe to call from every path that
/// notices the connection is gone; only the first call does any work.
pub async fn handle_disconnect(state: &AppState, conn: ConnectionId) {
    let Some(departed) = state.registry.unregister(conn).await else {
        return;
    };
    state.queue.dequeue(conn).await;
    if let Some(binding) = departed.binding {
        state
            .rooms
            .vacate(&state.registry, state.store.as_ref(), conn, binding)
            .await;
    }
    tracing::info!(conn_id = conn, name = %departed.display_name, "Connection closed");
}
