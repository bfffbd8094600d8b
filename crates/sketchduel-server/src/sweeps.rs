//! Timer-driven maintenance. Each sweep runs on its own interval and only
//! goes through the same registry, queue and room operations the message
//! handlers use.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::dispatch::handle_disconnect;
use crate::state::AppState;

/// Start the heartbeat, queue and room sweepers. They stop when
/// `state.shutdown` is cancelled.
pub fn spawn_sweepers(state: &AppState) -> Vec<JoinHandle<()>> {
    let timing = &state.config.timing;
    vec![
        spawn_periodic(state, "heartbeat", timing.heartbeat_interval(), |s| async move {
            heartbeat_sweep(&s).await;
        }),
        spawn_periodic(state, "queue", timing.queue_sweep_interval(), |s| async move {
            queue_sweep(&s).await;
        }),
        spawn_periodic(state, "rooms", timing.room_sweep_interval(), |s| async move {
            room_sweep(&s).await;
        }),
    ]
}

fn spawn_periodic<F, Fut>(
    state: &AppState,
    name: &'static str,
    period: Duration,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(AppState) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let state = state.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick(state.clone()).await,
            }
        }
        tracing::debug!(sweeper = name, "Sweeper stopped");
    })
}

/// Terminate connections that missed a whole probe cycle and probe the rest.
pub async fn heartbeat_sweep(state: &AppState) -> usize {
    let dead = state.registry.sweep_liveness().await;
    for conn in &dead {
        tracing::info!(conn_id = conn, "Heartbeat timeout");
        handle_disconnect(state, *conn).await;
    }
    dead.len()
}

/// Expire long waiters, then retry pairing in case an earlier cycle was cut
/// short by a store failure.
pub async fn queue_sweep(state: &AppState) -> usize {
    let expired = state
        .queue
        .sweep(
            &state.registry,
            tokio::time::Instant::now(),
            state.config.timing.queue_timeout(),
        )
        .await;
    state
        .queue
        .try_pair(
            &state.registry,
            &state.rooms,
            state.store.as_ref(),
            state.config.game.total_rounds,
        )
        .await;
    expired
}

pub async fn room_sweep(state: &AppState) -> usize {
    state
        .rooms
        .sweep(
            &state.registry,
            std::time::Instant::now(),
            state.config.timing.room_retention(),
        )
        .await
}
