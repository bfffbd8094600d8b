use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sketchduel_client::bot::{BotConfig, run_bot};
use sketchduel_client::{AgentCommand, AgentConfig, AgentEvent, AgentHandle, ClientAgent};
use sketchduel_core::net::messages::{ErrorCode, Seat, ServerMessage};
use sketchduel_core::session::{GuardError, LinkState, Phase};
use sketchduel_core::test_helpers::make_turn_strokes;
use sketchduel_server::build_app_with_state;
use sketchduel_server::config::ServerConfig;
use sketchduel_server::persistence::{GameStore, InMemoryGameStore};
use sketchduel_server::state::AppState;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    store: Arc<InMemoryGameStore>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener).await
    }

    async fn serve(listener: tokio::net::TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(InMemoryGameStore::new());
        let state = AppState::with_store(
            ServerConfig::default(),
            Arc::clone(&store) as Arc<dyn GameStore>,
        );
        let (app, state) = build_app_with_state(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        Self { addr, state, store }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

fn fast_config(url: String) -> AgentConfig {
    let mut config = AgentConfig::new(url);
    config.backoff_base = Duration::from_millis(20);
    config.backoff_max = Duration::from_millis(200);
    config.retry.initial_delay = Duration::from_millis(50);
    config.retry.ack_timeout = Duration::from_secs(2);
    config
}

/// Wait (5s) for the first event matching `pred`, skipping the rest.
async fn wait_for(handle: &mut AgentHandle, pred: impl Fn(&AgentEvent) -> bool) -> AgentEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match handle.next_event().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("agent stopped"),
            }
        }
    })
    .await
    .expect("Timed out waiting for agent event")
}

async fn wait_for_phase(handle: &AgentHandle, phase: Phase) {
    let mut watch = handle.watch_session();
    tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|s| s.phase() == phase))
        .await
        .expect("Timed out waiting for phase")
        .expect("agent stopped");
}

#[tokio::test]
async fn two_bots_play_a_full_game() {
    let server = TestServer::start().await;
    let mut first = ClientAgent::spawn(fast_config(server.ws_url())).unwrap();
    let mut second = ClientAgent::spawn(fast_config(server.ws_url())).unwrap();
    let config = BotConfig {
        strokes_per_turn: 2,
        games: Some(1),
    };

    let (a, b) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(run_bot(&mut first, &config), run_bot(&mut second, &config))
    })
    .await
    .expect("bots did not finish");
    assert_eq!(a, Ok(1));
    assert_eq!(b, Ok(1));

    assert_eq!(first.session().phase(), Phase::Completed);
    let stats = server.state.rooms.stats().await;
    assert_eq!(stats.active, 0);
    assert_eq!(stats.retained, 1);
    assert_eq!(server.store.game_count().await, 1);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn guards_refuse_commands_that_do_not_fit_the_session() {
    let server = TestServer::start().await;
    let mut agent = ClientAgent::spawn(fast_config(server.ws_url())).unwrap();
    wait_for(&mut agent, |e| *e == AgentEvent::Connected).await;

    agent.send(AgentCommand::LeaveQueue).await.unwrap();
    let event = wait_for(&mut agent, |e| matches!(e, AgentEvent::Rejected { .. })).await;
    assert_eq!(
        event,
        AgentEvent::Rejected {
            command: "leave_queue",
            reason: GuardError::NotQueued,
        }
    );

    agent
        .send(AgentCommand::SubmitTurn(make_turn_strokes(1)))
        .await
        .unwrap();
    let event = wait_for(&mut agent, |e| matches!(e, AgentEvent::Rejected { .. })).await;
    assert_eq!(
        event,
        AgentEvent::Rejected {
            command: "submit_turn",
            reason: GuardError::NotPlaying,
        }
    );

    agent.send(AgentCommand::JoinQueue).await.unwrap();
    wait_for(&mut agent, |e| {
        matches!(e, AgentEvent::Server(ServerMessage::QueueJoined(_)))
    })
    .await;
    assert_eq!(agent.session().phase(), Phase::Queued);
    agent.shutdown().await;
}

#[tokio::test]
async fn failed_submit_is_retried_until_acknowledged() {
    let server = TestServer::start().await;
    let mut first = ClientAgent::spawn(fast_config(server.ws_url())).unwrap();
    let mut second = ClientAgent::spawn(fast_config(server.ws_url())).unwrap();

    wait_for(&mut first, |e| *e == AgentEvent::Connected).await;
    first.send(AgentCommand::JoinQueue).await.unwrap();
    wait_for(&mut first, |e| {
        matches!(e, AgentEvent::Server(ServerMessage::QueueJoined(_)))
    })
    .await;
    wait_for(&mut second, |e| *e == AgentEvent::Connected).await;
    second.send(AgentCommand::JoinQueue).await.unwrap();

    wait_for_phase(&first, Phase::Playing).await;
    wait_for_phase(&second, Phase::Playing).await;
    assert_eq!(first.session().game().unwrap().seat, Seat::SeatA);
    assert!(first.session().is_my_turn());

    server.store.fail_next(1);
    first
        .send(AgentCommand::SubmitTurn(make_turn_strokes(2)))
        .await
        .unwrap();

    let failed = wait_for(&mut first, |e| matches!(e, AgentEvent::Server(ServerMessage::Error(_)))).await;
    match failed {
        AgentEvent::Server(ServerMessage::Error(err)) => assert_eq!(err.code, ErrorCode::SubmitFailed),
        other => panic!("unexpected event {other:?}"),
    }
    let acked = wait_for(&mut first, |e| {
        matches!(
            e,
            AgentEvent::SubmitAcknowledged { .. } | AgentEvent::SubmitAbandoned { .. }
        )
    })
    .await;
    assert_eq!(acked, AgentEvent::SubmitAcknowledged { round: 1 });

    wait_for(&mut second, |e| {
        matches!(e, AgentEvent::Server(ServerMessage::TurnSubmitted(t)) if t.seat == Seat::SeatA)
    })
    .await;
    assert!(second.session().is_my_turn());

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test]
async fn agent_reconnects_when_server_appears() {
    // Reserve a port, then release it so the first attempts are refused.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let mut agent = ClientAgent::spawn(fast_config(format!("ws://{addr}/ws"))).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_ne!(agent.session().link(), LinkState::Connected);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let server = TestServer::serve(listener).await;
    wait_for(&mut agent, |e| *e == AgentEvent::Connected).await;
    assert_eq!(agent.session().link(), LinkState::Connected);

    // Server-side termination is noticed and the session view is reset.
    agent.send(AgentCommand::JoinQueue).await.unwrap();
    wait_for_phase(&agent, Phase::Queued).await;
    server.state.shutdown.cancel();
    wait_for(&mut agent, |e| *e == AgentEvent::Disconnected).await;
    for _ in 0..100 {
        if server.state.queue.waiting().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.state.queue.waiting().await, 0);

    agent.shutdown().await;
}
