//! A long-lived task that owns one player's socket. It reconnects with
//! jittered exponential backoff, keeps the link warm with application
//! pings, guards outgoing commands against the local session view and
//! resubmits turns the server failed to record.

use std::future::pending;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use sketchduel_core::net::messages::{
    ClientMessage, DrawStrokeMsg, ErrorCode, LiveStroke, ServerMessage, SubmitTurnMsg,
    TurnStroke,
};
use sketchduel_core::net::protocol::{decode_server_message, encode_client_message};
use sketchduel_core::session::{Backoff, ClientSession, GuardError, RetryPolicy};

use crate::error::AgentError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const COMMAND_BUFFER: usize = 64;

/// Requests from the agent's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCommand {
    JoinQueue,
    LeaveQueue,
    Draw(LiveStroke),
    Undo,
    Clear,
    SubmitTurn(Vec<TurnStroke>),
    Shutdown,
}

impl AgentCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinQueue => "join_queue",
            Self::LeaveQueue => "leave_queue",
            Self::Draw(_) => "draw_stroke",
            Self::Undo => "draw_undo",
            Self::Clear => "draw_clear",
            Self::SubmitTurn(_) => "submit_turn",
            Self::Shutdown => "shutdown",
        }
    }
}

/// What the agent reports back. Every server frame is forwarded after it has
/// been folded into the session view.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Connected,
    Disconnected,
    Server(ServerMessage),
    /// A command was refused locally and never sent.
    Rejected {
        command: &'static str,
        reason: GuardError,
    },
    SubmitAcknowledged {
        round: u32,
    },
    /// A turn submission was given up: retries ran out, the server refused
    /// it outright, or the link dropped.
    SubmitAbandoned {
        round: u32,
    },
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub url: String,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Fraction of each reconnect delay added or removed at random.
    pub jitter: f64,
    pub keepalive: Duration,
    pub retry: RetryPolicy,
    pub event_buffer: usize,
}

impl AgentConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            jitter: 0.2,
            keepalive: Duration::from_secs(25),
            retry: RetryPolicy::default(),
            event_buffer: 256,
        }
    }
}

/// Owner's side of a running agent.
pub struct AgentHandle {
    commands: mpsc::Sender<AgentCommand>,
    events: mpsc::Receiver<AgentEvent>,
    session: watch::Receiver<ClientSession>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl AgentHandle {
    pub async fn send(&self, command: AgentCommand) -> Result<(), AgentError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AgentError::Closed)
    }

    /// Next event, or `None` once the agent has stopped.
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    /// Snapshot of the current session view.
    pub fn session(&self) -> ClientSession {
        self.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<ClientSession> {
        self.session.clone()
    }

    /// Stop the agent and wait for it to close its socket.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Agent task failed");
        }
    }
}

struct PendingSubmit {
    strokes: Vec<TurnStroke>,
    round: u32,
    sent: u32,
    /// When set, `deadline` is the ack timeout; otherwise it is the resend time.
    awaiting_ack: bool,
    deadline: Instant,
}

enum Flow {
    Reconnect,
    Stop,
}

pub struct ClientAgent {
    config: AgentConfig,
    commands: mpsc::Receiver<AgentCommand>,
    events: mpsc::Sender<AgentEvent>,
    session: watch::Sender<ClientSession>,
    cancel: CancellationToken,
    pending: Option<PendingSubmit>,
}

impl ClientAgent {
    /// Start an agent on the current runtime.
    pub fn spawn(config: AgentConfig) -> Result<AgentHandle, AgentError> {
        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(AgentError::InvalidUrl(config.url));
        }
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (session_tx, session_rx) = watch::channel(ClientSession::new());
        let cancel = CancellationToken::new();

        let agent = Self {
            config,
            commands: cmd_rx,
            events: event_tx,
            session: session_tx,
            cancel: cancel.clone(),
            pending: None,
        };
        let task = tokio::spawn(agent.run());

        Ok(AgentHandle {
            commands: cmd_tx,
            events: event_rx,
            session: session_rx,
            cancel,
            task,
        })
    }

    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        loop {
            self.session.send_modify(ClientSession::on_connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = connect_async(self.config.url.as_str()) => result,
            };
            match connected {
                Ok((stream, _)) => {
                    backoff.reset();
                    tracing::info!(url = %self.config.url, "Connected");
                    self.session.send_modify(ClientSession::on_connected);
                    self.emit(AgentEvent::Connected);
                    let flow = self.drive(stream).await;
                    self.on_link_lost();
                    if matches!(flow, Flow::Stop) {
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        url = %self.config.url,
                        attempt = backoff.attempts() + 1,
                        error = %e,
                        "Connect failed"
                    );
                    self.session.send_modify(ClientSession::on_disconnected);
                },
            }

            let delay = jittered(backoff.next_delay(), self.config.jitter);
            tracing::debug!(?delay, "Reconnecting after delay");
            if matches!(self.idle(delay).await, Flow::Stop) {
                break;
            }
        }
        self.session.send_modify(ClientSession::on_disconnected);
        tracing::debug!("Agent stopped");
    }

    /// Wait out a reconnect delay, refusing commands that need a link.
    async fn idle(&mut self, delay: Duration) -> Flow {
        let wake = sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Flow::Stop,
                _ = &mut wake => return Flow::Reconnect,
                cmd = self.commands.recv() => match cmd {
                    None | Some(AgentCommand::Shutdown) => return Flow::Stop,
                    Some(cmd) => self.reject(cmd.kind(), GuardError::NotConnected),
                },
            }
        }
    }

    async fn drive(&mut self, stream: WsStream) -> Flow {
        let (mut sink, mut source) = stream.split();
        let period = self.config.keepalive;
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            let retry_at = self.pending.as_ref().map(|p| p.deadline);
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    close(&mut sink).await;
                    return Flow::Stop;
                },
                cmd = self.commands.recv() => match cmd {
                    None | Some(AgentCommand::Shutdown) => {
                        close(&mut sink).await;
                        return Flow::Stop;
                    },
                    Some(cmd) => self.handle_command(&mut sink, cmd).await,
                },
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_str());
                        Ok(())
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Server closed the connection");
                        return Flow::Reconnect;
                    },
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        return Flow::Reconnect;
                    },
                    Some(Ok(_)) => Ok(()),
                },
                _ = keepalive.tick() => send(&mut sink, &ClientMessage::Ping).await,
                _ = wait_until(retry_at) => self.on_submit_deadline(&mut sink).await,
            };
            if let Err(e) = outcome {
                tracing::warn!(error = %e, "Send failed");
                return Flow::Reconnect;
            }
        }
    }

    async fn handle_command(
        &mut self,
        sink: &mut WsSink,
        cmd: AgentCommand,
    ) -> Result<(), tungstenite::Error> {
        let kind = cmd.kind();
        let msg = match cmd {
            AgentCommand::JoinQueue => ClientMessage::JoinQueue,
            AgentCommand::LeaveQueue => ClientMessage::LeaveQueue,
            AgentCommand::Draw(stroke) => ClientMessage::DrawStroke(DrawStrokeMsg { stroke }),
            AgentCommand::Undo => ClientMessage::DrawUndo,
            AgentCommand::Clear => ClientMessage::DrawClear,
            AgentCommand::SubmitTurn(strokes) => return self.submit(sink, strokes).await,
            AgentCommand::Shutdown => return Ok(()),
        };
        let guarded = self.session.borrow().guard(&msg);
        if let Err(reason) = guarded {
            self.reject(kind, reason);
            return Ok(());
        }
        send(sink, &msg).await
    }

    async fn submit(
        &mut self,
        sink: &mut WsSink,
        strokes: Vec<TurnStroke>,
    ) -> Result<(), tungstenite::Error> {
        if self.pending.is_some() {
            self.reject("submit_turn", GuardError::SubmitPending);
            return Ok(());
        }
        // The guard only looks at the message kind.
        let probe = ClientMessage::SubmitTurn(SubmitTurnMsg {
            strokes: Vec::new(),
            round: None,
        });
        let checked = {
            let session = self.session.borrow();
            session
                .guard(&probe)
                .and_then(|()| session.game().map(|g| g.current_round).ok_or(GuardError::NotPlaying))
        };
        let round = match checked {
            Ok(round) => round,
            Err(reason) => {
                self.reject("submit_turn", reason);
                return Ok(());
            },
        };

        self.pending = Some(PendingSubmit {
            strokes,
            round,
            sent: 0,
            awaiting_ack: false,
            deadline: Instant::now(),
        });
        self.transmit_pending(sink).await
    }

    async fn transmit_pending(&mut self, sink: &mut WsSink) -> Result<(), tungstenite::Error> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        pending.sent += 1;
        pending.awaiting_ack = true;
        pending.deadline = Instant::now() + self.config.retry.ack_timeout;
        tracing::debug!(round = pending.round, attempt = pending.sent, "Submitting turn");
        let msg = ClientMessage::SubmitTurn(SubmitTurnMsg {
            strokes: pending.strokes.clone(),
            round: Some(pending.round),
        });
        send(sink, &msg).await
    }

    async fn on_submit_deadline(&mut self, sink: &mut WsSink) -> Result<(), tungstenite::Error> {
        let Some(pending) = self.pending.as_ref() else {
            return Ok(());
        };
        if pending.awaiting_ack {
            tracing::warn!(round = pending.round, "Turn not acknowledged in time");
            self.schedule_resend();
            return Ok(());
        }
        let round = pending.round;
        let still_ours = {
            let session = self.session.borrow();
            session.is_my_turn() && session.game().is_some_and(|g| g.current_round == round)
        };
        if !still_ours {
            self.abandon_submit();
            return Ok(());
        }
        self.transmit_pending(sink).await
    }

    fn schedule_resend(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        match self.config.retry.next_retry(pending.sent) {
            Some(delay) => {
                tracing::debug!(round = pending.round, ?delay, "Resubmitting turn after delay");
                pending.awaiting_ack = false;
                pending.deadline = Instant::now() + delay;
            },
            None => self.abandon_submit(),
        }
    }

    fn abandon_submit(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::warn!(round = pending.round, attempts = pending.sent, "Giving up on turn");
            self.emit(AgentEvent::SubmitAbandoned {
                round: pending.round,
            });
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let msg = match decode_server_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable server frame");
                return;
            },
        };
        self.session.send_modify(|session| session.apply(&msg));
        self.track_submit(&msg);
        self.emit(AgentEvent::Server(msg));
    }

    /// Settle the in-flight submission against a server message.
    fn track_submit(&mut self, msg: &ServerMessage) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        match msg {
            ServerMessage::TurnSubmitted(turn) => {
                let mine = self
                    .session
                    .borrow()
                    .game()
                    .is_some_and(|g| g.seat == turn.seat);
                if mine && turn.round == pending.round {
                    let round = pending.round;
                    self.pending = None;
                    self.emit(AgentEvent::SubmitAcknowledged { round });
                }
            },
            ServerMessage::Error(err) => match err.code {
                ErrorCode::SubmitFailed if pending.awaiting_ack => self.schedule_resend(),
                ErrorCode::NotYourTurn
                | ErrorCode::GameCompleted
                | ErrorCode::NotInGame
                | ErrorCode::RoomNotFound
                | ErrorCode::InvalidStroke
                | ErrorCode::ValidationFailed
                | ErrorCode::MessageTooLarge => self.abandon_submit(),
                _ => {},
            },
            ServerMessage::OpponentDisconnected => self.abandon_submit(),
            _ => {},
        }
    }

    fn on_link_lost(&mut self) {
        self.session.send_modify(ClientSession::on_disconnected);
        self.abandon_submit();
        self.emit(AgentEvent::Disconnected);
    }

    fn reject(&self, command: &'static str, reason: GuardError) {
        tracing::debug!(command, %reason, "Command refused locally");
        self.emit(AgentEvent::Rejected { command, reason });
    }

    fn emit(&self, event: AgentEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!(error = %e, "Dropping agent event");
        }
    }
}

async fn send(sink: &mut WsSink, msg: &ClientMessage) -> Result<(), tungstenite::Error> {
    let text = match encode_client_message(msg) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(kind = msg.kind(), error = %e, "Failed to encode message");
            return Ok(());
        },
    };
    sink.send(Message::Text(text.into())).await
}

async fn close(sink: &mut WsSink) {
    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "Error closing WebSocket");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending::<()>().await,
    }
}

/// Scale `delay` by a random factor in `[1 - ratio, 1 + ratio]`.
fn jittered(delay: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - ratio)..=(1.0 + ratio));
    delay.mul_f64(factor.max(0.0))
}
