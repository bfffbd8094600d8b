#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sketchduel_core::net::messages::{
    ClientMessage, ErrorCode, ErrorMsg, GameStateMsg, MatchFoundMsg, ServerMessage,
};
use sketchduel_core::net::protocol::{decode_server_message, encode_client_message};

use sketchduel_server::build_app_with_state;
use sketchduel_server::config::ServerConfig;
use sketchduel_server::persistence::GameStore;
use sketchduel_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with the default config and in-memory store.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        Self::from_state(AppState::new(config)).await
    }

    /// Start a test server backed by the given store.
    pub async fn with_store(config: ServerConfig, store: Arc<dyn GameStore>) -> Self {
        Self::from_state(AppState::with_store(config, store)).await
    }

    async fn from_state(state: AppState) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app_with_state(state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage as a JSON text frame.
pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

pub async fn ws_send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::Text(text.to_owned().into())).await.unwrap();
}

pub async fn ws_send_binary(stream: &mut WsStream, data: Vec<u8>) {
    stream.send(Message::Binary(data.into())).await.unwrap();
}

/// Read the next text frame (5s timeout). Transport pings are skipped.
pub async fn ws_read_text(stream: &mut WsStream) -> String {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                Some(Ok(Message::Close(_))) => panic!("WebSocket closed unexpectedly"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Read the next ServerMessage (5s timeout).
pub async fn ws_read_msg(stream: &mut WsStream) -> ServerMessage {
    let text = ws_read_text(stream).await;
    decode_server_message(&text).unwrap()
}

/// Try to read a ServerMessage, returning None on timeout.
pub async fn ws_try_read_msg(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return decode_server_message(text.as_str()).unwrap(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

/// Read the next message and require it to be an `error` frame with `code`.
pub async fn ws_expect_error(stream: &mut WsStream, code: ErrorCode) -> ErrorMsg {
    match ws_read_msg(stream).await {
        ServerMessage::Error(err) => {
            assert_eq!(err.code, code, "unexpected error: {err:?}");
            err
        },
        other => panic!("Expected {code:?} error, got: {other:?}"),
    }
}

/// Wait until the server closes the socket (or the stream fails).
pub async fn ws_expect_closed(stream: &mut WsStream) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                _ => continue,
            }
        }
    })
    .await
    .expect("Timed out waiting for the server to close the socket")
}

/// A pair of connected players seated in the same room.
pub struct Duel {
    pub seat_a: WsStream,
    pub seat_b: WsStream,
    pub match_a: MatchFoundMsg,
    pub match_b: MatchFoundMsg,
    pub initial: GameStateMsg,
}

/// Connect two players and queue them one after the other. The first to
/// queue takes seat A.
pub async fn start_duel(server: &TestServer) -> Duel {
    let mut seat_a = ws_connect(&server.ws_url()).await;
    let mut seat_b = ws_connect(&server.ws_url()).await;

    ws_send(&mut seat_a, &ClientMessage::JoinQueue).await;
    assert_queue_joined(&mut seat_a, 1).await;
    ws_send(&mut seat_b, &ClientMessage::JoinQueue).await;
    assert_queue_joined(&mut seat_b, 2).await;

    let match_a = expect_match_found(&mut seat_a).await;
    let initial = expect_game_state(&mut seat_a).await;
    let match_b = expect_match_found(&mut seat_b).await;
    assert_eq!(expect_game_state(&mut seat_b).await, initial);

    Duel {
        seat_a,
        seat_b,
        match_a,
        match_b,
        initial,
    }
}

pub async fn assert_queue_joined(stream: &mut WsStream, position: usize) {
    match ws_read_msg(stream).await {
        ServerMessage::QueueJoined(joined) => assert_eq!(joined.position, position),
        other => panic!("Expected queue_joined, got: {other:?}"),
    }
}

pub async fn expect_match_found(stream: &mut WsStream) -> MatchFoundMsg {
    match ws_read_msg(stream).await {
        ServerMessage::MatchFound(found) => found,
        other => panic!("Expected match_found, got: {other:?}"),
    }
}

pub async fn expect_game_state(stream: &mut WsStream) -> GameStateMsg {
    match ws_read_msg(stream).await {
        ServerMessage::GameState(state) => state,
        other => panic!("Expected game_state, got: {other:?}"),
    }
}
