mod common;

use std::time::Duration;

use common::*;
use sketchduel_core::net::messages::ClientMessage;
use sketchduel_server::config::ServerConfig;
use tokio_tungstenite::tungstenite;

async fn wait_for_connections(server: &TestServer, n: usize) {
    for _ in 0..100 {
        if server.state.registry.len().await == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} registered connections");
}

fn rejected_status(result: Result<impl Sized, tungstenite::Error>) -> u16 {
    match result {
        Err(tungstenite::Error::Http(resp)) => resp.status().as_u16(),
        Err(e) => panic!("Expected HTTP rejection, got: {e}"),
        Ok(_) => panic!("Expected the upgrade to be rejected"),
    }
}

#[tokio::test]
async fn health_reports_connections_queue_and_rooms() {
    let server = TestServer::new().await;
    let _duel = start_duel(&server).await;
    let mut waiting = ws_connect(&server.ws_url()).await;
    ws_send(&mut waiting, &ClientMessage::JoinQueue).await;
    assert_queue_joined(&mut waiting, 1).await;

    let resp = reqwest::get(format!("{}/health", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
    assert_eq!(body["connections"]["websocket"], 3);
    assert_eq!(body["queue"]["waiting"], 1);
    assert_eq!(body["rooms"]["active"], 1);
    assert_eq!(body["rooms"]["retained"], 0);
}

#[tokio::test]
async fn ready_until_shutdown() {
    let server = TestServer::new().await;
    let resp = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ready");

    server.state.shutdown.cancel();
    let resp = reqwest::get(format!("{}/ready", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn global_connection_cap_returns_503() {
    let mut config = ServerConfig::default();
    config.limits.max_ws_connections = 1;
    let server = TestServer::from_config(config).await;

    let _first = ws_connect(&server.ws_url()).await;
    wait_for_connections(&server, 1).await;

    let second = tokio_tungstenite::connect_async(server.ws_url()).await;
    assert_eq!(rejected_status(second), 503);
}

#[tokio::test]
async fn per_ip_cap_returns_429_and_is_released_on_close() {
    let mut config = ServerConfig::default();
    config.limits.max_ws_per_ip = 1;
    let server = TestServer::from_config(config).await;

    let first = ws_connect(&server.ws_url()).await;
    wait_for_connections(&server, 1).await;

    let second = tokio_tungstenite::connect_async(server.ws_url()).await;
    assert_eq!(rejected_status(second), 429);

    drop(first);
    wait_for_connections(&server, 0).await;
    // The per-IP slot is released asynchronously after the socket task ends.
    let mut admitted = None;
    for _ in 0..50 {
        if let Ok((stream, _)) = tokio_tungstenite::connect_async(server.ws_url()).await {
            admitted = Some(stream);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(admitted.is_some(), "slot was never released");
}
