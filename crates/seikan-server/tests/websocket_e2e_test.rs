//! End-to-end tests over a real socket
//!
//! The mediator runs on an ephemeral port; endpoints are tokio-tungstenite
//! clients speaking the JSON event protocol.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use seikan_proto::ProbeResponse;
use seikan_server::{MediatorServer, ServerConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_mediator(config: ServerConfig) -> SocketAddr {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("seikan_server=debug,seikan_control=debug")
        .with_test_writer()
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = MediatorServer::new(config);
    tokio::spawn(server.serve(listener, std::future::pending()));
    addr
}

async fn open(addr: SocketAddr) -> Client {
    let url = format!("ws://{}/seikan-api/ws", addr);
    let (client, _) = connect_async(&url)
        .await
        .expect("Failed to connect to mediator");
    client
}

async fn send(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Next JSON event, or `None` once the mediator closed the socket
async fn recv(client: &mut Client) -> Option<Value> {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(&text).expect("mediator sent invalid JSON"))
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn expect_event(client: &mut Client, event: &str) -> Value {
    let value = recv(client).await.expect("socket closed unexpectedly");
    assert_eq!(value["event"], event, "unexpected frame {}", value);
    value
}

/// Runs new, join, the key exchange and both accepts
async fn connected_pair(addr: SocketAddr) -> (Client, Client) {
    let mut a = open(addr).await;
    let mut b = open(addr).await;

    send(&mut a, json!({ "event": "new" })).await;
    let tunnel_id = expect_event(&mut a, "tunnel-id").await["tunnelId"].clone();

    send(&mut b, json!({ "event": "join", "tunnelId": tunnel_id })).await;

    let ack = expect_event(&mut a, "request-public-key").await["ack"].clone();
    send(
        &mut a,
        json!({ "event": "ack", "id": ack, "payload": { "publicKey": "PUBLIC" } }),
    )
    .await;

    let request = expect_event(&mut b, "public-key").await;
    assert_eq!(request["publicKey"], "PUBLIC");
    send(
        &mut b,
        json!({ "event": "ack", "id": request["ack"], "payload": { "identifier": "ENCRYPTED" } }),
    )
    .await;

    let forwarded = expect_event(&mut a, "b-identifier").await;
    assert_eq!(forwarded["identifier"], "ENCRYPTED");

    send(&mut a, json!({ "event": "accept" })).await;
    send(&mut b, json!({ "event": "accept" })).await;
    expect_event(&mut a, "connected").await;
    expect_event(&mut b, "connected").await;

    (a, b)
}

#[tokio::test]
async fn test_probe_reports_version_with_cors() {
    let addr = start_mediator(ServerConfig::default().with_cors(false)).await;

    let response = reqwest::get(format!("http://{}/seikan-api", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );

    let probe: ProbeResponse = response.json().await.unwrap();
    assert_eq!(probe.version, "1.0.0");
    assert_eq!(probe.major(), Some(1));
}

#[tokio::test]
async fn test_status_counts_tunnels() {
    let addr = start_mediator(ServerConfig::default()).await;
    let status_url = format!("http://{}/seikan-api/status", addr);

    let mut waiting = open(addr).await;
    send(&mut waiting, json!({ "event": "new" })).await;
    expect_event(&mut waiting, "tunnel-id").await;
    let (_a, _b) = connected_pair(addr).await;

    let status: Value = reqwest::get(&status_url)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "healthy");
    assert_eq!(status["waitingTunnels"], 1);
    assert_eq!(status["activeTunnels"], 1);
}

#[tokio::test]
async fn test_full_tunnel_relays_bytes_both_ways() {
    let addr = start_mediator(ServerConfig::default()).await;
    let (mut a, mut b) = connected_pair(addr).await;

    // base64 of [0x00, 0x01, 0x02, 0xff]
    send(&mut a, json!({ "event": "data", "chunk": "AAEC/w==" })).await;
    send(&mut a, json!({ "event": "data", "chunk": "aGVsbG8=" })).await;
    assert_eq!(expect_event(&mut b, "data").await["chunk"], "AAEC/w==");
    assert_eq!(expect_event(&mut b, "data").await["chunk"], "aGVsbG8=");

    send(&mut b, json!({ "event": "data", "chunk": "" })).await;
    assert_eq!(expect_event(&mut a, "data").await["chunk"], "");
}

#[tokio::test]
async fn test_peer_disconnect_is_reported() {
    let addr = start_mediator(ServerConfig::default()).await;
    let (mut a, b) = connected_pair(addr).await;

    drop(b);

    let error = expect_event(&mut a, "error").await;
    assert_eq!(error["message"], "The other side disconnected.");
    assert!(recv(&mut a).await.is_none());
}

#[tokio::test]
async fn test_join_with_unknown_id() {
    let addr = start_mediator(ServerConfig::default()).await;
    let mut c = open(addr).await;

    send(&mut c, json!({ "event": "join", "tunnelId": "000-000-000" })).await;

    let error = expect_event(&mut c, "error").await;
    assert_eq!(error["message"], "Invalid tunnel ID");
    assert!(recv(&mut c).await.is_none());
}

#[tokio::test]
async fn test_garbage_frame_tears_down_tunnel() {
    let addr = start_mediator(ServerConfig::default()).await;
    let (mut a, mut b) = connected_pair(addr).await;

    b.send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();

    let error = expect_event(&mut b, "error").await;
    assert!(error["message"]
        .as_str()
        .unwrap()
        .starts_with("Malformed request"));
    expect_event(&mut a, "error").await;
    assert!(recv(&mut a).await.is_none());
    assert!(recv(&mut b).await.is_none());
}

#[tokio::test]
async fn test_binary_frame_is_rejected() {
    let addr = start_mediator(ServerConfig::default()).await;
    let mut c = open(addr).await;

    c.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();

    let error = expect_event(&mut c, "error").await;
    assert_eq!(error["message"], "Binary frames are not supported");
}

#[tokio::test]
async fn test_handshake_timeout_over_socket() {
    let config = ServerConfig::default().with_mediator(
        seikan_control::MediatorConfig::default()
            .with_public_key_timeout(Duration::from_millis(100)),
    );
    let addr = start_mediator(config).await;
    let mut a = open(addr).await;
    let mut b = open(addr).await;

    send(&mut a, json!({ "event": "new" })).await;
    let tunnel_id = expect_event(&mut a, "tunnel-id").await["tunnelId"].clone();
    send(&mut b, json!({ "event": "join", "tunnelId": tunnel_id })).await;
    let ack = expect_event(&mut a, "request-public-key").await["ack"].clone();

    let error = expect_event(&mut b, "error").await;
    assert!(error["message"].as_str().unwrap().starts_with("Timed out"));
    expect_event(&mut a, "error").await;

    // A late answer is never acted on
    let _ = a
        .send(Message::Text(
            json!({ "event": "ack", "id": ack, "payload": { "publicKey": "late" } })
                .to_string()
                .into(),
        ))
        .await;
    assert!(recv(&mut b).await.is_none());
}
