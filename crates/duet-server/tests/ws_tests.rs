//! WebSocket transport tests

use std::net::SocketAddr;
use std::time::Duration;

use duet_server::config::ServerConfig;
use duet_server::{build_router, AppState};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        room_id_secret: Some("test-secret".into()),
        room_id_env: "test".into(),
        turn_host: Some("relay.test".into()),
        turn_secret: Some("turn-secret".into()),
        allowed_origins: vec![],
    }
}

async fn start_server() -> (SocketAddr, AppState) {
    let state = AppState::from_config(&test_config());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (socket, _response) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn recv_json(socket: &mut WsClient) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_json(socket: &mut WsClient, value: serde_json::Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn join_over_websocket() {
    let (addr, state) = start_server().await;
    let rid = state.room_ids.generate().unwrap();

    let mut socket = connect(addr).await;
    send_json(&mut socket, serde_json::json!({"v": 1, "type": "join", "rid": rid})).await;

    let joined = recv_json(&mut socket).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["rid"], rid);
    assert!(joined["cid"].as_str().unwrap().starts_with("C-"));
    // TURN is configured, so the join carries a relay token.
    assert!(joined["payload"]["turnToken"].is_string());

    let state_msg = recv_json(&mut socket).await;
    assert_eq!(state_msg["type"], "room_state");
}

#[tokio::test]
async fn invalid_room_id_over_websocket() {
    let (addr, _state) = start_server().await;

    let mut socket = connect(addr).await;
    send_json(
        &mut socket,
        serde_json::json!({"v": 1, "type": "join", "rid": "A".repeat(27)}),
    )
    .await;

    let err = recv_json(&mut socket).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["code"], "INVALID_ROOM_ID");
}

#[tokio::test]
async fn offer_relays_between_sockets() {
    let (addr, state) = start_server().await;
    let rid = state.room_ids.generate().unwrap();

    let mut alice = connect(addr).await;
    send_json(&mut alice, serde_json::json!({"v": 1, "type": "join", "rid": rid})).await;
    let joined = recv_json(&mut alice).await;
    let alice_cid = joined["cid"].as_str().unwrap().to_string();
    recv_json(&mut alice).await; // own room_state

    let mut bob = connect(addr).await;
    send_json(&mut bob, serde_json::json!({"v": 1, "type": "join", "rid": rid})).await;
    recv_json(&mut bob).await; // joined
    recv_json(&mut bob).await; // room_state
    recv_json(&mut alice).await; // room_state with bob

    send_json(
        &mut alice,
        serde_json::json!({"v": 1, "type": "offer", "payload": {"sdp": "v=0"}}),
    )
    .await;

    let offer = recv_json(&mut bob).await;
    assert_eq!(offer["type"], "offer");
    assert_eq!(offer["payload"]["from"], alice_cid);
    assert_eq!(offer["payload"]["sdp"], "v=0");
}

#[tokio::test]
async fn close_removes_session_from_room() {
    let (addr, state) = start_server().await;
    let rid = state.room_ids.generate().unwrap();

    let mut socket = connect(addr).await;
    send_json(&mut socket, serde_json::json!({"v": 1, "type": "join", "rid": rid})).await;
    recv_json(&mut socket).await;
    assert_eq!(state.hub.occupancy(&rid), 1);

    socket.close(None).await.unwrap();

    // The read loop observes the close and tears the session down.
    timeout(Duration::from_secs(2), async {
        while state.hub.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not cleaned up");
    assert_eq!(state.hub.occupancy(&rid), 0);
    assert_eq!(state.hub.room_count(), 0);
}

#[tokio::test]
async fn disallowed_origin_fails_upgrade() {
    let (addr, _state) = start_server().await;

    // Hand-roll the request so we control the Origin header.
    let request = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
        format!("ws://{addr}/ws"),
    )
    .map(|mut request| {
        request
            .headers_mut()
            .insert("Origin", "https://evil.test".parse().unwrap());
        request
    })
    .unwrap();

    let result = connect_async(request).await;
    assert!(result.is_err(), "upgrade should be refused");
}
