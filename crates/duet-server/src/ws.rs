//! Full-duplex transport adapter (WebSocket).
//!
//! One task per connection: inbound frames go to the hub, the session's
//! outbound queue drains back to the wire one protocol message per frame
//! (clients decode exactly one JSON object per frame, so no coalescing),
//! and a heartbeat keeps half-open connections from lingering.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use duet_core::MAX_MESSAGE_SIZE;
use duet_hub::TransportKind;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use crate::{check_origin, client_ip, AppState};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(54);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if check_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let ip = client_ip(&headers, peer);
    if !state.limits.ws.allow(ip) {
        debug!(%ip, "websocket upgrade rate limited");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(state, socket, ip))
}

async fn handle_socket(state: AppState, mut socket: WebSocket, ip: IpAddr) {
    let (session, mut outbound) = state.hub.register(TransportKind::WebSocket, ip);
    let sid = session.sid.clone();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.reset(); // skip the immediate first tick
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(last_inbound + READ_TIMEOUT) => {
                info!(sid = %sid, "read deadline exceeded, closing");
                break;
            }
            _ = heartbeat.tick() => {
                let ping = socket.send(Message::Ping(Vec::new()));
                if timeout(WRITE_TIMEOUT, ping).await.map_or(true, |r| r.is_err()) {
                    break;
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Queue closed: the hub evicted this session.
                    break;
                };
                let Ok(text) = String::from_utf8(frame.to_vec()) else {
                    continue;
                };
                match timeout(WRITE_TIMEOUT, socket.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(sid = %sid, error = %e, "write error");
                        break;
                    }
                    Err(_) => {
                        debug!(sid = %sid, "write deadline exceeded");
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(msg)) => {
                        last_inbound = Instant::now();
                        match msg {
                            Message::Text(text) => state.hub.deliver(&session, text.as_bytes()),
                            Message::Binary(data) => state.hub.deliver(&session, &data),
                            Message::Close(_) => break,
                            // Pings are answered by the protocol layer;
                            // pongs only refresh the read deadline.
                            Message::Ping(_) | Message::Pong(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        debug!(sid = %sid, error = %e, "read error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Exactly one hub-disconnect per session, whatever ended the loop.
    state.hub.disconnect(&session);
}
