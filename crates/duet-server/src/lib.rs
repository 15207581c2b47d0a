//! Duet Server
//!
//! HTTP front door for the signaling hub: the WebSocket and event-stream
//! transport adapters, the room-ID / TURN-credential / diagnostic API, and
//! the wiring between them. The binary in `main.rs` owns startup, the
//! background sweepers, and shutdown.

pub mod api;
pub mod config;
pub mod device_check;
pub mod origin;
pub mod rate_limit;
pub mod sse;
pub mod turn;
pub mod ws;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{HeaderMap, CONTENT_TYPE, HOST, ORIGIN};
use axum::http::{HeaderName, Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use duet_core::tokens::TokenStore;
use duet_core::room_id::RoomIds;
use duet_core::MAX_MESSAGE_SIZE;
use duet_hub::Hub;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::origin::OriginGate;
use crate::rate_limit::RateLimits;
use crate::turn::TurnConfig;

/// Total time allowed for ordinary HTTP handlers. The event-stream GET
/// and the WebSocket upgrade are exempt (long-lived).
const API_TIMEOUT: Duration = Duration::from_secs(15);

pub static X_TURN_TOKEN: HeaderName = HeaderName::from_static("x-turn-token");
pub static X_SSE_SID: HeaderName = HeaderName::from_static("x-sse-sid");

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub tokens: Arc<TokenStore>,
    pub room_ids: Arc<RoomIds>,
    pub origins: Arc<OriginGate>,
    pub limits: Arc<RateLimits>,
    pub turn: Option<Arc<TurnConfig>>,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Self {
        let room_ids = Arc::new(RoomIds::new(
            config.room_id_secret.as_deref(),
            &config.room_id_env,
        ));
        let tokens = Arc::new(TokenStore::new());
        let turn = match (&config.turn_host, &config.turn_secret) {
            (Some(host), Some(secret)) => {
                Some(Arc::new(TurnConfig::new(host.clone(), secret.clone())))
            }
            _ => None,
        };
        // Joins mint relay tokens only when a relay exists to redeem them.
        let turn_tokens = turn.as_ref().map(|_| tokens.clone());

        Self {
            hub: Arc::new(Hub::new(room_ids.clone(), turn_tokens)),
            tokens,
            room_ids,
            origins: Arc::new(OriginGate::new(config.allowed_origins.iter().cloned())),
            limits: Arc::new(RateLimits::new()),
            turn,
        }
    }
}

/// Assemble the full route table.
pub fn build_router(state: AppState) -> Router {
    let cors = {
        let gate = state.origins.clone();
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin, parts| {
                let host = parts
                    .headers
                    .get(HOST)
                    .and_then(|value| value.to_str().ok());
                gate.allows(origin.to_str().ok(), host)
            }))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, X_TURN_TOKEN.clone(), X_SSE_SID.clone()])
    };

    let api = Router::new()
        .route("/api/room-id", post(api::room_id).get(api::room_id))
        .route("/api/turn-credentials", post(api::turn_credentials))
        .route("/api/diagnostic-token", post(api::diagnostic_token))
        .route("/device-check", get(device_check::page))
        .route("/healthz", get(api::healthz))
        .layer(TimeoutLayer::new(API_TIMEOUT));

    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/sse", get(sse::stream).post(sse::post))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_MESSAGE_SIZE))
        .with_state(state)
}

/// Client IP for rate limiting and token binding: first forwarded-for hop
/// when the reverse proxy supplies one, else the peer address.
pub(crate) fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|hop| hop.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

/// Reject disallowed cross-origin requests before any protocol work.
pub(crate) fn check_origin(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let origin = headers.get(ORIGIN).and_then(|value| value.to_str().ok());
    let host = headers.get(HOST).and_then(|value| value.to_str().ok());
    if state.origins.allows(origin, host) {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let peer: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(
            client_ip(&headers, peer),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.1:4444".parse().unwrap();
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, peer), "192.0.2.1".parse::<IpAddr>().unwrap());

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "garbage".parse().unwrap());
        assert_eq!(client_ip(&headers, peer), "192.0.2.1".parse::<IpAddr>().unwrap());
    }
}
