//! HTTP façade: room-ID mint, TURN credentials, diagnostic tokens.

use std::net::SocketAddr;
use std::time::UNIX_EPOCH;

use axum::extract::{ConnectInfo, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use duet_core::tokens::{TokenKind, DIAGNOSTIC_TOKEN_TTL};
use serde_json::json;
use tracing::{debug, warn};

use crate::{check_origin, client_ip, AppState, X_TURN_TOKEN};

/// `POST /api/room-id` - mint a fresh unguessable room identifier.
pub async fn room_id(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if check_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let ip = client_ip(&headers, peer);
    if !state.limits.room_id.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    match state.room_ids.generate() {
        Ok(room_id) => (
            [(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
            Json(json!({ "roomId": room_id })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "room id generation failed");
            (StatusCode::SERVICE_UNAVAILABLE, "Room ID service unavailable").into_response()
        }
    }
}

/// `POST /api/turn-credentials` - exchange a relay token for TURN
/// credentials. The token proves a recent room join (or a diagnostic
/// grant); the credentials themselves are minted in coturn REST style.
pub async fn turn_credentials(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if check_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let ip = client_ip(&headers, peer);
    if !state.limits.turn_credentials.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let Some(turn) = &state.turn else {
        return (StatusCode::SERVICE_UNAVAILABLE, "TURN is not configured").into_response();
    };

    let token = headers
        .get(&X_TURN_TOKEN)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "Missing relay token").into_response();
    };

    match state.tokens.consume(token) {
        Ok(_) => Json(turn.mint()).into_response(),
        Err(e) => {
            debug!(%ip, error = %e, "relay token rejected");
            (StatusCode::UNAUTHORIZED, "Invalid relay token").into_response()
        }
    }
}

/// `POST /api/diagnostic-token` - short-lived token for the device-check
/// page to exercise the credential path.
pub async fn diagnostic_token(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if check_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let ip = client_ip(&headers, peer);
    if !state.limits.diagnostic.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let (token, expires_at) = state
        .tokens
        .issue(ip, DIAGNOSTIC_TOKEN_TTL, TokenKind::Diagnostic);
    let expires_unix = expires_at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(json!({ "token": token, "expiresAt": expires_unix })).into_response()
}

/// `GET /healthz`
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
