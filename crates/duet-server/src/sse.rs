//! Half-duplex transport adapter (event-stream + POST).
//!
//! `GET /sse` opens the server-to-client stream; `POST /sse` carries
//! client-to-server messages for the session named by `X-SSE-SID`. A
//! dropped stream does not kill the session immediately: the hub grants a
//! grace window during which the same `sid` may re-attach and inherit its
//! room slot and queue.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use duet_hub::{Hub, Session, TransportKind};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{check_origin, client_ip, AppState, X_SSE_SID};

const PING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    #[serde(default)]
    sid: Option<String>,
}

pub async fn stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    if check_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let ip = client_ip(&headers, peer);
    if !state.limits.sse.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let (session, rx, epoch) = state.hub.resume_or_register(query.sid.as_deref(), ip);
    let stream = SessionStream {
        hub: state.hub.clone(),
        session,
        epoch,
        rx,
        sent_ready: false,
    };

    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(PING_INTERVAL).text("ping"))
        .into_response();
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    // Reverse proxies must not buffer the stream.
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

pub async fn post(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if check_origin(&state, &headers).is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let ip = client_ip(&headers, peer);
    if !state.limits.sse.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let sid = headers
        .get(&X_SSE_SID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| query.sid.clone().filter(|s| !s.trim().is_empty()));
    let Some(sid) = sid else {
        return (StatusCode::BAD_REQUEST, "Missing event-stream session").into_response();
    };

    let session = state
        .hub
        .get(&sid)
        .filter(|session| session.transport == TransportKind::Sse);
    let Some(session) = session else {
        return (StatusCode::GONE, "Unknown event-stream session").into_response();
    };

    if body.iter().all(u8::is_ascii_whitespace) {
        return (StatusCode::BAD_REQUEST, "Empty request body").into_response();
    }

    state.hub.deliver(&session, &body);
    StatusCode::NO_CONTENT.into_response()
}

/// Adapts a session's outbound queue into an SSE body. Dropping the stream
/// (client went away) reports the loss to the hub, which starts the grace
/// window for this attach epoch.
struct SessionStream {
    hub: Arc<Hub>,
    session: Arc<Session>,
    epoch: u64,
    rx: mpsc::Receiver<Bytes>,
    sent_ready: bool,
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if !this.sent_ready {
            this.sent_ready = true;
            return Poll::Ready(Some(Ok(Event::default().comment("ready"))));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => match std::str::from_utf8(&frame) {
                Ok(json) => Poll::Ready(Some(Ok(Event::default().data(json)))),
                Err(_) => {
                    debug!(sid = %this.session.sid, "skipping non-UTF-8 frame");
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            },
            // Queue replaced by a resume, or session evicted: end the body.
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.hub.clone().stream_lost(&self.session, self.epoch);
    }
}
