//! Session management

use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use duet_core::error::ErrorCode;
use duet_core::ids;
use duet_core::message::Envelope;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Session identifier (`S-` + 16 hex chars)
pub type SessionId = String;

/// Outbound queue depth per session. Enqueue never blocks; when the queue
/// is full the frame is dropped and counted, because signaling is resent
/// by peers and a slow consumer must never stall the hub.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Which transport carries this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent full-duplex socket (WebSocket).
    WebSocket,
    /// Half-duplex event stream plus POST back-channel.
    Sse,
}

/// Current room membership of a session.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    pub rid: Option<String>,
    pub cid: Option<String>,
}

/// One live connection between a client and the server.
///
/// The hub is the only writer of the outbound queue; the owning transport
/// adapter is the only reader. An event-stream session keeps its identity
/// across reconnects: a re-attach swaps in a fresh queue under the queue
/// lock and bumps the attach epoch, so a frame enqueued concurrently with
/// the swap always lands on exactly one live queue.
pub struct Session {
    pub sid: SessionId,
    pub transport: TransportKind,
    pub ip: IpAddr,
    outbound: Mutex<mpsc::Sender<Bytes>>,
    membership: Mutex<Membership>,
    /// Unix millis of the last successful read; event-stream liveness.
    last_seen: AtomicI64,
    /// Bumped on every queue rebind; a stream holding an older epoch has
    /// been replaced and must not disconnect the session.
    attach_epoch: AtomicU64,
    total_drops: AtomicU64,
}

impl Session {
    /// Create a session with a fresh `sid` and a bounded outbound queue.
    /// Returns the receiving half for the transport adapter to drain.
    pub fn new(transport: TransportKind, ip: IpAddr) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        Self::with_sid(ids::session_id(), transport, ip)
    }

    /// Create a session under a caller-supplied `sid` (event-stream
    /// clients resuming an identity this process no longer knows).
    pub fn with_sid(
        sid: SessionId,
        transport: TransportKind,
        ip: IpAddr,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            sid,
            transport,
            ip,
            outbound: Mutex::new(tx),
            membership: Mutex::new(Membership::default()),
            last_seen: AtomicI64::new(now_millis()),
            attach_epoch: AtomicU64::new(0),
            total_drops: AtomicU64::new(0),
        });
        (session, rx)
    }

    /// Swap in a fresh outbound queue (event-stream resume). The previous
    /// queue's sender is dropped, which ends the superseded stream's drain
    /// loop. Returns the new receiver and the new attach epoch.
    pub fn rebind_queue(&self) -> (mpsc::Receiver<Bytes>, u64) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let mut outbound = self.outbound.lock();
        *outbound = tx;
        let epoch = self.attach_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.touch();
        (rx, epoch)
    }

    pub fn current_epoch(&self) -> u64 {
        self.attach_epoch.load(Ordering::SeqCst)
    }

    /// Whether a newer stream has taken over since `epoch` was observed.
    pub fn replaced_since(&self, epoch: u64) -> bool {
        self.current_epoch() != epoch
    }

    /// Enqueue one encoded frame without blocking. Returns false (and
    /// counts the drop) when the queue is full or closed.
    pub fn enqueue(&self, frame: Bytes) -> bool {
        let result = self.outbound.lock().try_send(frame);
        if let Err(e) = result {
            self.total_drops.fetch_add(1, Ordering::Relaxed);
            warn!(sid = %self.sid, error = %e, "dropping outbound frame");
            return false;
        }
        true
    }

    /// Serialize and enqueue a protocol message.
    pub fn send(&self, message: &Envelope) {
        match message.encode() {
            Ok(frame) => {
                self.enqueue(frame);
            }
            Err(e) => {
                debug!(sid = %self.sid, error = %e, "failed to encode outbound message");
            }
        }
    }

    /// Enqueue an `error` message.
    pub fn send_error(&self, code: ErrorCode, message: &str, rid: Option<&str>) {
        self.send(&Envelope::error(code, message, rid));
    }

    pub fn membership(&self) -> Membership {
        self.membership.lock().clone()
    }

    pub fn set_membership(&self, rid: &str, cid: &str) {
        let mut membership = self.membership.lock();
        membership.rid = Some(rid.to_string());
        membership.cid = Some(cid.to_string());
    }

    /// Clear room membership, returning what it was.
    pub fn clear_membership(&self) -> Membership {
        std::mem::take(&mut *self.membership.lock())
    }

    /// Record a successful read on this session.
    pub fn touch(&self) {
        self.last_seen.store(now_millis(), Ordering::Relaxed);
    }

    /// Time since the last successful read.
    pub fn idle(&self) -> Duration {
        let last = self.last_seen.load(Ordering::Relaxed);
        let now = now_millis();
        Duration::from_millis(now.saturating_sub(last).max(0) as u64)
    }

    /// Total frames dropped on this session's queue since creation.
    pub fn total_drops(&self) -> u64 {
        self.total_drops.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("transport", &self.transport)
            .field("ip", &self.ip)
            .field("membership", &*self.membership.lock())
            .finish()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_drain() {
        let (session, mut rx) = Session::new(TransportKind::WebSocket, ip());
        assert!(session.enqueue(Bytes::from_static(b"one")));
        assert!(session.enqueue(Bytes::from_static(b"two")));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (session, _rx) = Session::new(TransportKind::WebSocket, ip());
        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            assert!(session.enqueue(Bytes::from_static(b"x")));
        }
        assert!(!session.enqueue(Bytes::from_static(b"overflow")));
        assert_eq!(session.total_drops(), 1);
    }

    #[tokio::test]
    async fn rebind_ends_old_queue_and_routes_to_new() {
        let (session, mut old_rx) = Session::new(TransportKind::Sse, ip());
        assert_eq!(session.current_epoch(), 0);

        let (mut new_rx, epoch) = session.rebind_queue();
        assert_eq!(epoch, 1);
        assert!(session.replaced_since(0));

        // Old receiver drains to None once its sender is gone.
        assert!(old_rx.recv().await.is_none());

        assert!(session.enqueue(Bytes::from_static(b"after")));
        assert_eq!(new_rx.recv().await.unwrap(), Bytes::from_static(b"after"));
    }

    #[test]
    fn membership_round_trip() {
        let (session, _rx) = Session::new(TransportKind::WebSocket, ip());
        assert!(session.membership().rid.is_none());

        session.set_membership("R1", "C-abc");
        let m = session.membership();
        assert_eq!(m.rid.as_deref(), Some("R1"));
        assert_eq!(m.cid.as_deref(), Some("C-abc"));

        let old = session.clear_membership();
        assert_eq!(old.rid.as_deref(), Some("R1"));
        assert!(session.membership().rid.is_none());
    }
}
