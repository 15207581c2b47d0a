//! The signaling hub.
//!
//! All registry mutation happens here, under two lock tiers: the hub
//! registry locks (`rooms`, `watchers`) and each room's own mutex. When
//! both are needed the registry lock is acquired first. Outbound messages
//! are prepared from snapshots and enqueued only after every lock is
//! released; enqueue never blocks.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use duet_core::error::ErrorCode;
use duet_core::message::{
    Envelope, JoinPayload, JoinedPayload, RoomEndedPayload, RoomStatePayload,
    RoomStatusUpdatePayload, WatchRoomsPayload,
};
use duet_core::room_id::RoomIds;
use duet_core::tokens::{TokenKind, TokenStore, CALL_TOKEN_TTL};
use duet_core::{ids, Error, PROTOCOL_VERSION};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::room::{Room, RoomSnapshot};
use crate::session::{Session, SessionId, TransportKind};

/// How long a dropped event-stream gets to re-attach before its session
/// is disconnected.
pub const SSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Event-stream sessions idle longer than this are evicted by the reaper.
pub const SSE_STALE_TIMEOUT: Duration = Duration::from_secs(60);

/// Cadence of the stale-session reaper.
pub const SSE_REAPER_INTERVAL: Duration = Duration::from_secs(15);

/// The in-memory room and session registry.
pub struct Hub {
    sessions: DashMap<SessionId, Arc<Session>>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    watchers: RwLock<HashMap<String, HashSet<SessionId>>>,
    room_ids: Arc<RoomIds>,
    /// Present when TURN is configured; joins then carry a relay token.
    turn_tokens: Option<Arc<TokenStore>>,
}

impl Hub {
    pub fn new(room_ids: Arc<RoomIds>, turn_tokens: Option<Arc<TokenStore>>) -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            room_ids,
            turn_tokens,
        }
    }

    // =========================================================================
    // Transport-facing operations
    // =========================================================================

    /// Create and register a session. Returns the outbound queue receiver
    /// for the transport adapter to drain.
    pub fn register(
        &self,
        transport: TransportKind,
        ip: IpAddr,
    ) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
        let (session, rx) = Session::new(transport, ip);
        self.sessions.insert(session.sid.clone(), session.clone());
        info!(sid = %session.sid, ?transport, %ip, "session registered");
        (session, rx)
    }

    pub fn get(&self, sid: &str) -> Option<Arc<Session>> {
        self.sessions.get(sid).map(|entry| entry.value().clone())
    }

    /// Re-attach an event-stream session by `sid`: the old stream's queue
    /// is replaced atomically and its holder learns it was superseded via
    /// the returned epoch. Room membership and watch subscriptions carry
    /// over untouched.
    pub fn attach(&self, sid: &str) -> Option<(Arc<Session>, mpsc::Receiver<Bytes>, u64)> {
        let session = self.get(sid)?;
        if session.transport != TransportKind::Sse {
            return None;
        }
        let (rx, epoch) = session.rebind_queue();
        info!(sid = %session.sid, epoch, "event-stream session resumed");
        Some((session, rx, epoch))
    }

    /// Resolve an event-stream GET to a session: resume the named session
    /// if it exists, adopt the supplied `sid` if nothing holds it, or mint
    /// a fresh identity.
    pub fn resume_or_register(
        &self,
        requested_sid: Option<&str>,
        ip: IpAddr,
    ) -> (Arc<Session>, mpsc::Receiver<Bytes>, u64) {
        if let Some(sid) = requested_sid.map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(resumed) = self.attach(sid) {
                return resumed;
            }
            if !self.sessions.contains_key(sid) {
                let (session, rx) = Session::with_sid(sid.to_string(), TransportKind::Sse, ip);
                self.sessions.insert(session.sid.clone(), session.clone());
                info!(sid = %session.sid, %ip, "event-stream session adopted");
                let epoch = session.current_epoch();
                return (session, rx, epoch);
            }
            // The sid names a full-duplex session; fall through to a fresh one.
        }
        let (session, rx) = self.register(TransportKind::Sse, ip);
        let epoch = session.current_epoch();
        (session, rx, epoch)
    }

    /// Handle one raw frame received on a session.
    pub fn deliver(&self, session: &Arc<Session>, raw: &[u8]) {
        session.touch();

        let msg = match Envelope::decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(sid = %session.sid, error = %e, "undecodable frame");
                session.send_error(ErrorCode::BadRequest, "Invalid JSON", None);
                return;
            }
        };

        if msg.v != PROTOCOL_VERSION {
            session.send_error(
                ErrorCode::UnsupportedVersion,
                "Only protocol version 1 is supported",
                msg.rid.as_deref(),
            );
            return;
        }

        match msg.kind.as_str() {
            "join" => self.handle_join(session, &msg),
            "leave" => self.remove_from_room(session),
            "end_room" => self.handle_end_room(session),
            "offer" | "answer" | "ice" => self.handle_relay(session, &msg),
            "watch_rooms" => self.handle_watch_rooms(session, &msg),
            "ping" => {} // liveness only; touch above already recorded it
            other => {
                debug!(sid = %session.sid, kind = other, "unknown message type, dropping");
            }
        }
    }

    /// Tear a session down: registry, watch-sets, then room membership.
    /// Safe to call for sessions that were never in a room.
    pub fn disconnect(&self, session: &Arc<Session>) {
        info!(sid = %session.sid, "session disconnected");
        self.sessions.remove(&session.sid);

        {
            let mut watchers = self.watchers.write();
            watchers.retain(|_, set| {
                set.remove(&session.sid);
                !set.is_empty()
            });
        }

        self.remove_from_room(session);
    }

    /// An event-stream body went away. Does not disconnect immediately:
    /// the same `sid` may re-attach within the grace window, in which case
    /// the session (and its room slot) survives.
    pub fn stream_lost(self: Arc<Self>, session: &Arc<Session>, epoch: u64) {
        if session.replaced_since(epoch) {
            return;
        }
        let hub = self;
        let session = Arc::clone(session);
        tokio::spawn(async move {
            tokio::time::sleep(SSE_GRACE_PERIOD).await;
            if session.replaced_since(epoch) {
                return;
            }
            if !hub.sessions.contains_key(&session.sid) {
                return;
            }
            info!(sid = %session.sid, "grace window elapsed without re-attach");
            hub.disconnect(&session);
        });
    }

    /// Evict event-stream sessions that have been idle past the stale
    /// threshold. Runs on the reaper cadence.
    pub fn evict_stale_sessions(&self) -> usize {
        let stale: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry.value().transport == TransportKind::Sse
                    && entry.value().idle() > SSE_STALE_TIMEOUT
            })
            .map(|entry| entry.value().clone())
            .collect();

        for session in &stale {
            warn!(sid = %session.sid, "evicting stale event-stream session");
            self.disconnect(session);
        }
        stale.len()
    }

    // =========================================================================
    // Message handlers
    // =========================================================================

    fn handle_join(&self, session: &Arc<Session>, msg: &Envelope) {
        let Some(rid) = msg.rid.as_deref() else {
            session.send_error(ErrorCode::BadRequest, "Missing room id", None);
            return;
        };

        // Graceful switch: leave the current room before joining another.
        if session.membership().rid.is_some() {
            self.remove_from_room(session);
        }

        match self.room_ids.validate(rid) {
            Err(Error::SecretMissing) => {
                session.send_error(
                    ErrorCode::ServerNotConfigured,
                    "Room ID service is not configured",
                    Some(rid),
                );
                return;
            }
            Err(_) => {
                session.send_error(
                    ErrorCode::InvalidRoomId,
                    "Room ID must be a valid room token",
                    Some(rid),
                );
                return;
            }
            Ok(()) => {}
        }

        let payload: JoinPayload = msg
            .payload
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();

        let room = {
            let mut rooms = self.rooms.write();
            rooms
                .entry(rid.to_string())
                .or_insert_with(|| Arc::new(Room::new(rid)))
                .clone()
        };

        // Admission happens in one critical section: evict the ghost if the
        // caller proves ownership of a participant cid, re-check capacity
        // after the eviction, then insert.
        let admitted = room.with_lock(|r| {
            let mut ghost_sid = None;
            let mut reused_cid = None;

            if let Some(reconnect_cid) = payload.reconnect_cid.as_deref() {
                if let Some(ghost) = r.sid_holding(reconnect_cid) {
                    if ghost != session.sid {
                        r.evict(&ghost);
                        ghost_sid = Some(ghost);
                        reused_cid = Some(reconnect_cid.to_string());
                    }
                }
            }

            if r.is_full() {
                return Err(ghost_sid);
            }

            let cid = reused_cid.unwrap_or_else(ids::client_id);
            r.insert(&session.sid, &cid);
            Ok((cid, r.snapshot(), ghost_sid))
        });

        let (cid, snapshot, ghost_sid) = match admitted {
            Ok(parts) => parts,
            Err(_ghost) => {
                debug!(sid = %session.sid, rid, "join rejected, room full");
                session.send_error(ErrorCode::RoomFull, "Room is full", Some(rid));
                return;
            }
        };

        if let Some(ghost_sid) = ghost_sid {
            info!(rid, cid = %cid, ghost = %ghost_sid, "evicted ghost participant");
            if let Some(ghost) = self.get(&ghost_sid) {
                ghost.clear_membership();
            }
        }

        session.set_membership(rid, &cid);
        info!(sid = %session.sid, rid, cid = %cid, host = ?snapshot.host_cid, "joined room");

        let (turn_token, turn_token_expires_at) = self.issue_turn_token(session);
        let joined = JoinedPayload {
            host_cid: snapshot.host_cid.clone().unwrap_or_default(),
            participants: snapshot.participants,
            turn_token,
            turn_token_expires_at,
        };
        match Envelope::event("joined")
            .with_rid(rid)
            .with_sid(&session.sid)
            .with_cid(&cid)
            .with_payload(&joined)
        {
            Ok(reply) => session.send(&reply),
            Err(e) => warn!(sid = %session.sid, error = %e, "failed to encode joined"),
        }

        self.broadcast_room_state(&room);
        self.notify_watchers(rid);
    }

    fn handle_end_room(&self, session: &Arc<Session>) {
        let membership = session.membership();
        let (Some(rid), Some(cid)) = (membership.rid, membership.cid) else {
            return;
        };

        // Host check and registry removal in one pass so a racing join
        // cannot slip into a room that is about to disappear.
        let member_sids = {
            let mut rooms = self.rooms.write();
            let Some(room) = rooms.get(&rid).cloned() else {
                debug!(sid = %session.sid, rid, "end_room on unknown room");
                return;
            };
            let sids = room.with_lock(|r| {
                if r.host_cid() != Some(cid.as_str()) {
                    None
                } else {
                    Some(r.snapshot().member_sids)
                }
            });
            if sids.is_some() {
                rooms.remove(&rid);
            }
            sids
        };

        let Some(member_sids) = member_sids else {
            debug!(sid = %session.sid, rid, cid = %cid, "end_room from non-host");
            session.send_error(ErrorCode::NotHost, "Only the host can end the room", Some(&rid));
            return;
        };

        info!(rid, by = %cid, members = member_sids.len(), "room ended by host");

        let ended = RoomEndedPayload {
            by: cid,
            reason: "host_ended",
        };
        let Ok(msg) = Envelope::event("room_ended").with_rid(&rid).with_payload(&ended) else {
            return;
        };
        for sid in member_sids {
            if let Some(member) = self.get(&sid) {
                member.send(&msg);
                member.clear_membership();
            }
        }

        self.notify_watchers(&rid);
    }

    fn handle_relay(&self, session: &Arc<Session>, msg: &Envelope) {
        let membership = session.membership();
        let (Some(rid), Some(cid)) = (membership.rid, membership.cid) else {
            debug!(sid = %session.sid, kind = %msg.kind, "relay from session not in a room");
            return;
        };

        let room = { self.rooms.read().get(&rid).cloned() };
        let Some(room) = room else {
            debug!(sid = %session.sid, rid, "relay into unknown room");
            return;
        };

        let peers = room.with_lock(|r| {
            if r.contains(&session.sid) {
                Some(r.peers_of(&session.sid))
            } else {
                None
            }
        });
        let Some(peers) = peers else {
            debug!(sid = %session.sid, rid, "relay from non-participant");
            return;
        };

        // Rewrite the payload to carry the sender identity. A payload that
        // is not an object is replaced by one; ICE end-of-candidates
        // (`candidate: null`) passes through untouched.
        let mut payload = match msg.payload.clone() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                warn!(sid = %session.sid, kind = %msg.kind, ?other, "non-object relay payload");
                serde_json::Map::new()
            }
            None => serde_json::Map::new(),
        };
        payload.insert("from".to_string(), Value::String(cid.clone()));

        let relay = Envelope::event(&msg.kind)
            .with_rid(&rid)
            .with_payload_value(Value::Object(payload));

        let mut relayed = 0usize;
        for (peer_sid, peer_cid) in peers {
            if let Some(to) = msg.to.as_deref() {
                if to != peer_cid {
                    continue;
                }
            }
            if let Some(peer) = self.get(&peer_sid) {
                peer.send(&relay);
                relayed += 1;
            }
        }
        debug!(sid = %session.sid, kind = %msg.kind, rid, relayed, "relayed message");
    }

    fn handle_watch_rooms(&self, session: &Arc<Session>, msg: &Envelope) {
        let Some(payload) = msg
            .payload
            .as_ref()
            .and_then(|value| serde_json::from_value::<WatchRoomsPayload>(value.clone()).ok())
        else {
            session.send_error(ErrorCode::BadRequest, "Invalid payload", None);
            return;
        };

        let mut statuses = serde_json::Map::new();
        for rid in payload.rids {
            if self.room_ids.validate(&rid).is_err() {
                continue;
            }
            let count = self.occupancy(&rid);
            self.watchers
                .write()
                .entry(rid.clone())
                .or_default()
                .insert(session.sid.clone());
            statuses.insert(rid, count.into());
        }

        session.send(
            &Envelope::event("room_statuses").with_payload_value(Value::Object(statuses)),
        );
    }

    // =========================================================================
    // Room maintenance
    // =========================================================================

    /// Remove a session from its room, if any. Idempotent. Transfers the
    /// host role, deletes the room when it empties, and notifies remaining
    /// participants and watchers.
    fn remove_from_room(&self, session: &Arc<Session>) {
        let membership = session.clear_membership();
        let Some(rid) = membership.rid else {
            return;
        };

        let room = { self.rooms.read().get(&rid).cloned() };
        let Some(room) = room else {
            return;
        };

        let (removed, now_empty) = room.with_lock(|r| {
            let removed = r.remove(&session.sid);
            (removed, r.is_empty())
        });
        if removed.is_none() {
            return;
        }
        info!(sid = %session.sid, rid, cid = ?removed, "left room");

        if now_empty {
            self.delete_room_if_empty(&rid);
        } else {
            self.broadcast_room_state(&room);
        }

        self.notify_watchers(&rid);
    }

    /// Drop a room from the registry, re-checking emptiness under both
    /// lock tiers so a concurrent join cannot be lost.
    fn delete_room_if_empty(&self, rid: &str) {
        let mut rooms = self.rooms.write();
        if let Some(room) = rooms.get(rid) {
            if room.with_lock(|r| r.is_empty()) {
                rooms.remove(rid);
                debug!(rid, "room deleted");
            }
        }
    }

    /// Snapshot a room under its lock and broadcast `room_state` to every
    /// participant with the lock released.
    fn broadcast_room_state(&self, room: &Room) {
        let snapshot: RoomSnapshot = room.with_lock(|r| r.snapshot());
        let Some(host_cid) = snapshot.host_cid else {
            // Only observable while the room is being deleted.
            return;
        };

        let state = RoomStatePayload {
            host_cid,
            participants: snapshot.participants,
        };
        let Ok(msg) = Envelope::event("room_state")
            .with_rid(&room.rid)
            .with_payload(&state)
        else {
            return;
        };

        for sid in snapshot.member_sids {
            if let Some(member) = self.get(&sid) {
                member.send(&msg);
            }
        }
    }

    /// Emit `room_status_update` to every watcher of `rid`, snapshotting
    /// the watch-set first so a slow consumer never blocks a mutation.
    fn notify_watchers(&self, rid: &str) {
        let targets: Vec<SessionId> = {
            self.watchers
                .read()
                .get(rid)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        if targets.is_empty() {
            return;
        }

        let update = RoomStatusUpdatePayload {
            rid: rid.to_string(),
            count: self.occupancy(rid),
        };
        let Ok(msg) = Envelope::event("room_status_update").with_payload(&update) else {
            return;
        };

        for sid in targets {
            if let Some(watcher) = self.get(&sid) {
                watcher.send(&msg);
            }
        }
    }

    fn issue_turn_token(&self, session: &Arc<Session>) -> (Option<String>, Option<u64>) {
        let Some(store) = &self.turn_tokens else {
            return (None, None);
        };
        let (token, expires_at) = store.issue(session.ip, CALL_TOKEN_TTL, TokenKind::Call);
        let expires_unix = expires_at
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        (Some(token), Some(expires_unix))
    }

    // =========================================================================
    // Introspection (used by sweepers and tests)
    // =========================================================================

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn occupancy(&self, rid: &str) -> usize {
        self.rooms
            .read()
            .get(rid)
            .map(|room| room.occupancy())
            .unwrap_or(0)
    }

    pub fn watcher_count(&self, rid: &str) -> usize {
        self.watchers
            .read()
            .get(rid)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}
