//! Room state

use std::collections::HashMap;

use duet_core::message::Participant;
use parking_lot::Mutex;

use crate::session::SessionId;

/// Maximum participants per room (one-to-one calls).
pub const ROOM_CAPACITY: usize = 2;

/// A call room, keyed by its validated room identifier.
///
/// Participants and the host designation live behind the room's own mutex.
/// Lock order is strict: when both are needed, the hub registry lock is
/// taken before the room lock, and nothing is ever sent on a session queue
/// while either is held.
pub struct Room {
    pub rid: String,
    inner: Mutex<RoomInner>,
}

#[derive(Default)]
struct RoomInner {
    /// session -> cid
    participants: HashMap<SessionId, String>,
    host_cid: Option<String>,
}

/// Point-in-time view of a room, taken under the room lock and used for
/// sends after it is released.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub host_cid: Option<String>,
    pub participants: Vec<Participant>,
    pub member_sids: Vec<SessionId>,
}

impl Room {
    pub fn new(rid: &str) -> Self {
        Self {
            rid: rid.to_string(),
            inner: Mutex::new(RoomInner::default()),
        }
    }

    /// Run `f` with the room lock held.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut RoomGuard<'_>) -> T) -> T {
        let mut inner = self.inner.lock();
        let mut guard = RoomGuard { inner: &mut *inner };
        f(&mut guard)
    }

    /// Participant count, taking and releasing the room lock.
    pub fn occupancy(&self) -> usize {
        self.inner.lock().participants.len()
    }
}

/// Mutable view of a locked room.
pub struct RoomGuard<'a> {
    inner: &'a mut RoomInner,
}

impl RoomGuard<'_> {
    pub fn len(&self) -> usize {
        self.inner.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.participants.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.participants.len() >= ROOM_CAPACITY
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.inner.participants.contains_key(sid)
    }

    pub fn cid_of(&self, sid: &str) -> Option<&str> {
        self.inner.participants.get(sid).map(String::as_str)
    }

    /// Find the session currently holding `cid`.
    pub fn sid_holding(&self, cid: &str) -> Option<SessionId> {
        self.inner
            .participants
            .iter()
            .find(|(_, c)| c.as_str() == cid)
            .map(|(sid, _)| sid.clone())
    }

    pub fn host_cid(&self) -> Option<&str> {
        self.inner.host_cid.as_deref()
    }

    /// Insert a participant; becomes host if the room has none.
    pub fn insert(&mut self, sid: &str, cid: &str) {
        self.inner.participants.insert(sid.to_string(), cid.to_string());
        if self.inner.host_cid.is_none() {
            self.inner.host_cid = Some(cid.to_string());
        }
    }

    /// Remove a ghost participant without touching the host designation.
    /// The evicted cid is about to be reinserted for the reconnecting
    /// session, so host identity must survive the swap.
    pub fn evict(&mut self, sid: &str) -> Option<String> {
        self.inner.participants.remove(sid)
    }

    /// Remove a participant; transfers host to any remaining participant
    /// when the host leaves. Returns the removed cid.
    pub fn remove(&mut self, sid: &str) -> Option<String> {
        let removed = self.inner.participants.remove(sid)?;
        if self.inner.host_cid.as_deref() == Some(removed.as_str()) {
            self.inner.host_cid = self.inner.participants.values().next().cloned();
        }
        Some(removed)
    }

    /// Other participants' (sid, cid) pairs, for relay targeting.
    pub fn peers_of(&self, sid: &str) -> Vec<(SessionId, String)> {
        self.inner
            .participants
            .iter()
            .filter(|(s, _)| s.as_str() != sid)
            .map(|(s, c)| (s.clone(), c.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            host_cid: self.inner.host_cid.clone(),
            participants: self
                .inner
                .participants
                .values()
                .map(|cid| Participant { cid: cid.clone() })
                .collect(),
            member_sids: self.inner.participants.keys().cloned().collect(),
        }
    }
}
