//! Chatroom registry
//!
//! Single source of truth for room membership, and the only mutable
//! state shared across sessions. All access goes through one mutex;
//! callers get owned snapshots back and never touch the map directly,
//! so the lock is never held across network I/O.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{ServerEvent, UserInfo};
use crate::types::UserId;

/// A chatroom member: identity plus the handle for delivering events
///
/// `outbound` feeds the owning session's writer task, so routing code
/// can deliver to a member without touching the socket itself.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: UserId,
    pub nickname: String,
    pub outbound: mpsc::Sender<ServerEvent>,
}

impl Member {
    /// Public view of this member for join responses
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            nickname: self.nickname.clone(),
        }
    }
}

/// Shared room-name → member-list mapping
///
/// Rooms are created lazily on first join and dropped once their last
/// member leaves. Membership is keyed by `UserId`; a room never holds
/// two members with the same id.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Member>>> {
        // A poisoned lock only means another session panicked mid-update;
        // the map itself is still valid (membership updates are single
        // push/retain operations).
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `member` to `room`, creating the room if absent
    ///
    /// Returns the member list as it was strictly before this insertion,
    /// so a joiner never observes itself as already present.
    pub fn join(&self, room: &str, member: Member) -> Vec<Member> {
        let mut rooms = self.lock();
        let members = rooms.entry(room.to_string()).or_default();
        let snapshot = members.clone();
        if !members.iter().any(|m| m.id == member.id) {
            members.push(member);
        }
        snapshot
    }

    /// Remove the member with `id` from `room`; no-op if absent
    pub fn leave(&self, room: &str, id: UserId) {
        let mut rooms = self.lock();
        if let Some(members) = rooms.get_mut(room) {
            members.retain(|m| m.id != id);
            if members.is_empty() {
                rooms.remove(room);
                debug!(room, "room dropped (empty)");
            }
        }
    }

    /// Read-only snapshot of a room's current members
    ///
    /// Empty if the room does not exist.
    pub fn members(&self, room: &str) -> Vec<Member> {
        self.lock().get(room).cloned().unwrap_or_default()
    }

    /// Number of rooms currently known
    pub fn room_count(&self) -> usize {
        self.lock().len()
    }
}
