//! Local view of the rooms the bot knows about
//!
//! The view is written by the sync loop and read by everything else. It is
//! eventually consistent: a room the server just created for us is not in
//! here until a later sync cycle has delivered it, which is what
//! [`SyncSignal`] lets waiters observe.

use crate::protocol::{RoomId, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;

/// Power level of a muted user
pub const MUTED_LEVEL: i64 = -1;
/// Power level from which a user counts as a moderator
pub const MODERATOR_LEVEL: i64 = 50;
/// Power level of a room admin
pub const ADMIN_LEVEL: i64 = 100;

/// Event type of the power level state event
pub const POWER_LEVELS_EVENT: &str = "m.room.power_levels";

const fn default_moderator_level() -> i64 {
    MODERATOR_LEVEL
}

/// Content of a room's `m.room.power_levels` state event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLevels {
    /// Explicit per-user levels
    #[serde(default)]
    pub users: BTreeMap<UserId, i64>,
    /// Level of users not listed in `users`
    #[serde(default)]
    pub users_default: i64,
    /// Level required to redact other users' events
    #[serde(default = "default_moderator_level")]
    pub redact: i64,
    /// Level required to send state events not listed in `events`
    #[serde(default = "default_moderator_level")]
    pub state_default: i64,
    /// Level required to send message events not listed in `events`
    #[serde(default)]
    pub events_default: i64,
    /// Per event type overrides
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            users_default: 0,
            redact: MODERATOR_LEVEL,
            state_default: MODERATOR_LEVEL,
            events_default: 0,
            events: BTreeMap::new(),
        }
    }
}

impl PowerLevels {
    /// Power level of a user in this room
    #[must_use]
    pub fn user_level(&self, user_id: &UserId) -> i64 {
        self.users
            .get(user_id)
            .copied()
            .unwrap_or(self.users_default)
    }

    /// Whether a user may redact events sent by others
    #[must_use]
    pub fn can_user_redact(&self, user_id: &UserId) -> bool {
        self.user_level(user_id) >= self.redact
    }

    /// Whether a user may send a given state event
    #[must_use]
    pub fn can_user_send_state(&self, user_id: &UserId, event_type: &str) -> bool {
        let required = self
            .events
            .get(event_type)
            .copied()
            .unwrap_or(self.state_default);
        self.user_level(user_id) >= required
    }
}

/// Snapshot of one room in the local view
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    /// Name from `m.room.name`, if the room has one
    pub name: Option<String>,
    /// Joined members
    pub members: BTreeSet<UserId>,
    /// Invited but not yet joined members
    pub invited: BTreeSet<UserId>,
    /// `m.joined_member_count` from the sync summary, when sent
    pub joined_count: Option<u64>,
    /// `m.invited_member_count` from the sync summary, when sent
    pub invited_count: Option<u64>,
    pub power_levels: PowerLevels,
}

impl RoomSnapshot {
    /// Create an empty snapshot for a room
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Default::default()
        }
    }

    /// Name to show users, falling back to the room id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.room_id.as_str())
    }

    /// Joined plus invited members, preferring the server's summary counts
    #[must_use]
    pub fn member_count(&self) -> u64 {
        let joined = self
            .joined_count
            .unwrap_or_else(|| u64::try_from(self.members.len()).unwrap_or(u64::MAX));
        let invited = self
            .invited_count
            .unwrap_or_else(|| u64::try_from(self.invited.len()).unwrap_or(u64::MAX));
        joined.saturating_add(invited)
    }

    /// Whether this is a two-member room shared with `user_id`
    ///
    /// The user may be joined or merely invited; a freshly created direct
    /// room has the target in the invited set until they accept.
    #[must_use]
    pub fn is_direct_with(&self, user_id: &UserId) -> bool {
        self.member_count() == 2 && (self.members.contains(user_id) || self.invited.contains(user_id))
    }

    /// Joined members holding exactly admin level, except `exclude`
    #[must_use]
    pub fn admins(&self, exclude: &UserId) -> Vec<UserId> {
        self.members
            .iter()
            .filter(|user| *user != exclude)
            .filter(|user| self.power_levels.user_level(user) == ADMIN_LEVEL)
            .cloned()
            .collect()
    }
}

/// Shared, live view of all known rooms
#[derive(Clone, Default)]
pub struct RoomsView {
    rooms: Arc<DashMap<RoomId, RoomSnapshot>>,
}

impl std::fmt::Debug for RoomsView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomsView")
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

impl RoomsView {
    /// Create an empty view
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a room is known locally
    #[must_use]
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Clone out the snapshot of a room
    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    /// First room matching a predicate
    pub fn find(&self, predicate: impl Fn(&RoomSnapshot) -> bool) -> Option<RoomSnapshot> {
        self.rooms
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    /// Insert or replace a snapshot
    pub fn insert(&self, snapshot: RoomSnapshot) {
        self.rooms.insert(snapshot.room_id.clone(), snapshot);
    }

    /// Mutate a room's snapshot, creating an empty one first if needed
    pub fn update(&self, room_id: &RoomId, apply: impl FnOnce(&mut RoomSnapshot)) {
        let mut entry = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| RoomSnapshot::new(room_id.clone()));
        apply(entry.value_mut());
    }

    /// Forget a room
    pub fn remove(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
        self.rooms.remove(room_id).map(|(_, snapshot)| snapshot)
    }

    /// Number of known rooms
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no rooms are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Fired once per completed sync cycle
///
/// The value is a generation counter; receivers only care that it changed.
#[derive(Clone)]
pub struct SyncSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for SyncSignal {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }
}

impl SyncSignal {
    /// Mark a sync cycle as complete and wake every receiver
    pub fn notify_synced(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Receiver that observes future sync completions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// Room view plus its sync signal, shared by a client and its readers
#[derive(Clone, Default)]
pub struct ClientState {
    pub rooms: RoomsView,
    pub synced: SyncSignal,
}
