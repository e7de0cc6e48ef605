//! Sync response parsing
//!
//! Folds each `/sync` response into the shared [`RoomsView`] and extracts the
//! events the handler cares about: new room messages and invites.

use crate::protocol::{EventId, PowerLevels, RoomId, RoomSnapshot, RoomsView, UserId};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Relation type marking a message as part of a thread
pub const THREAD_RELATION: &str = "m.thread";
/// Relation type marking a message as an edit of another
pub const REPLACE_RELATION: &str = "m.replace";

/// Top level of a `/sync` response
#[derive(Debug, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

/// Room sections of a sync response
#[derive(Debug, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: HashMap<RoomId, JoinedRoom>,
    #[serde(default)]
    pub invite: HashMap<RoomId, Value>,
    #[serde(default)]
    pub leave: HashMap<RoomId, Value>,
}

/// Updates for a room the bot is joined to
#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub summary: RoomSummary,
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: EventList,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoomSummary {
    #[serde(rename = "m.joined_member_count")]
    pub joined_member_count: Option<u64>,
    #[serde(rename = "m.invited_member_count")]
    pub invited_member_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

/// A client event as delivered by sync
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default)]
    pub sender: Option<UserId>,
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub content: Value,
}

/// A message posted in a room
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub room_id: RoomId,
    pub event_id: EventId,
    pub sender: UserId,
    pub content: Value,
}

impl MessageEvent {
    /// Plain text body, if any
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    fn relation_type(&self) -> Option<&str> {
        self.content
            .get("m.relates_to")
            .and_then(|relation| relation.get("rel_type"))
            .and_then(Value::as_str)
    }

    /// Whether the message was posted inside a thread
    #[must_use]
    pub fn is_threaded(&self) -> bool {
        self.relation_type() == Some(THREAD_RELATION)
    }

    /// Whether the message edits an earlier one
    #[must_use]
    pub fn is_edit(&self) -> bool {
        self.relation_type() == Some(REPLACE_RELATION)
    }
}

/// Events handed from the sync loop to the handler
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A new message in a joined room
    Message(MessageEvent),
    /// The bot was invited to a room
    Invite { room_id: RoomId },
}

/// Apply a sync response to the room view
///
/// Messages are only returned when `dispatch_messages` is set; the first sync
/// after startup replays history that must not be moderated again.
pub fn apply_sync(
    rooms: &RoomsView,
    response: SyncResponse,
    dispatch_messages: bool,
) -> Vec<SyncEvent> {
    let mut events = Vec::new();

    for (room_id, joined) in response.rooms.join {
        rooms.update(&room_id, |room| {
            if let Some(count) = joined.summary.joined_member_count {
                room.joined_count = Some(count);
            }
            if let Some(count) = joined.summary.invited_member_count {
                room.invited_count = Some(count);
            }
            for event in &joined.state.events {
                apply_state_event(room, event);
            }
        });

        for event in joined.timeline.events {
            if event.state_key.is_some() {
                rooms.update(&room_id, |room| apply_state_event(room, &event));
                continue;
            }
            if event.event_type != "m.room.message" || !dispatch_messages {
                continue;
            }
            match (event.event_id, event.sender) {
                (Some(event_id), Some(sender)) => {
                    events.push(SyncEvent::Message(MessageEvent {
                        room_id: room_id.clone(),
                        event_id,
                        sender,
                        content: event.content,
                    }));
                }
                _ => debug!(room_id = %room_id, "Skipping message without id or sender"),
            }
        }
    }

    for room_id in response.rooms.invite.into_keys() {
        events.push(SyncEvent::Invite { room_id });
    }

    for room_id in response.rooms.leave.keys() {
        if rooms.remove(room_id).is_some() {
            debug!(room_id = %room_id, "Left room, dropping it from the local view");
        }
    }

    events
}

/// Apply one state event to a room snapshot
pub fn apply_state_event(room: &mut RoomSnapshot, event: &RawEvent) {
    let Some(state_key) = event.state_key.as_deref() else {
        return;
    };

    match event.event_type.as_str() {
        "m.room.member" => {
            let user_id = UserId::from(state_key);
            match event.content.get("membership").and_then(Value::as_str) {
                Some("join") => {
                    room.invited.remove(&user_id);
                    room.members.insert(user_id);
                }
                Some("invite") => {
                    room.members.remove(&user_id);
                    room.invited.insert(user_id);
                }
                Some("leave" | "ban") => {
                    room.members.remove(&user_id);
                    room.invited.remove(&user_id);
                }
                _ => {}
            }
        }
        "m.room.power_levels" => {
            match serde_json::from_value::<PowerLevels>(event.content.clone()) {
                Ok(levels) => room.power_levels = levels,
                Err(e) => warn!(room_id = %room.room_id, "Ignoring malformed power levels: {e}"),
            }
        }
        "m.room.name" => {
            room.name = event
                .content
                .get("name")
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> SyncResponse {
        serde_json::from_value(body).expect("Failed to parse sync response")
    }

    fn sample_sync() -> Value {
        json!({
            "next_batch": "s2",
            "rooms": {
                "join": {
                    "!general:example.org": {
                        "summary": { "m.joined_member_count": 3 },
                        "state": { "events": [
                            { "type": "m.room.name", "state_key": "", "content": { "name": "General" } },
                            { "type": "m.room.member", "state_key": "@bot:example.org", "content": { "membership": "join" } },
                            { "type": "m.room.member", "state_key": "@alice:example.org", "content": { "membership": "join" } },
                            { "type": "m.room.power_levels", "state_key": "", "content": {
                                "users": { "@bot:example.org": 100, "@alice:example.org": 0 }
                            } }
                        ] },
                        "timeline": { "events": [
                            { "type": "m.room.message", "event_id": "$1", "sender": "@alice:example.org",
                              "content": { "msgtype": "m.text", "body": "hello" } },
                            { "type": "m.room.member", "state_key": "@carol:example.org",
                              "sender": "@carol:example.org", "event_id": "$2", "content": { "membership": "invite" } },
                            { "type": "m.reaction", "event_id": "$3", "sender": "@alice:example.org", "content": {} }
                        ] }
                    }
                },
                "invite": { "!new:example.org": { "invite_state": { "events": [] } } }
            }
        })
    }

    #[test]
    fn test_apply_sync_builds_room_view() {
        let rooms = RoomsView::new();
        let events = apply_sync(&rooms, parse(sample_sync()), true);

        let room = rooms.get(&RoomId::from("!general:example.org")).expect("room missing");
        assert_eq!(room.display_name(), "General");
        assert!(room.members.contains(&UserId::from("@alice:example.org")));
        assert!(room.invited.contains(&UserId::from("@carol:example.org")));
        assert_eq!(room.joined_count, Some(3));
        assert_eq!(room.power_levels.user_level(&UserId::from("@bot:example.org")), 100);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SyncEvent::Message(message) if message.body() == Some("hello")
        ));
        assert_eq!(
            events[1],
            SyncEvent::Invite {
                room_id: RoomId::from("!new:example.org")
            }
        );
    }

    #[test]
    fn test_initial_sync_does_not_dispatch_messages() {
        let rooms = RoomsView::new();
        let events = apply_sync(&rooms, parse(sample_sync()), false);

        assert!(events.iter().all(|event| matches!(event, SyncEvent::Invite { .. })));
        assert_eq!(rooms.len(), 1);
    }

    #[test]
    fn test_leave_removes_room() {
        let rooms = RoomsView::new();
        rooms.insert(RoomSnapshot::new("!old:example.org"));

        let response = parse(json!({
            "next_batch": "s3",
            "rooms": { "leave": { "!old:example.org": {} } }
        }));
        apply_sync(&rooms, response, true);

        assert!(rooms.is_empty());
    }

    #[test]
    fn test_membership_transitions() {
        let mut room = RoomSnapshot::new("!dm:example.org");
        let member = |membership: &str| RawEvent {
            event_type: "m.room.member".to_string(),
            state_key: Some("@alice:example.org".to_string()),
            sender: None,
            event_id: None,
            content: json!({ "membership": membership }),
        };
        let alice = UserId::from("@alice:example.org");

        apply_state_event(&mut room, &member("invite"));
        assert!(room.invited.contains(&alice));

        apply_state_event(&mut room, &member("join"));
        assert!(room.members.contains(&alice));
        assert!(!room.invited.contains(&alice));

        apply_state_event(&mut room, &member("leave"));
        assert!(!room.members.contains(&alice));
    }

    #[test]
    fn test_thread_and_edit_detection() {
        let message = |content: Value| MessageEvent {
            room_id: RoomId::from("!room:example.org"),
            event_id: EventId::from("$1"),
            sender: UserId::from("@alice:example.org"),
            content,
        };

        let threaded = message(json!({
            "body": "in thread",
            "m.relates_to": { "rel_type": "m.thread", "event_id": "$root" }
        }));
        assert!(threaded.is_threaded());
        assert!(!threaded.is_edit());

        let reply = message(json!({
            "body": "plain reply",
            "m.relates_to": { "m.in_reply_to": { "event_id": "$root" } }
        }));
        assert!(!reply.is_threaded());

        let edit = message(json!({
            "body": "* fixed",
            "m.relates_to": { "rel_type": "m.replace", "event_id": "$1" }
        }));
        assert!(edit.is_edit());
    }
}
