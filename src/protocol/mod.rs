//! Chat protocol boundary
//!
//! Everything the moderation core needs from the chat server goes through
//! [`ProtocolClient`]. The HTTP implementation lives in [`http`]; tests use
//! the generated `MockProtocolClient` or an in-memory fake.

mod error;
pub mod http;
mod ids;
mod rooms;
pub mod sync;

pub use error::{LIMIT_EXCEEDED, ProtocolError, ProtocolResult};
pub use http::MatrixClient;
pub use ids::{EventId, RoomId, UserId};
pub use rooms::{
    ADMIN_LEVEL, ClientState, MODERATOR_LEVEL, MUTED_LEVEL, POWER_LEVELS_EVENT, PowerLevels,
    RoomSnapshot, RoomsView, SyncSignal,
};
pub use sync::{MessageEvent, SyncEvent};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Visibility of a room in the server's public directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomVisibility {
    Private,
    Public,
}

/// Preset applied by the server when creating a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPreset {
    PrivateChat,
    TrustedPrivateChat,
    PublicChat,
}

/// Body of a room creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub visibility: RoomVisibility,
    pub name: String,
    pub is_direct: bool,
    pub preset: RoomPreset,
    pub invite: Vec<UserId>,
}

impl CreateRoomRequest {
    /// A private direct-message room inviting a single user
    pub fn direct_message(name: impl Into<String>, user_id: UserId) -> Self {
        Self {
            visibility: RoomVisibility::Private,
            name: name.into(),
            is_direct: true,
            preset: RoomPreset::PrivateChat,
            invite: vec![user_id],
        }
    }
}

/// Operations the moderation core requires from the chat server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// The bot's own user id
    fn user_id(&self) -> UserId;

    /// Live view of known rooms, kept current by the sync loop
    fn rooms(&self) -> RoomsView;

    /// Signal fired after every completed sync cycle
    fn sync_signal(&self) -> SyncSignal;

    /// Send an `m.room.message` event
    async fn send_message(&self, room_id: &RoomId, content: Value) -> ProtocolResult<EventId>;

    /// Redact an event, returning the id of the redaction event
    async fn redact_event(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        reason: Option<String>,
    ) -> ProtocolResult<EventId>;

    /// Create a room, returning its id
    async fn create_room(&self, request: &CreateRoomRequest) -> ProtocolResult<RoomId>;

    /// Fetch the content of a state event with an empty state key
    async fn get_room_state(&self, room_id: &RoomId, event_type: &str) -> ProtocolResult<Value>;

    /// Replace the content of a state event with an empty state key
    async fn put_room_state(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
    ) -> ProtocolResult<EventId>;

    /// Upload media, returning its content URI
    async fn upload(
        &self,
        data: Vec<u8>,
        content_type: &str,
        filename: &str,
    ) -> ProtocolResult<String>;

    /// Join a room the bot was invited to
    async fn join_room(&self, room_id: &RoomId) -> ProtocolResult<RoomId>;
}
