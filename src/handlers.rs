use crate::EVENT_TARGET;
use crate::chat::Chat;
use crate::config::Config;
use crate::moderation::{ModerationOutcome, ModerationPolicy};
use crate::protocol::{MessageEvent, RoomId, RoomSnapshot, SyncEvent};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info};

/// Why a message was not handed to the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    OwnMessage,
    Threaded,
    Edit,
    UnknownRoom,
    Unmoderated,
    DirectRoom,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::OwnMessage => "own message",
            Self::Threaded => "threaded reply",
            Self::Edit => "edit",
            Self::UnknownRoom => "unknown room",
            Self::Unmoderated => "room not moderated",
            Self::DirectRoom => "direct room",
        };
        f.write_str(reason)
    }
}

/// Dispatches sync events to the moderation policy
pub struct Handler {
    chat: Arc<Chat>,
    policy: ModerationPolicy,
    config: Arc<Config>,
}

impl Handler {
    pub fn new(chat: Arc<Chat>, policy: ModerationPolicy, config: Arc<Config>) -> Self {
        Self {
            chat,
            policy,
            config,
        }
    }

    /// Handle events one at a time until the sync loop stops
    pub async fn run(&self, mut events: Receiver<SyncEvent>) {
        info!(target: EVENT_TARGET, "Event handler started");
        while let Some(event) = events.recv().await {
            self.on_event(event).await;
        }
        info!(target: EVENT_TARGET, "Event handler stopped");
    }

    pub async fn on_event(&self, event: SyncEvent) {
        match event {
            SyncEvent::Message(message) => {
                self.on_message(&message).await;
            }
            SyncEvent::Invite { room_id } => self.on_invite(&room_id).await,
        }
    }

    /// Decide whether a message is subject to the thread policy
    fn check(&self, message: &MessageEvent) -> Result<RoomSnapshot, Skip> {
        if message.sender == self.chat.client().user_id() {
            return Err(Skip::OwnMessage);
        }
        if message.is_threaded() {
            return Err(Skip::Threaded);
        }
        if message.is_edit() {
            return Err(Skip::Edit);
        }
        if !self.config.is_moderated(&message.room_id) {
            return Err(Skip::Unmoderated);
        }
        let room = self
            .chat
            .client()
            .rooms()
            .get(&message.room_id)
            .ok_or(Skip::UnknownRoom)?;
        if room.member_count() <= 2 {
            return Err(Skip::DirectRoom);
        }
        Ok(room)
    }

    /// Handle one message, returning the policy outcome if it was moderated
    pub async fn on_message(&self, message: &MessageEvent) -> Option<ModerationOutcome> {
        match self.check(message) {
            Ok(room) => Some(self.policy.filter_channel(&room, message).await),
            Err(skip) => {
                debug!(
                    target: EVENT_TARGET,
                    room_id = %message.room_id,
                    event_id = %message.event_id,
                    reason = %skip,
                    "Message skipped"
                );
                None
            }
        }
    }

    async fn on_invite(&self, room_id: &RoomId) {
        if !self.config.moderation.auto_join {
            info!(target: EVENT_TARGET, room_id = %room_id, "Ignoring invite");
            return;
        }

        match self.chat.join_room(room_id).await {
            Ok(joined) => info!(target: EVENT_TARGET, room_id = %joined, "Joined room"),
            Err(e) => error!(target: EVENT_TARGET, room_id = %room_id, "Failed to join room: {e}"),
        }
    }
}
