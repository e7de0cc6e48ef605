//! Thread reply policy
//!
//! A top-level message from a non-moderator in a moderated room is a
//! violation. The policy redacts it, counts it and either warns the sender in
//! their direct room or mutes them once the threshold is reached.

use crate::chat::{Chat, MessageContent};
use crate::logging;
use crate::moderation::notice::{DEFAULT_REDACTION_REASON, ban_text, warning_text};
use crate::moderation::{
    DEFAULT_WARNING_THRESHOLD, ModerationError, ModerationState, Verdict, ViolationStore,
};
use crate::protocol::{
    MODERATOR_LEVEL, MUTED_LEVEL, MessageEvent, POWER_LEVELS_EVENT, RoomSnapshot, UserId,
};
use crate::rooms::{Delivery, DeferredSender, RoomManager};
use crate::{ERROR_TARGET, MODERATION_TARGET};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Tunables of the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySettings {
    /// Violations at which the sender is muted
    pub warning_threshold: u32,
    /// Senders at or above this level are never moderated
    pub moderator_level: i64,
    pub redaction_reason: String,
    /// Sent after each warning when set
    pub help_image: Option<PathBuf>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            moderator_level: MODERATOR_LEVEL,
            redaction_reason: DEFAULT_REDACTION_REASON.to_string(),
            help_image: None,
        }
    }
}

/// What the policy did with a message
#[derive(Debug)]
pub enum ModerationOutcome {
    /// The sender is a moderator; nothing was done
    Ignored { sender_level: i64 },
    /// A step failed; the error has already been logged
    Aborted(ModerationError),
    /// The violation was counted and a warning sent or queued
    Warned {
        count: u32,
        notice: Option<Delivery>,
    },
    /// The sender was muted and told which admins to contact
    Muted {
        admins: Vec<UserId>,
        notice: Option<Delivery>,
    },
    /// The sender was already muted; the ban notice was repeated
    RemindedMuted { notice: Option<Delivery> },
}

impl fmt::Display for ModerationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignored { sender_level } => write!(f, "Ignored (level {sender_level})"),
            Self::Aborted(e) => write!(f, "Aborted: {e}"),
            Self::Warned { count, .. } => write!(f, "Warned ({count})"),
            Self::Muted { .. } => write!(f, "Muted"),
            Self::RemindedMuted { .. } => write!(f, "Reminded Muted"),
        }
    }
}

/// Applies the thread reply policy to messages
pub struct ModerationPolicy {
    chat: Arc<Chat>,
    store: Arc<dyn ViolationStore>,
    rooms: Arc<RoomManager>,
    sender: DeferredSender,
    settings: PolicySettings,
}

impl ModerationPolicy {
    pub fn new(
        chat: Arc<Chat>,
        store: Arc<dyn ViolationStore>,
        rooms: Arc<RoomManager>,
        settings: PolicySettings,
    ) -> Self {
        Self {
            sender: DeferredSender::new(Arc::clone(&chat)),
            chat,
            store,
            rooms,
            settings,
        }
    }

    /// Moderate a top-level message posted in `room`
    ///
    /// Never fails: every error is reported as [`ModerationOutcome::Aborted`]
    /// and logged once by the end event.
    pub async fn filter_channel(&self, room: &RoomSnapshot, message: &MessageEvent) -> ModerationOutcome {
        let start = Instant::now();
        logging::log_moderation_start(message);

        let outcome = self.evaluate(room, message).await;

        logging::log_moderation_end(message, &outcome, start.elapsed());
        outcome
    }

    async fn evaluate(&self, room: &RoomSnapshot, message: &MessageEvent) -> ModerationOutcome {
        let bot_id = self.chat.client().user_id();
        let sender_level = room.power_levels.user_level(&message.sender);

        if sender_level >= self.settings.moderator_level {
            return ModerationOutcome::Ignored { sender_level };
        }

        if !room.power_levels.can_user_redact(&bot_id) {
            return ModerationOutcome::Aborted(ModerationError::InsufficientPower(room.room_id.clone()));
        }

        if let Err(e) = self
            .chat
            .redact(&room.room_id, &message.event_id, &self.settings.redaction_reason)
            .await
        {
            return ModerationOutcome::Aborted(e);
        }

        let muted = sender_level <= MUTED_LEVEL;
        let count = if muted {
            self.settings.warning_threshold
        } else {
            match self.store.get_count(&message.sender, &room.room_id).await {
                Ok(count) => count,
                Err(e) => return ModerationOutcome::Aborted(e.into()),
            }
        };

        let state = ModerationState::from_record(count, muted);
        let verdict = state.on_violation(self.settings.warning_threshold);
        info!(
            target: MODERATION_TARGET,
            user_id = %message.sender,
            room_id = %room.room_id,
            state = %state,
            verdict = %verdict,
            next = %state.apply(verdict),
            "Violation evaluated"
        );

        match verdict {
            Verdict::Warn { .. } => self.warn(room, &message.sender).await,
            Verdict::Mute => self.mute(room, &message.sender, &bot_id).await,
            Verdict::RemindMuted => {
                let admins = room.admins(&bot_id);
                let notice = self.notify_ban(room, &message.sender, &admins).await;
                ModerationOutcome::RemindedMuted { notice }
            }
        }
    }

    async fn warn(&self, room: &RoomSnapshot, user_id: &UserId) -> ModerationOutcome {
        let count = match self.store.upsert_increment(user_id, &room.room_id).await {
            Ok(count) => count,
            Err(e) => return ModerationOutcome::Aborted(e.into()),
        };

        let text = warning_text(count, room.display_name());
        let notice = self
            .notify(user_id, MessageContent::Text(text), self.settings.help_image.clone())
            .await;
        ModerationOutcome::Warned { count, notice }
    }

    async fn mute(&self, room: &RoomSnapshot, user_id: &UserId, bot_id: &UserId) -> ModerationOutcome {
        if !room.power_levels.can_user_send_state(bot_id, POWER_LEVELS_EVENT) {
            return ModerationOutcome::Aborted(ModerationError::CannotMute(room.room_id.clone()));
        }

        if let Err(e) = self.store.delete(user_id, &room.room_id).await {
            return ModerationOutcome::Aborted(e.into());
        }

        if let Err(e) = self
            .chat
            .set_user_power(&room.room_id, user_id, MUTED_LEVEL)
            .await
        {
            return ModerationOutcome::Aborted(e);
        }
        info!(
            target: MODERATION_TARGET,
            user_id = %user_id,
            room_id = %room.room_id,
            "User muted"
        );

        let admins = room.admins(bot_id);
        let notice = self.notify_ban(room, user_id, &admins).await;
        ModerationOutcome::Muted { admins, notice }
    }

    async fn notify_ban(&self, room: &RoomSnapshot, user_id: &UserId, admins: &[UserId]) -> Option<Delivery> {
        let text = ban_text(self.settings.warning_threshold, room.display_name(), admins);
        self.notify(user_id, MessageContent::Text(text), None).await
    }

    /// Deliver a notice, then an optional attachment, to the user's direct room
    ///
    /// Returns how the notice itself was delivered, or `None` if it failed.
    async fn notify(
        &self,
        user_id: &UserId,
        notice: MessageContent,
        attachment: Option<PathBuf>,
    ) -> Option<Delivery> {
        let future = match self.rooms.get_private_room_id(user_id).await {
            Ok(future) => future,
            Err(e) => {
                error!(target: ERROR_TARGET, user_id = %user_id, "{e}");
                return None;
            }
        };

        let delivery = match self.sender.send_once_available(notice, &future).await {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                error!(target: ERROR_TARGET, user_id = %user_id, "{e}");
                None
            }
        };

        if let Some(path) = attachment {
            if let Err(e) = self
                .sender
                .send_once_available(MessageContent::Image(path), &future)
                .await
            {
                error!(target: ERROR_TARGET, user_id = %user_id, "{e}");
            }
        }

        delivery
    }
}
