//! Error types for the moderation system
//!
//! Each variant names the step of a moderation transition that failed. They
//! are reported in the outcome and logged with it; none of them is allowed to
//! escape into the event loop.

use crate::protocol::{ProtocolError, RoomId, UserId};
use thiserror::Error;

/// Errors that can occur while moderating a message
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The bot may not redact in this room
    #[error("Bot lacks power to redact in room {0}")]
    InsufficientPower(RoomId),

    /// The bot may not change power levels in this room
    #[error("Bot lacks power to mute in room {0}")]
    CannotMute(RoomId),

    /// Redacting the offending message failed
    #[error("Failed to redact message: {0}")]
    RedactionFailed(#[source] ProtocolError),

    /// Creating a direct-message room failed
    #[error("Failed to create direct room for {user_id}: {source}")]
    RoomCreationFailed {
        user_id: UserId,
        #[source]
        source: ProtocolError,
    },

    /// Reading the power level state failed
    #[error("Failed to fetch power levels of room {room_id}: {source}")]
    StateFetchFailed {
        room_id: RoomId,
        #[source]
        source: ProtocolError,
    },

    /// Writing the power level state failed
    #[error("Failed to write power levels of room {room_id}: {source}")]
    StateWriteFailed {
        room_id: RoomId,
        #[source]
        source: ProtocolError,
    },

    /// Sending a message failed
    #[error("Failed to send message to room {room_id}: {source}")]
    SendFailed {
        room_id: RoomId,
        #[source]
        source: ProtocolError,
    },

    /// Reading or uploading an attachment failed
    #[error("Failed to upload {path}: {reason}")]
    UploadFailed { path: String, reason: String },

    /// The violation store failed
    #[error("Violation store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the persistent stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for moderation operations
pub type ModerationResult<T> = Result<T, ModerationError>;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
