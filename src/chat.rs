//! Direct chat operations
//!
//! Thin helpers on top of the protocol client: sending text and attachments,
//! redacting, creating direct rooms and changing power levels. Every call is
//! routed through the rate limit retrier and failures are mapped to the
//! moderation step they belong to.

use crate::moderation::{ModerationError, ModerationResult, Storage};
use crate::protocol::{
    CreateRoomRequest, EventId, POWER_LEVELS_EVENT, ProtocolClient, ProtocolError, RoomId, UserId,
};
use crate::ratelimit::RateLimitRetrier;
use pulldown_cmark::{Parser, html};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Content of a message to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Markdown text, sent as a notice
    Text(String),
    /// A local file sent as an attachment
    Image(PathBuf),
}

impl MessageContent {
    /// Short description for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Image(_) => "image",
        }
    }
}

/// A file that has been uploaded to the media repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub content_uri: String,
    pub mime_type: &'static str,
    pub size: u64,
    pub filename: String,
}

/// Render markdown to the HTML used in `formatted_body`
#[must_use]
pub fn markdown_to_html(markdown: &str) -> String {
    let mut output = String::new();
    html::push_html(&mut output, Parser::new(markdown));
    output
}

/// Guess a MIME type from a file extension
#[must_use]
pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("gif") => "image/gif",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Chat operations shared by the moderation components
pub struct Chat {
    client: Arc<dyn ProtocolClient>,
    storage: Arc<Storage>,
    retrier: RateLimitRetrier,
}

impl Chat {
    /// Create the chat helpers
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        storage: Arc<Storage>,
        retrier: RateLimitRetrier,
    ) -> Self {
        Self {
            client,
            storage,
            retrier,
        }
    }

    /// The underlying protocol client
    #[must_use]
    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    async fn send_raw(&self, room_id: &RoomId, content: Value) -> ModerationResult<EventId> {
        self.retrier
            .execute("send_message", || self.client.send_message(room_id, content.clone()))
            .await
            .map_err(|source| {
                error!(room_id = %room_id, "Failed to send message: {source}");
                ModerationError::SendFailed {
                    room_id: room_id.clone(),
                    source,
                }
            })
    }

    /// Send a text message, rendering markdown into `formatted_body`
    ///
    /// Notices do not ping room members.
    ///
    /// # Errors
    /// Returns `SendFailed` if the server rejects the message.
    pub async fn send_text_to_room(
        &self,
        room_id: &RoomId,
        message: &str,
        notice: bool,
    ) -> ModerationResult<EventId> {
        let content = json!({
            "msgtype": if notice { "m.notice" } else { "m.text" },
            "body": message,
            "format": "org.matrix.custom.html",
            "formatted_body": markdown_to_html(message),
        });
        self.send_raw(room_id, content).await
    }

    /// Upload a file unless it was uploaded before
    ///
    /// # Errors
    /// Returns `UploadFailed` if the file is missing or unreadable, or if the
    /// upload is rejected.
    pub async fn upload_once(&self, path: &Path) -> ModerationResult<UploadedFile> {
        let key = path.to_string_lossy().to_string();
        let upload_error = |reason: String| ModerationError::UploadFailed {
            path: key.clone(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        if !metadata.is_file() {
            return Err(upload_error("not a regular file".to_string()));
        }

        let mime_type = mime_type_for(path);
        let filename = path
            .file_name()
            .map_or_else(|| key.clone(), |name| name.to_string_lossy().to_string());

        if let Some(content_uri) = self.storage.content_uri(&key) {
            debug!(path = %key, content_uri = %content_uri, "Reusing cached upload");
            return Ok(UploadedFile {
                content_uri,
                mime_type,
                size: metadata.len(),
                filename,
            });
        }

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        let content_uri = self
            .retrier
            .execute("upload", || {
                self.client.upload(data.clone(), mime_type, &filename)
            })
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        info!(path = %key, content_uri = %content_uri, "Uploaded file");
        self.storage.set_content_uri(&key, &content_uri).await?;

        Ok(UploadedFile {
            content_uri,
            mime_type,
            size: metadata.len(),
            filename,
        })
    }

    /// Send a local file as an attachment
    ///
    /// # Errors
    /// Returns `UploadFailed` or `SendFailed`.
    pub async fn send_image_to_room(&self, room_id: &RoomId, path: &Path) -> ModerationResult<EventId> {
        let file = self.upload_once(path).await?;
        let msgtype = if file.mime_type.starts_with("image/") {
            "m.image"
        } else {
            "m.file"
        };

        let content = json!({
            "msgtype": msgtype,
            "body": file.filename,
            "url": file.content_uri,
            "info": {
                "size": file.size,
                "mimetype": file.mime_type,
            },
        });
        self.send_raw(room_id, content).await
    }

    /// Send either kind of content
    ///
    /// # Errors
    /// See [`Chat::send_text_to_room`] and [`Chat::send_image_to_room`].
    pub async fn send_content(&self, room_id: &RoomId, content: &MessageContent) -> ModerationResult<EventId> {
        match content {
            MessageContent::Text(text) => self.send_text_to_room(room_id, text, true).await,
            MessageContent::Image(path) => self.send_image_to_room(room_id, path).await,
        }
    }

    /// Redact an event
    ///
    /// # Errors
    /// Returns `RedactionFailed` on any non rate limit failure.
    pub async fn redact(
        &self,
        room_id: &RoomId,
        event_id: &EventId,
        reason: &str,
    ) -> ModerationResult<EventId> {
        self.retrier
            .execute("redact_event", || {
                self.client
                    .redact_event(room_id, event_id, Some(reason.to_string()))
            })
            .await
            .map_err(ModerationError::RedactionFailed)
    }

    /// Ask the server for a new private direct room with `user_id`
    ///
    /// # Errors
    /// Returns `RoomCreationFailed` if the server refuses.
    pub async fn create_direct_room(&self, user_id: &UserId, name: &str) -> ModerationResult<RoomId> {
        let request = CreateRoomRequest::direct_message(name, user_id.clone());
        match self
            .retrier
            .execute("create_room", || self.client.create_room(&request))
            .await
        {
            Ok(room_id) => {
                debug!(user_id = %user_id, room_id = %room_id, "Created a new direct room");
                Ok(room_id)
            }
            Err(source) => {
                error!(user_id = %user_id, "Failed to create a new direct room: {source}");
                Err(ModerationError::RoomCreationFailed {
                    user_id: user_id.clone(),
                    source,
                })
            }
        }
    }

    /// Set a user's power level with a read-modify-write of the power levels
    ///
    /// # Errors
    /// Returns `StateFetchFailed` if the current levels cannot be read and
    /// `StateWriteFailed` if the new levels are rejected.
    pub async fn set_user_power(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        power: i64,
    ) -> ModerationResult<EventId> {
        debug!(room_id = %room_id, user_id = %user_id, power, "Setting user power");

        let mut content = self
            .retrier
            .execute("get_room_state", || {
                self.client.get_room_state(room_id, POWER_LEVELS_EVENT)
            })
            .await
            .map_err(|source| ModerationError::StateFetchFailed {
                room_id: room_id.clone(),
                source,
            })?;

        let Some(levels) = content.as_object_mut() else {
            return Err(ModerationError::StateFetchFailed {
                room_id: room_id.clone(),
                source: ProtocolError::InvalidResponse("power levels are not an object".to_string()),
            });
        };
        let users = levels.entry("users").or_insert_with(|| json!({}));
        if !users.is_object() {
            *users = json!({});
        }
        users[user_id.as_str()] = json!(power);

        self.retrier
            .execute("put_room_state", || {
                self.client
                    .put_room_state(room_id, POWER_LEVELS_EVENT, content.clone())
            })
            .await
            .map_err(|source| ModerationError::StateWriteFailed {
                room_id: room_id.clone(),
                source,
            })
    }

    /// Join a room
    ///
    /// # Errors
    /// Returns the protocol error if joining fails.
    pub async fn join_room(&self, room_id: &RoomId) -> Result<RoomId, ProtocolError> {
        self.retrier
            .execute("join_room", || self.client.join_room(room_id))
            .await
    }
}
