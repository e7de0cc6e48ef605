//! Delivery of messages into rooms that may not exist locally yet

use crate::chat::{Chat, MessageContent};
use crate::moderation::ModerationResult;
use crate::protocol::EventId;
use crate::rooms::future::{Enqueued, RoomAvailabilityFuture};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What happened to a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Delivered right away
    Sent(EventId),
    /// Will be delivered by the drain task once the room is available
    Queued,
}

/// Sends now when the room is available, otherwise once it resolves
#[derive(Clone)]
pub struct DeferredSender {
    chat: Arc<Chat>,
}

impl DeferredSender {
    pub fn new(chat: Arc<Chat>) -> Self {
        Self { chat }
    }

    /// Send `content` into the room behind `future`
    ///
    /// Deferred sends are delivered at most once, in registration order, by a
    /// single drain task per future. Their failures are logged, not returned.
    ///
    /// # Errors
    /// Only an immediate send can fail; see [`Chat::send_content`].
    pub async fn send_once_available(
        &self,
        content: MessageContent,
        future: &RoomAvailabilityFuture,
    ) -> ModerationResult<Delivery> {
        match future.enqueue(content).await {
            Enqueued::Ready(content) => {
                let event_id = self.chat.send_content(future.room_id(), &content).await?;
                Ok(Delivery::Sent(event_id))
            }
            Enqueued::Queued { start_drain } => {
                debug!(
                    room_id = %future.room_id(),
                    user_id = %future.user_id(),
                    "Room not available yet, send queued"
                );
                if start_drain {
                    self.spawn_drain(future.clone());
                }
                Ok(Delivery::Queued)
            }
        }
    }

    fn spawn_drain(&self, future: RoomAvailabilityFuture) {
        let chat = Arc::clone(&self.chat);

        tokio::spawn(async move {
            future.wait().await;

            while let Some(request) = future.next_pending().await {
                let kind = request.content.kind();
                match chat.send_content(future.room_id(), &request.content).await {
                    Ok(event_id) => info!(
                        room_id = %future.room_id(),
                        event_id = %event_id,
                        kind,
                        "Delivered deferred message"
                    ),
                    Err(e) => error!(
                        room_id = %future.room_id(),
                        kind,
                        "Failed to deliver deferred message: {e}"
                    ),
                }
            }
        });
    }
}
