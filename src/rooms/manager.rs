//! Per-user direct room bookkeeping

use crate::chat::Chat;
use crate::moderation::ModerationResult;
use crate::protocol::{RoomSnapshot, RoomsView, UserId};
use crate::rooms::future::RoomAvailabilityFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default name of the direct rooms the bot creates
pub const DEFAULT_DM_ROOM_NAME: &str = "WARNING!";

/// Two-member room shared with `user_id`, if the bot knows one
#[must_use]
pub fn find_private_room(rooms: &RoomsView, user_id: &UserId) -> Option<RoomSnapshot> {
    rooms.find(|room| room.is_direct_with(user_id))
}

/// Maps each user to the direct room used to notify them
pub struct RoomManager {
    chat: Arc<Chat>,
    room_name: String,
    /// Held for the whole lookup, so one user never gets two `createRoom` calls
    futures: Mutex<HashMap<UserId, RoomAvailabilityFuture>>,
}

impl RoomManager {
    pub fn new(chat: Arc<Chat>, room_name: impl Into<String>) -> Self {
        Self {
            chat,
            room_name: room_name.into(),
            futures: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a cached future can still be used
    ///
    /// Pending futures are always kept. Resolved ones only while the room is
    /// still a two-member room with the user.
    fn room_valid(future: &RoomAvailabilityFuture, rooms: &RoomsView) -> bool {
        if !future.is_resolved() {
            return true;
        }
        rooms
            .get(future.room_id())
            .is_some_and(|room| room.is_direct_with(future.user_id()))
    }

    /// Get the direct room for `user_id`, creating it if needed
    ///
    /// # Errors
    /// Returns `RoomCreationFailed` if a new room was needed and the server
    /// refused it. Nothing is cached in that case.
    pub async fn get_private_room_id(&self, user_id: &UserId) -> ModerationResult<RoomAvailabilityFuture> {
        let mut futures = self.futures.lock().await;
        let rooms = self.chat.client().rooms();

        if let Some(existing) = futures.get(user_id) {
            if Self::room_valid(existing, &rooms) {
                return Ok(existing.clone());
            }
            debug!(
                user_id = %user_id,
                room_id = %existing.room_id(),
                "Direct room is no longer valid, discarding"
            );
            futures.remove(user_id);
        }

        if let Some(room) = find_private_room(&rooms, user_id) {
            debug!(user_id = %user_id, room_id = %room.room_id, "Found existing direct room");
            let future = RoomAvailabilityFuture::resolved(user_id.clone(), room.room_id);
            futures.insert(user_id.clone(), future.clone());
            return Ok(future);
        }

        let room_id = self.chat.create_direct_room(user_id, &self.room_name).await?;
        let future = RoomAvailabilityFuture::pending(user_id.clone(), room_id);
        future.watch_for_arrival(rooms, &self.chat.client().sync_signal());

        info!(user_id = %user_id, room_id = %future.room_id(), "Requested new direct room");
        futures.insert(user_id.clone(), future.clone());
        Ok(future)
    }

    /// The cached future for a user, if any
    pub async fn cached(&self, user_id: &UserId) -> Option<RoomAvailabilityFuture> {
        self.futures.lock().await.get(user_id).cloned()
    }
}
