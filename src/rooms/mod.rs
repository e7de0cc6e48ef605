//! Direct rooms used to notify users
//!
//! [`RoomManager`] finds or creates the room, [`RoomAvailabilityFuture`]
//! tracks when it becomes visible locally and [`DeferredSender`] holds
//! messages until then.

mod deferred;
mod future;
mod manager;

pub use deferred::{DeferredSender, Delivery};
pub use future::{DeferredSendRequest, RoomAvailabilityFuture};
pub use manager::{DEFAULT_DM_ROOM_NAME, RoomManager, find_private_room};
