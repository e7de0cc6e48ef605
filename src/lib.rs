pub mod chat;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod moderation;
pub mod protocol;
pub mod ratelimit;
pub mod rooms;

#[cfg(test)]
mod testing;

pub const BOT_NAME: &str = "thread_warden";
pub const MODERATION_TARGET: &str = "thread_warden::moderation";
pub const ERROR_TARGET: &str = "thread_warden::error";
pub const EVENT_TARGET: &str = "thread_warden::handlers";
pub const CONSOLE_TARGET: &str = "thread_warden";

pub use chat::{Chat, MessageContent};
pub use config::{Config, ConfigError};
pub use handlers::Handler;
pub use moderation::{ModerationOutcome, ModerationPolicy, Storage};
pub use protocol::{MatrixClient, ProtocolClient};
pub use ratelimit::RateLimitRetrier;
pub use rooms::{DeferredSender, RoomAvailabilityFuture, RoomManager};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
