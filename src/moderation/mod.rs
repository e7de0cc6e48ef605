//! Moderation of top-level messages
//!
//! The violation store, the escalation state machine and the policy that
//! drives redaction, warnings and mutes.

mod error;
pub mod notice;
mod policy;
mod record;
mod store;

pub use error::{ModerationError, ModerationResult, StoreError, StoreResult};
pub use policy::{ModerationOutcome, ModerationPolicy, PolicySettings};
pub use record::{DEFAULT_WARNING_THRESHOLD, ModerationState, Verdict, ViolationRecord};
pub use store::{Storage, UploadEntry, ViolationStore};
