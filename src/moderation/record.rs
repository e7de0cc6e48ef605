//! Violation records and the escalation state machine
//!
//! A user moves through `Clean` → `Warned(n)` → `Banned` per room. The
//! record only exists while the user is `Warned`; escalating to `Banned`
//! deletes it, and from then on the muted power level is the source of truth.

use crate::protocol::{RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Violations at which a user is muted instead of warned
pub const DEFAULT_WARNING_THRESHOLD: u32 = 3;

/// Persistent counter of one user's violations in one room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub count: u32,
    /// When the first counted violation happened
    pub first_seen: DateTime<Utc>,
    /// When the latest counted violation happened
    pub last_seen: DateTime<Utc>,
}

impl ViolationRecord {
    /// Create an empty record
    pub fn new(user_id: UserId, room_id: RoomId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            room_id,
            count: 0,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Count one more violation, returning the new count
    pub fn increment(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.last_seen = Utc::now();

        debug!(
            user_id = %self.user_id,
            room_id = %self.room_id,
            count = self.count,
            "Violation recorded"
        );

        self.count
    }
}

/// Where a user stands in a room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModerationState {
    /// No violations on record
    #[default]
    Clean,
    /// Warned this many times
    Warned(u32),
    /// Muted; stays here until an admin lifts it
    Banned,
}

impl fmt::Display for ModerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "Clean"),
            Self::Warned(count) => write!(f, "Warned ({count})"),
            Self::Banned => write!(f, "Banned"),
        }
    }
}

/// What to do about a new violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Record the violation and warn; `count` is the new total
    Warn { count: u32 },
    /// Reset the counter and mute
    Mute,
    /// Already muted: only repeat the ban notice
    RemindMuted,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn { count } => write!(f, "Warn ({count})"),
            Self::Mute => write!(f, "Mute"),
            Self::RemindMuted => write!(f, "Remind Muted"),
        }
    }
}

impl ModerationState {
    /// Derive the state from a stored count and the user's muted flag
    #[must_use]
    pub fn from_record(count: u32, muted: bool) -> Self {
        match (muted, count) {
            (true, _) => Self::Banned,
            (false, 0) => Self::Clean,
            (false, count) => Self::Warned(count),
        }
    }

    /// Decide the response to one more violation
    ///
    /// The violation is counted first; reaching `threshold` mutes instead of
    /// storing the count.
    #[must_use]
    pub fn on_violation(self, threshold: u32) -> Verdict {
        let prior = match self {
            Self::Banned => return Verdict::RemindMuted,
            Self::Clean => 0,
            Self::Warned(count) => count,
        };

        let count = prior.saturating_add(1);
        if count < threshold {
            Verdict::Warn { count }
        } else {
            Verdict::Mute
        }
    }

    /// State after a verdict has been carried out
    #[must_use]
    pub fn apply(self, verdict: Verdict) -> Self {
        match verdict {
            Verdict::Warn { count } => Self::Warned(count),
            Verdict::Mute | Verdict::RemindMuted => Self::Banned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_record() {
        assert_eq!(ModerationState::from_record(0, false), ModerationState::Clean);
        assert_eq!(ModerationState::from_record(2, false), ModerationState::Warned(2));
        assert_eq!(ModerationState::from_record(0, true), ModerationState::Banned);
    }

    #[test]
    fn test_escalation_sequence() {
        let threshold = DEFAULT_WARNING_THRESHOLD;
        let mut state = ModerationState::Clean;
        let mut verdicts = Vec::new();

        for _ in 0..5 {
            let verdict = state.on_violation(threshold);
            verdicts.push(verdict);
            state = state.apply(verdict);
        }

        assert_eq!(
            verdicts,
            vec![
                Verdict::Warn { count: 1 },
                Verdict::Warn { count: 2 },
                Verdict::Mute,
                Verdict::RemindMuted,
                Verdict::RemindMuted,
            ]
        );
        assert_eq!(state, ModerationState::Banned);
    }

    #[test]
    fn test_exactly_one_mute_per_escalation() {
        for violations in 1..10 {
            let mut state = ModerationState::Clean;
            let mut mutes = 0;
            for _ in 0..violations {
                let verdict = state.on_violation(DEFAULT_WARNING_THRESHOLD);
                if verdict == Verdict::Mute {
                    mutes += 1;
                }
                state = state.apply(verdict);
            }
            let expected = usize::from(violations >= DEFAULT_WARNING_THRESHOLD);
            assert_eq!(mutes, expected, "after {violations} violations");
        }
    }

    #[test]
    fn test_stale_count_above_threshold_mutes() {
        let state = ModerationState::from_record(7, false);
        assert_eq!(state.on_violation(DEFAULT_WARNING_THRESHOLD), Verdict::Mute);
    }

    #[test]
    fn test_default_state_is_clean() {
        assert_eq!(ModerationState::default(), ModerationState::Clean);
    }

    #[test]
    fn test_record_increment() {
        let mut record = ViolationRecord::new(
            UserId::from("@alice:example.org"),
            RoomId::from("!room:example.org"),
        );
        assert_eq!(record.count, 0);
        assert_eq!(record.increment(), 1);
        assert_eq!(record.increment(), 2);
        assert!(record.last_seen >= record.first_seen);
    }

    #[test]
    fn test_display() {
        assert_eq!(ModerationState::Warned(2).to_string(), "Warned (2)");
        assert_eq!(Verdict::Warn { count: 1 }.to_string(), "Warn (1)");
        assert_eq!(Verdict::Mute.to_string(), "Mute");
    }
}
