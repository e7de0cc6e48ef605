//! Texts sent to users in their direct room

use crate::protocol::UserId;

/// Default reason attached to redactions
pub const DEFAULT_REDACTION_REASON: &str = "You are not a moderator of this channel.";

/// Warning for a redacted top-level message
#[must_use]
pub fn warning_text(count: u32, room_name: &str) -> String {
    format!(
        "Your comment has been deleted {count} times in {room_name} discussion due to being \
         improperly sent. Please reply in threads. \n\
         How to enable threads: \n\
         1. Hover on a message and click 'Reply in Thread' button. \n\
         2. Press 'Join the beta' button. \n\
         3. Reply to a message using the 'Reply in Thread' button."
    )
}

/// Notice sent once a user has been muted
#[must_use]
pub fn ban_text(threshold: u32, room_name: &str, admins: &[UserId]) -> String {
    let admins = admins
        .iter()
        .map(UserId::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "# You have made >{threshold} improper comments in {room_name} discussion. \
         Please seek help from the group admins: {admins}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_text_names_count_and_room() {
        let text = warning_text(1, "General");
        assert!(text.starts_with("Your comment has been deleted 1 times in General discussion"));
        assert!(text.contains("Please reply in threads."));
        assert!(text.contains("\n1. Hover on a message"));
        assert!(text.ends_with("'Reply in Thread' button."));
    }

    #[test]
    fn test_ban_text_lists_admins() {
        let admins = vec![
            UserId::from("@admin:example.org"),
            UserId::from("@owner:example.org"),
        ];
        assert_eq!(
            ban_text(3, "General", &admins),
            "# You have made >3 improper comments in General discussion. \
             Please seek help from the group admins: @admin:example.org, @owner:example.org"
        );
    }
}
