//! Identifier newtypes for the chat protocol
//!
//! Matrix identifiers are opaque strings with a sigil prefix (`@user:server`,
//! `!room:server`, `$event`). Wrapping them keeps the three kinds apart in
//! function signatures.

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from anything string-like
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// A user identity, e.g. `@alice:example.org`
    UserId
);
string_id!(
    /// A room identity, e.g. `!abc:example.org`
    RoomId
);
string_id!(
    /// An event identity, e.g. `$xyz`
    EventId
);
