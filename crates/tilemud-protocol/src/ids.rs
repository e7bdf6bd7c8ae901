//! Identity newtypes shared between the wire format and the server core.
//!
//! All ids are opaque strings on the wire. Wrapping them in newtypes keeps
//! a `SessionId` from being passed where a `CharacterId` is expected, and
//! gives each id a single place for generation rules.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed namespace for deriving character ids from user ids (UUIDv5).
/// Changing this value would re-map every user to a new character.
const CHARACTER_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1d, 0x4e, 0x0a, 0x91, 0x3c, 0x45, 0xf2, 0x8e, 0x5a, 0x27, 0xb9,
    0xd4, 0x10, 0x73, 0xc6,
]);

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing id value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// A live connection's session identity. One active realtime binding
    /// per session id at any moment.
    SessionId, "sess:"
}

string_id! {
    /// The authenticated account behind a session.
    UserId, "user:"
}

string_id! {
    /// The durable character a session plays. Derived deterministically
    /// from the user id.
    CharacterId, "char:"
}

string_id! {
    /// A room instance. A session belongs to exactly one instance at a time.
    InstanceId, "inst:"
}

string_id! {
    /// A persisted action event row.
    ActionEventId, "evt:"
}

impl SessionId {
    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ActionEventId {
    /// Generates a fresh random action event id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl CharacterId {
    /// Derives the character id owned by a user.
    ///
    /// UUIDv5 over a fixed namespace, so the same user always maps to the
    /// same character without a registry lookup.
    pub fn for_user(user_id: &UserId) -> Self {
        Self(
            Uuid::new_v5(&CHARACTER_NAMESPACE, user_id.as_str().as_bytes())
                .to_string(),
        )
    }
}
