//! Common identifier types shared across session coordinator components.
//!
//! Every identifier is a transparent `Uuid` newtype so that a session ID can
//! never be passed where an identity ID is expected. Serialized form is the
//! bare UUID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Borrow the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an identity (user account)
    IdentityId
);

uuid_id!(
    /// Unique identifier for an organisation
    OrganisationId
);

uuid_id!(
    /// Unique identifier for a clinical session
    SessionId
);

uuid_id!(
    /// Unique identifier for a ward session
    WardSessionId
);

uuid_id!(
    /// Unique identifier for a ward (the facility a ward session runs in)
    WardId
);

uuid_id!(
    /// Unique identifier for a live connection (process-local)
    ConnectionId
);
