//! # Record Identifiers
//!
//! Donations and organizations are keyed by ULIDs generated with
//! [`ferroid`]. On the wire (JSON, WebSocket frames, URL paths) an identifier
//! is always its 26-character Crockford Base32 encoding.
//!
//! Each record kind gets its own newtype so a donation id can never be passed
//! where an organization id is expected. Parsing untrusted text goes through
//! [`core::str::FromStr`] and fails with [`Error::InvalidId`].

use crate::Error;
use core::{fmt, str::FromStr};
use ferroid::{base32::Base32UlidExt, id::ULID};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Defines a ULID-backed identifier newtype with Base32 text encoding.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(ULID);

        impl $name {
            /// Label used in error messages for this identifier kind.
            pub const KIND: &'static str = $kind;

            /// Generates a fresh identifier stamped with the current time.
            #[must_use]
            pub fn new() -> Self {
                Self(ULID::now())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.0.encode().as_str())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                ULID::decode(trimmed).map(Self).map_err(|_| Error::InvalidId {
                    kind: Self::KIND,
                    value: trimmed.to_string(),
                })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.0.encode().as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(d)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Identity of a posted donation.
    DonationId, "donation"
);

define_id!(
    /// Identity of a recipient organization.
    OrganizationId, "organization"
);
