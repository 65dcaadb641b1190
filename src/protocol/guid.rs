//! 16-byte identifiers carried in SMB2 create contexts.
//!
//! `ClientGuid`, `LeaseKey` and `CreateGuid` share a representation but are
//! kept as distinct types so a lease key can never be passed where a client
//! identity is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! guid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub const ZERO: Self = Self(Uuid::nil());

            /// Generates a new random value.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hyphenated())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self::from_bytes(bytes)
            }
        }
    };
}

guid_newtype!(
    /// Identity of one logical client. Stays the same across every
    /// connection that client opens and differs between distinct clients.
    ClientGuid
);

guid_newtype!(
    /// Requester-chosen key naming a lease. Opaque to the server.
    LeaseKey
);

guid_newtype!(
    /// Create GUID from an `SMB2_CREATE_DURABLE_HANDLE_REQUEST_V2` context.
    CreateGuid
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(ClientGuid::generate(), ClientGuid::generate());
        assert_ne!(LeaseKey::generate(), LeaseKey::ZERO);
    }

    #[test]
    fn test_parse_and_display() {
        let text = "065eadf1-6daf-1543-b04f-10e69084c9ae";
        let key: LeaseKey = text.parse().unwrap();
        assert_eq!(key.to_string(), text);
        assert!("not-a-guid".parse::<ClientGuid>().is_err());
    }

    #[test]
    fn test_bytes_roundtrip_through_serde() {
        let guid = CreateGuid::from_bytes([7u8; 16]);
        let json = serde_json::to_string(&guid).unwrap();
        assert_eq!(json, "\"07070707-0707-0707-0707-070707070707\"");
        let back: CreateGuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_bytes(), &[7u8; 16]);
    }
}
