//! Wide integer identifiers.
//!
//! User and item ids come from upstream catalogs as 64-bit integers. They are
//! restricted to `0..=i64::MAX` so they round-trip through a Postgres `BIGINT`,
//! and they always serialize as base-10 strings so JavaScript clients never
//! lose precision. Deserialization accepts either a string or a JSON integer.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier {0:?} is not a base-10 integer")]
    NotNumeric(String),
    #[error("identifier {0} exceeds the 63-bit range")]
    OutOfRange(u64),
}

macro_rules! wide_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const MAX: u64 = i64::MAX as u64;

            pub fn new(raw: u64) -> Result<Self, IdParseError> {
                if raw > Self::MAX {
                    return Err(IdParseError::OutOfRange(raw));
                }
                Ok(Self(raw))
            }

            pub fn get(self) -> u64 {
                self.0
            }

            /// Lossless because of the 63-bit bound enforced in `new`.
            pub fn to_db(self) -> i64 {
                self.0 as i64
            }

            pub fn from_db(raw: i64) -> Result<Self, IdParseError> {
                u64::try_from(raw)
                    .map_err(|_| IdParseError::NotNumeric(raw.to_string()))
                    .and_then(Self::new)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(IdParseError::Empty);
                }
                let raw = trimmed
                    .parse::<u64>()
                    .map_err(|_| IdParseError::NotNumeric(trimmed.to_string()))?;
                Self::new(raw)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct IdVisitor;

                impl<'de> Visitor<'de> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str("a base-10 string or a non-negative integer")
                    }

                    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        v.parse().map_err(E::custom)
                    }

                    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                        $name::new(v).map_err(E::custom)
                    }

                    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                        u64::try_from(v)
                            .map_err(|_| E::custom(IdParseError::NotNumeric(v.to_string())))
                            .and_then(|raw| $name::new(raw).map_err(E::custom))
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}

wide_id!(
    /// Account identifier of a library owner.
    UserId
);

wide_id!(
    /// Catalog identifier of a game.
    ItemId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string() {
        let id = ItemId::new(76561198000000000).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"76561198000000000\"");
    }

    #[test]
    fn deserializes_from_string_or_integer() {
        let a: UserId = serde_json::from_str("\"42\"").unwrap();
        let b: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert!(serde_json::from_str::<ItemId>("\"18446744073709551615\"").is_err());
        assert!(serde_json::from_str::<ItemId>("-1").is_err());
        assert!("abc".parse::<ItemId>().is_err());
        assert_eq!("".parse::<ItemId>(), Err(IdParseError::Empty));
    }

    #[test]
    fn database_round_trip() {
        let id = UserId::new(UserId::MAX).unwrap();
        assert_eq!(UserId::from_db(id.to_db()).unwrap(), id);
        assert!(UserId::from_db(-5).is_err());
    }
}
