// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event coordinates

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::event::kind::Kind;
use crate::key::PublicKey;

/// Coordinate error
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Invalid coordinate
    InvalidCoordinate,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCoordinate => write!(f, "Invalid coordinate"),
        }
    }
}

/// Coordinate of a replaceable or addressable event
///
/// The `<kind>:<pubkey>:<d-tag>` form carried by `a` tags.
///
/// <https://github.com/nostr-protocol/nips/blob/master/01.md>
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate {
    /// Kind
    pub kind: Kind,
    /// Author
    pub public_key: PublicKey,
    /// `d` tag value; an empty string for replaceable events
    pub identifier: String,
}

impl Coordinate {
    /// Construct a new coordinate with an empty identifier
    #[inline]
    pub fn new(kind: Kind, public_key: PublicKey) -> Self {
        Self {
            kind,
            public_key,
            identifier: String::new(),
        }
    }

    /// Set the identifier
    pub fn identifier<S>(mut self, identifier: S) -> Self
    where
        S: Into<String>,
    {
        self.identifier = identifier.into();
        self
    }

    /// Parse from the `<kind>:<pubkey>:<d-tag>` form
    pub fn parse(coordinate: &str) -> Result<Self, Error> {
        let mut parts = coordinate.splitn(3, ':');

        let kind: Kind = parts
            .next()
            .and_then(|k| Kind::from_str(k).ok())
            .ok_or(Error::InvalidCoordinate)?;
        let public_key: PublicKey = parts
            .next()
            .and_then(|pk| PublicKey::from_hex(pk).ok())
            .ok_or(Error::InvalidCoordinate)?;
        let identifier: String = parts.next().unwrap_or_default().to_string();

        Ok(Self {
            kind,
            public_key,
            identifier,
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.public_key, self.identifier)
    }
}

impl FromStr for Coordinate {
    type Err = Error;

    #[inline]
    fn from_str(coordinate: &str) -> Result<Self, Self::Err> {
        Self::parse(coordinate)
    }
}

impl Serialize for Coordinate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let coordinate: String = String::deserialize(deserializer)?;
        Self::parse(&coordinate).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_round_trip() {
        let coordinate = Coordinate::parse(
            "30023:aa4fc8665f5696e33db7e1a572e3b0f5b3d615837b0f362dcb1c8068b098c7b4:ipsum",
        )
        .unwrap();
        assert_eq!(coordinate.kind, Kind::from_u16(30023));
        assert_eq!(coordinate.identifier, "ipsum");
        assert_eq!(
            coordinate.to_string(),
            "30023:aa4fc8665f5696e33db7e1a572e3b0f5b3d615837b0f362dcb1c8068b098c7b4:ipsum"
        );
    }

    #[test]
    fn test_coordinate_empty_identifier() {
        let coordinate = Coordinate::parse(
            "32122:aa4fc8665f5696e33db7e1a572e3b0f5b3d615837b0f362dcb1c8068b098c7b4:",
        )
        .unwrap();
        assert!(coordinate.identifier.is_empty());
    }

    #[test]
    fn test_invalid_coordinate() {
        assert!(Coordinate::parse("30023").is_err());
        assert!(Coordinate::parse("x:y:z").is_err());
    }
}
