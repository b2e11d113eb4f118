// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event kind

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Event kind
///
/// The kind number classifies the event and selects its storage behavior:
///
/// <https://github.com/nostr-protocol/nips/blob/master/01.md>
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Kind(u16);

impl Kind {
    /// Metadata (NIP01)
    pub const METADATA: Self = Self(0);
    /// Short text note (NIP01)
    pub const TEXT_NOTE: Self = Self(1);
    /// Contact list (NIP02)
    pub const CONTACT_LIST: Self = Self(3);
    /// Event deletion request (NIP09)
    pub const EVENT_DELETION: Self = Self(5);
    /// Repost (NIP18)
    pub const REPOST: Self = Self(6);
    /// Reaction (NIP25)
    pub const REACTION: Self = Self(7);
    /// Gift wrap (NIP59)
    pub const GIFT_WRAP: Self = Self(1059);
    /// Reporting (NIP56)
    pub const REPORTING: Self = Self(1984);
    /// Request to vanish (NIP62)
    pub const REQUEST_TO_VANISH: Self = Self(62);
    /// Client authentication (NIP42)
    pub const AUTHENTICATION: Self = Self(22242);

    /// Construct from a 16-bit unsigned integer
    #[inline]
    pub const fn from_u16(kind: u16) -> Self {
        Self(kind)
    }

    /// Get as 16-bit unsigned integer
    #[inline]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Check if it's regular
    ///
    /// Regular events are expected to be stored by relays as-is.
    #[inline]
    pub fn is_regular(&self) -> bool {
        !self.is_replaceable() && !self.is_ephemeral() && !self.is_addressable()
    }

    /// Check if it's replaceable
    ///
    /// For each combination of `pubkey` and `kind` only the latest event
    /// must be stored by relays, older versions may be discarded.
    #[inline]
    pub fn is_replaceable(&self) -> bool {
        matches!(self.0, 0 | 3) || (10_000..20_000).contains(&self.0)
    }

    /// Check if it's ephemeral
    ///
    /// Ephemeral events are not expected to be stored by relays.
    #[inline]
    pub fn is_ephemeral(&self) -> bool {
        (20_000..30_000).contains(&self.0)
    }

    /// Check if it's addressable
    ///
    /// For each combination of `pubkey`, `kind` and the `d` tag's first
    /// value only the latest event must be stored by relays, older versions
    /// may be discarded.
    #[inline]
    pub fn is_addressable(&self) -> bool {
        (30_000..40_000).contains(&self.0)
    }

    /// Check if it's a NIP90 job request
    #[inline]
    pub fn is_job_request(&self) -> bool {
        (5_000..6_000).contains(&self.0)
    }

    /// Check if it's a NIP90 job result
    #[inline]
    pub fn is_job_result(&self) -> bool {
        (6_000..7_000).contains(&self.0)
    }

    /// Check if it's a NIP29 group control event
    #[inline]
    pub fn is_group_control(&self) -> bool {
        (9_000..=9_030).contains(&self.0)
    }

    /// Check if it's a NIP29 group metadata event
    #[inline]
    pub fn is_group_metadata(&self) -> bool {
        (39_000..=39_003).contains(&self.0)
    }
}

impl From<u16> for Kind {
    fn from(kind: u16) -> Self {
        Self(kind)
    }
}

impl From<Kind> for u16 {
    fn from(kind: Kind) -> Self {
        kind.0
    }
}

impl FromStr for Kind {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Kind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let kind: u16 = u16::deserialize(deserializer)?;
        Ok(Self(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classes() {
        assert!(Kind::METADATA.is_replaceable());
        assert!(Kind::CONTACT_LIST.is_replaceable());
        assert!(Kind::from_u16(10_002).is_replaceable());
        assert!(Kind::from_u16(19_999).is_replaceable());
        assert!(!Kind::TEXT_NOTE.is_replaceable());

        assert!(Kind::from_u16(20_000).is_ephemeral());
        assert!(Kind::from_u16(29_999).is_ephemeral());
        assert!(!Kind::from_u16(30_000).is_ephemeral());

        assert!(Kind::from_u16(30_000).is_addressable());
        assert!(Kind::from_u16(39_999).is_addressable());

        assert!(Kind::TEXT_NOTE.is_regular());
        assert!(Kind::EVENT_DELETION.is_regular());
        assert!(!Kind::METADATA.is_regular());
    }

    #[test]
    fn test_kind_ranges() {
        assert!(Kind::from_u16(5_100).is_job_request());
        assert!(Kind::from_u16(6_100).is_job_result());
        assert!(Kind::from_u16(9_007).is_group_control());
        assert!(Kind::from_u16(39_000).is_group_metadata());
        assert!(!Kind::from_u16(9_031).is_group_control());
    }

    #[test]
    fn test_kind_serde() {
        let kind: Kind = serde_json::from_str("30023").unwrap();
        assert_eq!(kind, Kind::from_u16(30_023));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "30023");
    }
}
