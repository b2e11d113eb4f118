// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! NIP11: Relay Information Document
//!
//! <https://github.com/nostr-protocol/nips/blob/master/11.md>

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;
use crate::util::JsonUtil;

/// An entry of the `supported_nips` sequence
///
/// The sequence is heterogeneous on the wire: most NIPs are plain integers,
/// some are identified by a 2-char uppercase hex string (e.g. `"7D"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SupportedNip {
    /// Numeric NIP identifier
    Number(u16),
    /// Hex NIP identifier, uppercase as-is
    HexString(String),
}

impl From<u16> for SupportedNip {
    fn from(nip: u16) -> Self {
        Self::Number(nip)
    }
}

impl std::str::FromStr for SupportedNip {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<u16>() {
            Ok(n) => Ok(Self::Number(n)),
            Err(..) => Ok(Self::HexString(s.to_uppercase())),
        }
    }
}

impl fmt::Display for SupportedNip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n:02}"),
            Self::HexString(s) => write!(f, "{s}"),
        }
    }
}

/// Relay information document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInformationDocument {
    /// Name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owner public key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    /// Owner contact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    /// Supported NIPs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub supported_nips: Vec<SupportedNip>,
    /// Software
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    /// Software version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Limitations imposed by the relay on clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limitation: Option<Limitation>,
    /// URL pointing to an image to be used as an icon for the relay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// URL pointing to an image to be used as a banner for the relay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

/// Limitations imposed by the relay on clients
///
/// Clients should expect that requests exceeding these limits are rejected
/// or fail immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limitation {
    /// Maximum number of bytes for incoming JSON messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<i32>,
    /// Total number of subscriptions that may be active on a single connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<i32>,
    /// The relay clamps each filter's `limit` value to this number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<i32>,
    /// Maximum length of subscription id as a string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subid_length: Option<i32>,
    /// Maximum number of elements in the tags list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<i32>,
    /// Maximum number of characters in the content field of any event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<i32>,
    /// New events will require at least this difficulty of PoW
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<i32>,
    /// NIP42 authentication is required before any other action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    /// Payment is required before any action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,
    /// Writes are restricted to an allow-list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_writes: Option<bool>,
    /// `created_at` lower limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_lower_limit: Option<Timestamp>,
    /// `created_at` upper limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_upper_limit: Option<Timestamp>,
}

impl RelayInformationDocument {
    /// Create new empty [`RelayInformationDocument`]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JsonUtil for RelayInformationDocument {
    type Err = serde_json::Error;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_nips_heterogeneous_sequence() {
        let nips: Vec<SupportedNip> = vec![
            SupportedNip::Number(1),
            SupportedNip::Number(11),
            SupportedNip::HexString("7D".to_string()),
        ];
        let json = serde_json::to_string(&nips).unwrap();
        assert_eq!(json, r#"[1,11,"7D"]"#);

        let parsed: Vec<SupportedNip> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, nips);
    }

    #[test]
    fn test_supported_nip_display_zero_padded() {
        assert_eq!(SupportedNip::Number(1).to_string(), "01");
        assert_eq!(SupportedNip::Number(42).to_string(), "42");
        assert_eq!(SupportedNip::HexString("7D".to_string()).to_string(), "7D");
    }

    #[test]
    fn test_document_serialization() {
        let document = RelayInformationDocument {
            name: Some("nostrd".to_string()),
            supported_nips: vec![SupportedNip::Number(1), SupportedNip::Number(9)],
            limitation: Some(Limitation {
                max_message_length: Some(524_288),
                max_subscriptions: Some(20),
                auth_required: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let json = document.as_json();
        let parsed = RelayInformationDocument::from_json(json).unwrap();
        assert_eq!(parsed, document);
    }
}
