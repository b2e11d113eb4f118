// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Tags

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::slice::Iter;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize};

use crate::coordinate::Coordinate;
use crate::event::id::EventId;
use crate::filter::SingleLetterTag;
use crate::key::PublicKey;
use crate::types::Timestamp;

/// The tag marking an event as protected (NIP70)
pub const PROTECTED_TAG: &str = "-";

const EXPIRATION_TAG: &str = "expiration";
const CHALLENGE_TAG: &str = "challenge";
const RELAY_TAG: &str = "relay";

/// Tag error
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Empty tag row
    EmptyTag,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyTag => write!(f, "Empty tag"),
        }
    }
}

/// Tag
///
/// A non-empty row of strings; the first element is the tag name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Tag(Vec<String>);

impl Tag {
    /// Parse a tag row
    pub fn parse<I, S>(tag: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let buf: Vec<String> = tag.into_iter().map(|v| v.into()).collect();
        if buf.is_empty() {
            return Err(Error::EmptyTag);
        }
        Ok(Self(buf))
    }

    /// Get the tag name (first element)
    #[inline]
    pub fn kind(&self) -> &str {
        // Non-emptiness is checked at construction
        self.0.first().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Get the tag value (second element)
    #[inline]
    pub fn content(&self) -> Option<&str> {
        self.0.get(1).map(|s| s.as_str())
    }

    /// Get the single-letter name, if the tag has one
    #[inline]
    pub fn single_letter(&self) -> Option<SingleLetterTag> {
        SingleLetterTag::from_str(self.kind()).ok()
    }

    /// Get as slice of strings
    #[inline]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Compose an `e` tag
    pub fn event(event_id: EventId) -> Self {
        Self(vec!["e".to_string(), event_id.to_hex()])
    }

    /// Compose a `p` tag
    pub fn public_key(public_key: PublicKey) -> Self {
        Self(vec!["p".to_string(), public_key.to_hex()])
    }

    /// Compose a `d` tag
    pub fn identifier<S>(identifier: S) -> Self
    where
        S: Into<String>,
    {
        Self(vec!["d".to_string(), identifier.into()])
    }

    /// Compose an `a` tag
    pub fn coordinate(coordinate: Coordinate) -> Self {
        Self(vec!["a".to_string(), coordinate.to_string()])
    }

    /// Compose an `expiration` tag (NIP40)
    pub fn expiration(timestamp: Timestamp) -> Self {
        Self(vec![EXPIRATION_TAG.to_string(), timestamp.to_string()])
    }

    /// Compose a `challenge` tag (NIP42)
    pub fn challenge<S>(challenge: S) -> Self
    where
        S: Into<String>,
    {
        Self(vec![CHALLENGE_TAG.to_string(), challenge.into()])
    }

    /// Compose a `relay` tag (NIP42)
    pub fn relay<S>(url: S) -> Self
    where
        S: Into<String>,
    {
        Self(vec![RELAY_TAG.to_string(), url.into()])
    }

    /// Compose the protected `["-"]` tag (NIP70)
    pub fn protected() -> Self {
        Self(vec![PROTECTED_TAG.to_string()])
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buf: Vec<String> = Vec::deserialize(deserializer)?;
        Self::parse(buf).map_err(serde::de::Error::custom)
    }
}

/// Single-letter tag value indexes
///
/// First value per tag row, grouped by single-letter name.
pub type TagsIndexes = BTreeMap<SingleLetterTag, BTreeSet<String>>;

/// Tag list
#[derive(Debug, Clone)]
pub struct Tags {
    list: Vec<Tag>,
    indexes: OnceCell<TagsIndexes>,
}

impl Tags {
    /// Construct a new tag list
    #[inline]
    pub fn new(list: Vec<Tag>) -> Self {
        Self {
            list,
            indexes: OnceCell::new(),
        }
    }

    /// Parse rows of strings into a tag list
    pub fn parse<I, T, S>(tags: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<Tag> = tags
            .into_iter()
            .map(Tag::parse)
            .collect::<Result<_, _>>()?;
        Ok(Self::new(list))
    }

    /// Number of tags
    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Check if there are no tags
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Iterate tags
    #[inline]
    pub fn iter(&self) -> Iter<'_, Tag> {
        self.list.iter()
    }

    /// Get as slice of tags
    #[inline]
    pub fn as_slice(&self) -> &[Tag] {
        &self.list
    }

    /// Find the first tag with the given name
    pub fn find(&self, kind: &str) -> Option<&Tag> {
        self.list.iter().find(|t| t.kind() == kind)
    }

    /// Get the single-letter value indexes, building them on first use
    pub fn indexes(&self) -> &TagsIndexes {
        self.indexes.get_or_init(|| {
            let mut indexes: TagsIndexes = TagsIndexes::new();
            for tag in self.list.iter() {
                if let (Some(letter), Some(content)) = (tag.single_letter(), tag.content()) {
                    indexes
                        .entry(letter)
                        .or_default()
                        .insert(content.to_string());
                }
            }
            indexes
        })
    }

    /// Get the first `d` tag value (NIP01 identifier)
    pub fn identifier(&self) -> Option<&str> {
        self.find("d").and_then(|t| t.content())
    }

    /// Iterate `e` tag event ids
    pub fn event_ids(&self) -> impl Iterator<Item = EventId> + '_ {
        self.list
            .iter()
            .filter(|t| t.kind() == "e")
            .filter_map(|t| t.content())
            .filter_map(|c| EventId::from_hex(c).ok())
    }

    /// Iterate `p` tag public keys
    pub fn public_keys(&self) -> impl Iterator<Item = PublicKey> + '_ {
        self.list
            .iter()
            .filter(|t| t.kind() == "p")
            .filter_map(|t| t.content())
            .filter_map(|c| PublicKey::from_hex(c).ok())
    }

    /// Iterate `a` tag coordinates
    pub fn coordinates(&self) -> impl Iterator<Item = Coordinate> + '_ {
        self.list
            .iter()
            .filter(|t| t.kind() == "a")
            .filter_map(|t| t.content())
            .filter_map(|c| Coordinate::parse(c).ok())
    }

    /// Get the expiration timestamp (NIP40)
    pub fn expiration(&self) -> Option<Timestamp> {
        self.find(EXPIRATION_TAG)
            .and_then(|t| t.content())
            .and_then(|c| Timestamp::from_str(c).ok())
    }

    /// Get the auth challenge (NIP42)
    pub fn challenge(&self) -> Option<&str> {
        self.find(CHALLENGE_TAG).and_then(|t| t.content())
    }

    /// Get the auth relay url (NIP42)
    pub fn relay_url(&self) -> Option<&str> {
        self.find(RELAY_TAG).and_then(|t| t.content())
    }

    /// Check if the `["-"]` tag is present (NIP70)
    pub fn is_protected(&self) -> bool {
        self.list.iter().any(|t| t.kind() == PROTECTED_TAG)
    }
}

impl Default for Tags {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PartialEq for Tags {
    fn eq(&self, other: &Self) -> bool {
        self.list == other.list
    }
}

impl Eq for Tags {}

impl Hash for Tags {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.list.hash(state);
    }
}

impl From<Vec<Tag>> for Tags {
    fn from(list: Vec<Tag>) -> Self {
        Self::new(list)
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.list.iter()
    }
}

impl Serialize for Tags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.list.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list: Vec<Tag> = Vec::deserialize(deserializer)?;
        Ok(Self::new(list))
    }
}
