// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Filters

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::event::id::EventId;
use crate::event::kind::Kind;
use crate::event::tag::TagsIndexes;
use crate::event::Event;
use crate::key::PublicKey;
use crate::types::Timestamp;
use crate::util::JsonUtil;

type GenericTags = BTreeMap<SingleLetterTag, BTreeSet<String>>;

/// Single-letter tag error
#[derive(Debug, PartialEq, Eq)]
pub enum SingleLetterTagError {
    /// Invalid char
    InvalidChar,
}

impl std::error::Error for SingleLetterTagError {}

impl fmt::Display for SingleLetterTagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChar => write!(f, "invalid char"),
        }
    }
}

/// Single-Letter Tag (a-zA-Z)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SingleLetterTag {
    character: char,
}

impl SingleLetterTag {
    /// The `d` tag (identifier)
    pub const D: Self = Self { character: 'd' };
    /// The `e` tag (referenced event)
    pub const E: Self = Self { character: 'e' };
    /// The `p` tag (referenced public key)
    pub const P: Self = Self { character: 'p' };

    /// Parse single-letter tag from [`char`]
    pub fn from_char(character: char) -> Result<Self, SingleLetterTagError> {
        if character.is_ascii_alphabetic() {
            Ok(Self { character })
        } else {
            Err(SingleLetterTagError::InvalidChar)
        }
    }

    /// Get as `char`
    #[inline]
    pub fn as_char(&self) -> char {
        self.character
    }

    /// Check if the letter is lowercase
    #[inline]
    pub fn is_lowercase(&self) -> bool {
        self.character.is_ascii_lowercase()
    }

    /// Check if the letter is uppercase
    #[inline]
    pub fn is_uppercase(&self) -> bool {
        self.character.is_ascii_uppercase()
    }
}

impl fmt::Display for SingleLetterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.character)
    }
}

impl FromStr for SingleLetterTag {
    type Err = SingleLetterTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => Err(SingleLetterTagError::InvalidChar),
        }
    }
}

impl Serialize for SingleLetterTag {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_char(self.character)
    }
}

impl<'de> Deserialize<'de> for SingleLetterTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let character: char = char::deserialize(deserializer)?;
        Self::from_char(character).map_err(serde::de::Error::custom)
    }
}

/// Subscription filter
///
/// <https://github.com/nostr-protocol/nips/blob/master/01.md>
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// List of [`EventId`]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub ids: Option<BTreeSet<EventId>>,
    /// List of [`PublicKey`]
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub authors: Option<BTreeSet<PublicKey>>,
    /// List of kind numbers
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub kinds: Option<BTreeSet<Kind>>,
    /// A query in a human-readable form (NIP50)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub search: Option<String>,
    /// Events must be newer than this to pass
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub since: Option<Timestamp>,
    /// Events must be older than this to pass
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub until: Option<Timestamp>,
    /// Maximum number of events to be returned in the initial query
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub limit: Option<usize>,
    /// Generic tag queries (`#<single-letter>` keys)
    #[serde(
        flatten,
        serialize_with = "serialize_generic_tags",
        deserialize_with = "deserialize_generic_tags"
    )]
    #[serde(default)]
    pub generic_tags: GenericTags,
}

impl Filter {
    /// Create new empty [`Filter`]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add [`EventId`]
    #[inline]
    pub fn id(self, id: EventId) -> Self {
        self.ids([id])
    }

    /// Add event ids
    #[inline]
    pub fn ids<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = EventId>,
    {
        self.ids = extend_or_collect(self.ids, ids);
        self
    }

    /// Add author
    #[inline]
    pub fn author(self, author: PublicKey) -> Self {
        self.authors([author])
    }

    /// Add authors
    #[inline]
    pub fn authors<I>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = PublicKey>,
    {
        self.authors = extend_or_collect(self.authors, authors);
        self
    }

    /// Add kind
    #[inline]
    pub fn kind(self, kind: Kind) -> Self {
        self.kinds([kind])
    }

    /// Add kinds
    #[inline]
    pub fn kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = Kind>,
    {
        self.kinds = extend_or_collect(self.kinds, kinds);
        self
    }

    /// Add referenced event (`#e` tag)
    #[inline]
    pub fn event(self, id: EventId) -> Self {
        self.events([id])
    }

    /// Add referenced events (`#e` tag)
    pub fn events<I>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = EventId>,
    {
        self.custom_tags(SingleLetterTag::E, ids.into_iter().map(|id| id.to_hex()))
    }

    /// Add referenced public key (`#p` tag)
    #[inline]
    pub fn pubkey(self, pubkey: PublicKey) -> Self {
        self.pubkeys([pubkey])
    }

    /// Add referenced public keys (`#p` tag)
    pub fn pubkeys<I>(self, pubkeys: I) -> Self
    where
        I: IntoIterator<Item = PublicKey>,
    {
        self.custom_tags(SingleLetterTag::P, pubkeys.into_iter().map(|p| p.to_hex()))
    }

    /// Add identifier (`#d` tag)
    #[inline]
    pub fn identifier<S>(self, identifier: S) -> Self
    where
        S: Into<String>,
    {
        self.custom_tag(SingleLetterTag::D, identifier)
    }

    /// Add custom tag
    #[inline]
    pub fn custom_tag<S>(self, tag: SingleLetterTag, value: S) -> Self
    where
        S: Into<String>,
    {
        self.custom_tags(tag, [value])
    }

    /// Add custom tags
    pub fn custom_tags<I, S>(mut self, tag: SingleLetterTag, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(|v| v.into());
        self.generic_tags.entry(tag).or_default().extend(values);
        self
    }

    /// Set `since` bound
    #[inline]
    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    /// Set `until` bound
    #[inline]
    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// Set limit
    #[inline]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set search query
    #[inline]
    pub fn search<S>(mut self, query: S) -> Self
    where
        S: Into<String>,
    {
        self.search = Some(query.into());
        self
    }

    /// Check if [`Filter`] is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self == &Filter::default()
    }

    #[inline]
    fn ids_match(&self, event: &Event) -> bool {
        self.ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&event.id))
    }

    #[inline]
    fn authors_match(&self, event: &Event) -> bool {
        self.authors
            .as_ref()
            .map_or(true, |authors| authors.contains(&event.pubkey))
    }

    #[inline]
    fn kind_match(&self, event: &Event) -> bool {
        self.kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&event.kind))
    }

    fn tag_match(&self, event: &Event) -> bool {
        if self.generic_tags.is_empty() {
            return true;
        }

        if event.tags.is_empty() {
            return false;
        }

        let indexes: &TagsIndexes = event.tags.indexes();

        self.generic_tags.iter().all(|(tag_name, set)| {
            if let Some(val_set) = indexes.get(tag_name) {
                set.iter().any(|t| val_set.contains(t))
            } else {
                false
            }
        })
    }

    fn search_match(&self, event: &Event) -> bool {
        match &self.search {
            Some(query) => {
                contains_ignore_ascii_case(&event.content, query)
                    || event
                        .tags
                        .indexes()
                        .values()
                        .flatten()
                        .any(|value| contains_ignore_ascii_case(value, query))
            }
            None => true,
        }
    }

    /// Determine if [`Filter`] matches the given [`Event`]
    #[inline]
    pub fn match_event(&self, event: &Event) -> bool {
        self.ids_match(event)
            && self.authors_match(event)
            && self.kind_match(event)
            && self.since.map_or(true, |t| event.created_at >= t)
            && self.until.map_or(true, |t| event.created_at <= t)
            && self.tag_match(event)
            && self.search_match(event)
    }
}

impl JsonUtil for Filter {
    type Err = serde_json::Error;
}

fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

fn serialize_generic_tags<S>(generic_tags: &GenericTags, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(generic_tags.len()))?;
    for (tag, values) in generic_tags.iter() {
        map.serialize_entry(&format!("#{tag}"), values)?;
    }
    map.end()
}

fn deserialize_generic_tags<'de, D>(deserializer: D) -> Result<GenericTags, D::Error>
where
    D: Deserializer<'de>,
{
    struct GenericTagsVisitor;

    impl<'de> Visitor<'de> for GenericTagsVisitor {
        type Value = GenericTags;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("map in which the keys are \"#X\" for some character X")
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut generic_tags = BTreeMap::new();
            while let Some(key) = map.next_key::<String>()? {
                let mut chars = key.chars();
                if let (Some('#'), Some(ch), None) = (chars.next(), chars.next(), chars.next()) {
                    let tag: SingleLetterTag =
                        SingleLetterTag::from_char(ch).map_err(serde::de::Error::custom)?;
                    let values: BTreeSet<String> = map.next_value()?;
                    generic_tags.insert(tag, values);
                } else {
                    map.next_value::<serde::de::IgnoredAny>()?;
                }
            }
            Ok(generic_tags)
        }
    }

    deserializer.deserialize_map(GenericTagsVisitor)
}

fn extend_or_collect<T, I>(mut set: Option<BTreeSet<T>>, iter: I) -> Option<BTreeSet<T>>
where
    I: IntoIterator<Item = T>,
    T: Eq + Ord,
{
    match set.as_mut() {
        Some(s) => {
            s.extend(iter);
        }
        None => set = Some(iter.into_iter().collect()),
    };
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::builder::EventBuilder;
    use crate::event::tag::Tag;
    use crate::key::Keys;

    fn test_event(keys: &Keys, kind: Kind, content: &str, tags: Vec<Tag>) -> Event {
        EventBuilder::new(kind, content)
            .tags(tags)
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn test_filter_serialization() {
        let filter = Filter::new()
            .identifier("identifier")
            .search("test")
            .custom_tag(SingleLetterTag::from_char('j').unwrap(), "test1");
        let json = r##"{"search":"test","#d":["identifier"],"#j":["test1"]}"##;
        assert_eq!(filter.as_json(), json);
    }

    #[test]
    fn test_filter_deserialization() {
        let json = r##"{"#a":["...", "test"],"search":"test","ids":["2be17aa3031bdcb006f0fce80c146dea9c1c0268b0af2398bb673365c6444d45"]}"##;
        let filter = Filter::from_json(json).unwrap();
        let event_id =
            EventId::from_hex("2be17aa3031bdcb006f0fce80c146dea9c1c0268b0af2398bb673365c6444d45")
                .unwrap();
        assert_eq!(
            filter,
            Filter::new()
                .ids([event_id])
                .search("test")
                .custom_tags(SingleLetterTag::from_char('a').unwrap(), ["...", "test"])
        );

        // Unknown keys are ignored
        let json = r##"{"aaaaa":["..."],"search":"test"}"##;
        let filter = Filter::from_json(json).unwrap();
        assert_eq!(filter, Filter::new().search("test"));
    }

    #[test]
    fn test_match_event_by_kind_and_author() {
        let keys = Keys::generate();
        let other = Keys::generate();
        let event = test_event(&keys, Kind::TEXT_NOTE, "hello", Vec::new());

        assert!(Filter::new().kind(Kind::TEXT_NOTE).match_event(&event));
        assert!(Filter::new()
            .author(keys.public_key())
            .match_event(&event));
        assert!(!Filter::new()
            .author(other.public_key())
            .match_event(&event));
        assert!(!Filter::new().kind(Kind::METADATA).match_event(&event));
    }

    #[test]
    fn test_match_event_by_tags() {
        let keys = Keys::generate();
        let target = Keys::generate();
        let event = test_event(
            &keys,
            Kind::TEXT_NOTE,
            "hello",
            vec![Tag::public_key(target.public_key())],
        );

        assert!(Filter::new().pubkey(target.public_key()).match_event(&event));
        assert!(!Filter::new().pubkey(keys.public_key()).match_event(&event));
    }

    #[test]
    fn test_match_event_time_bounds() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::TEXT_NOTE, "hello")
            .custom_created_at(Timestamp::from_secs(1_000))
            .sign_with_keys(&keys)
            .unwrap();

        assert!(Filter::new()
            .since(Timestamp::from_secs(500))
            .match_event(&event));
        assert!(!Filter::new()
            .since(Timestamp::from_secs(1_500))
            .match_event(&event));
        assert!(Filter::new()
            .until(Timestamp::from_secs(1_500))
            .match_event(&event));
        assert!(!Filter::new()
            .until(Timestamp::from_secs(500))
            .match_event(&event));
    }

    #[test]
    fn test_search_matches_content_and_tags() {
        let keys = Keys::generate();
        let event = test_event(
            &keys,
            Kind::TEXT_NOTE,
            "Best nostr APPS",
            vec![Tag::parse(["t", "DirEctory"]).unwrap()],
        );

        assert!(Filter::new().search("nostr apps").match_event(&event));
        assert!(Filter::new().search("directory").match_event(&event));
        assert!(!Filter::new().search("bitcoin").match_event(&event));
    }

    #[test]
    fn test_empty_list_matches_nothing() {
        let keys = Keys::generate();
        let event = test_event(&keys, Kind::TEXT_NOTE, "hello", Vec::new());

        let filter = Filter {
            kinds: Some(BTreeSet::new()),
            ..Default::default()
        };
        assert!(!filter.match_event(&event));
    }
}
