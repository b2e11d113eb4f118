// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use secp256k1::schnorr::Signature;
use secp256k1::Message;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod builder;
pub mod id;
pub mod kind;
pub mod tag;

use self::id::EventId;
use self::kind::Kind;
use self::tag::Tags;
use crate::coordinate::Coordinate;
use crate::key::PublicKey;
use crate::types::Timestamp;
use crate::util::{JsonUtil, SECP256K1};

/// Event error
#[derive(Debug)]
pub enum Error {
    /// Json error
    Json(serde_json::Error),
    /// The computed event id doesn't match the `id` field
    InvalidId,
    /// The signature doesn't verify under `pubkey`
    InvalidSignature,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "Json: {e}"),
            Self::InvalidId => write!(f, "Invalid event ID"),
            Self::InvalidSignature => write!(f, "Invalid event signature"),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Event
///
/// The canonical, immutable record exchanged over the wire.
///
/// <https://github.com/nostr-protocol/nips/blob/master/01.md>
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Id
    pub id: EventId,
    /// Author
    pub pubkey: PublicKey,
    /// Timestamp (seconds)
    pub created_at: Timestamp,
    /// Kind
    pub kind: Kind,
    /// Tag list
    pub tags: Tags,
    /// Content
    pub content: String,
    /// Signature
    #[serde(
        serialize_with = "serialize_sig",
        deserialize_with = "deserialize_sig"
    )]
    pub sig: Signature,
}

impl Event {
    /// Check that `id` matches the hash of the canonical serialization
    pub fn verify_id(&self) -> bool {
        let id: EventId = EventId::new(
            &self.pubkey,
            &self.created_at,
            &self.kind,
            &self.tags,
            &self.content,
        );
        id == self.id
    }

    /// Check that `sig` is a valid schnorr signature over `id` under `pubkey`
    pub fn verify_signature(&self) -> bool {
        let message: Message = Message::from_digest(self.id.to_bytes());
        SECP256K1
            .verify_schnorr(&self.sig, &message, self.pubkey.xonly())
            .is_ok()
    }

    /// Verify both [`EventId`] and [`Signature`]
    pub fn verify(&self) -> Result<(), Error> {
        if !self.verify_id() {
            return Err(Error::InvalidId);
        }
        if !self.verify_signature() {
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }

    /// Check if the event is expired at `now` (NIP40)
    pub fn is_expired(&self, now: &Timestamp) -> bool {
        match self.tags.expiration() {
            Some(expiration) => &expiration <= now,
            None => false,
        }
    }

    /// Check if the event carries the protected `["-"]` tag (NIP70)
    #[inline]
    pub fn is_protected(&self) -> bool {
        self.tags.is_protected()
    }

    /// Get the coordinate of a replaceable or addressable event
    pub fn coordinate(&self) -> Option<Coordinate> {
        if self.kind.is_replaceable() {
            Some(Coordinate::new(self.kind, self.pubkey))
        } else if self.kind.is_addressable() {
            Some(
                Coordinate::new(self.kind, self.pubkey)
                    .identifier(self.tags.identifier().unwrap_or_default()),
            )
        } else {
            None
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    /// Newest first, ties broken by the lexicographically smaller id
    fn cmp(&self, other: &Self) -> Ordering {
        if self.id == other.id {
            Ordering::Equal
        } else {
            other
                .created_at
                .cmp(&self.created_at)
                .then_with(|| self.id.cmp(&other.id))
        }
    }
}

impl JsonUtil for Event {
    type Err = Error;
}

fn serialize_sig<S>(sig: &Signature, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&sig.to_string())
}

fn deserialize_sig<'de, D>(deserializer: D) -> Result<Signature, D::Error>
where
    D: Deserializer<'de>,
{
    let sig: String = String::deserialize(deserializer)?;
    Signature::from_str(&sig).map_err(serde::de::Error::custom)
}
