// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event builder

use secp256k1::schnorr::Signature;
use secp256k1::Message;

use super::id::EventId;
use super::kind::Kind;
use super::tag::{Tag, Tags};
use super::{Error, Event};
use crate::key::{Keys, PublicKey};
use crate::types::Timestamp;
use crate::util::SECP256K1;

/// Event builder
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: Kind,
    content: String,
    tags: Vec<Tag>,
    custom_created_at: Option<Timestamp>,
}

impl EventBuilder {
    /// Construct a new builder
    pub fn new<S>(kind: Kind, content: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            kind,
            content: content.into(),
            tags: Vec::new(),
            custom_created_at: None,
        }
    }

    /// Text note
    #[inline]
    pub fn text_note<S>(content: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(Kind::TEXT_NOTE, content)
    }

    /// Client authentication event (NIP42)
    pub fn auth<S1, S2>(challenge: S1, relay_url: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::new(Kind::AUTHENTICATION, "")
            .tag(Tag::relay(relay_url))
            .tag(Tag::challenge(challenge))
    }

    /// Add tag
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Add tags
    pub fn tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        self.tags.extend(tags);
        self
    }

    /// Override the `created_at` timestamp
    pub fn custom_created_at(mut self, created_at: Timestamp) -> Self {
        self.custom_created_at = Some(created_at);
        self
    }

    /// Build and sign the event
    pub fn sign_with_keys(self, keys: &Keys) -> Result<Event, Error> {
        let pubkey: PublicKey = keys.public_key();
        let created_at: Timestamp = self.custom_created_at.unwrap_or_else(Timestamp::now);
        let tags: Tags = Tags::new(self.tags);

        let id: EventId = EventId::new(&pubkey, &created_at, &self.kind, &tags, &self.content);
        let message: Message = Message::from_digest(id.to_bytes());
        let sig: Signature = SECP256K1.sign_schnorr(&message, keys.key_pair());

        Ok(Event {
            id,
            pubkey,
            created_at,
            kind: self.kind,
            tags,
            content: self.content,
            sig,
        })
    }
}
