// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event validation

use std::fmt;

use nostrd_protocol::{Event, Kind, MachineReadablePrefix, Timestamp};

use crate::config::Config;

/// Specific kinds accepted outside the class ranges
const ALLOWED_KINDS: &[u16] = &[
    0,      // metadata
    1,      // short text note
    3,      // contact list
    4,      // encrypted direct message
    5,      // deletion request
    6,      // repost
    7,      // reaction
    16,     // generic repost
    40, 41, 42, 43, 44, // public chat
    1_059,  // gift wrap
    1_984,  // reporting
    9_734, 9_735, // zaps
    22_242, // client authentication
];

/// Storage class of an event, selected by kind
///
/// Exactly one class applies, in this priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Fan-out only, never stored
    Ephemeral,
    /// Pubkey-scoped purge (NIP62)
    Vanish,
    /// Deletion request (NIP09)
    Deletion,
    /// Keep newest per `(pubkey, kind)`
    Replaceable,
    /// Keep newest per `(pubkey, kind, d)`
    Addressable,
    /// Append
    Regular,
}

/// Machine-readable rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectReason {
    prefix: MachineReadablePrefix,
    message: String,
}

impl RejectReason {
    /// New rejection with the given prefix
    pub fn new<S>(prefix: MachineReadablePrefix, message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            prefix,
            message: message.into(),
        }
    }

    /// `invalid:` rejection
    pub fn invalid<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(MachineReadablePrefix::Invalid, message)
    }

    /// `blocked:` rejection
    pub fn blocked<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(MachineReadablePrefix::Blocked, message)
    }

    /// `pow:` rejection
    pub fn pow<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(MachineReadablePrefix::Pow, message)
    }

    /// Get the prefix
    #[inline]
    pub fn prefix(&self) -> MachineReadablePrefix {
        self.prefix
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.prefix, self.message)
    }
}

/// Event validator
///
/// Pure and stateless: safe to call concurrently.
#[derive(Debug, Clone)]
pub struct Validator {
    max_event_tags: usize,
    max_content_length: usize,
    created_at_floor: u64,
    created_at_skew: u64,
    min_pow_difficulty: Option<u8>,
    vanish_kind: Kind,
}

impl Validator {
    /// Build a validator from the relay configuration
    pub fn new(config: &Config) -> Self {
        Self {
            max_event_tags: config.max_event_tags,
            max_content_length: config.max_content_length,
            created_at_floor: config.created_at_floor,
            created_at_skew: config.created_at_skew,
            min_pow_difficulty: config.min_pow_difficulty,
            vanish_kind: Kind::from_u16(config.vanish_kind),
        }
    }

    /// Validate an inbound event
    ///
    /// Checks run in a fixed order and short-circuit on the first failure.
    pub fn validate(&self, event: &Event, now: Timestamp) -> Result<(), RejectReason> {
        // Structural limits
        if event.tags.len() > self.max_event_tags {
            return Err(RejectReason::invalid("too many tags"));
        }
        if event.content.len() > self.max_content_length {
            return Err(RejectReason::invalid("content too long"));
        }

        // Cryptographic checks
        if !event.verify_id() {
            return Err(RejectReason::invalid("invalid event ID"));
        }
        if !event.verify_signature() {
            return Err(RejectReason::invalid("invalid event signature"));
        }

        // Timestamp window
        if event.created_at > now + self.created_at_skew {
            return Err(RejectReason::invalid("created_at too far in the future"));
        }
        if event.created_at < now - self.created_at_floor {
            return Err(RejectReason::invalid("created_at too old"));
        }

        // Kind acceptance
        if !self.is_kind_allowed(event.kind) {
            return Err(RejectReason::blocked(format!(
                "kind {} not accepted",
                event.kind
            )));
        }

        // Required tags
        self.check_required_tags(event)?;

        // Expiration (NIP40)
        if event.is_expired(&now) {
            return Err(RejectReason::invalid("event is expired"));
        }

        // POW (NIP13)
        if let Some(difficulty) = self.min_pow_difficulty {
            if !event.id.check_pow(difficulty) {
                return Err(RejectReason::pow(format!(
                    "required difficulty >= {difficulty}"
                )));
            }
        }

        Ok(())
    }

    /// Check if the kind is accepted by this relay
    pub fn is_kind_allowed(&self, kind: Kind) -> bool {
        ALLOWED_KINDS.contains(&kind.as_u16())
            || kind == self.vanish_kind
            || kind.is_replaceable()
            || kind.is_ephemeral()
            || kind.is_addressable()
            || kind.is_job_request()
            || kind.is_job_result()
            || kind.is_group_control()
            || kind.is_group_metadata()
    }

    fn check_required_tags(&self, event: &Event) -> Result<(), RejectReason> {
        if event.kind.is_addressable() && event.tags.identifier().is_none() {
            return Err(RejectReason::invalid("missing d tag"));
        }

        if event.kind == Kind::REPORTING
            && event.tags.public_keys().next().is_none()
            && event.tags.event_ids().next().is_none()
        {
            return Err(RejectReason::invalid(
                "report must reference a profile or event",
            ));
        }

        if event.kind == Kind::EVENT_DELETION
            && event.tags.event_ids().next().is_none()
            && event.tags.coordinates().next().is_none()
        {
            return Err(RejectReason::invalid("deletion request without targets"));
        }

        if event.kind == self.vanish_kind && event.tags.relay_url().is_none() {
            return Err(RejectReason::invalid("missing relay tag"));
        }

        Ok(())
    }

    /// Select the storage class of the event
    pub fn classify(&self, event: &Event) -> EventClass {
        let kind: Kind = event.kind;
        if kind.is_ephemeral() {
            EventClass::Ephemeral
        } else if kind == self.vanish_kind {
            EventClass::Vanish
        } else if kind == Kind::EVENT_DELETION {
            EventClass::Deletion
        } else if kind.is_replaceable() {
            EventClass::Replaceable
        } else if kind.is_addressable() {
            EventClass::Addressable
        } else {
            EventClass::Regular
        }
    }
}
