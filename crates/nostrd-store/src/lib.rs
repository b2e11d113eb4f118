// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event store abstraction for the nostrd relay
//!
//! A transactional event store with typed operations for the storage classes
//! of NIP01 (regular, replaceable, addressable), deletion requests (NIP09)
//! and requests to vanish (NIP62), plus a sequence-numbered change-feed of
//! committed events consumed by the relay dispatcher.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use nostrd_protocol::{Coordinate, Event, EventId, Filter, Kind, PublicKey, Timestamp};
use tokio::sync::broadcast;

mod error;
mod events;
mod helper;
pub mod memory;
pub mod prelude;

pub use self::error::StoreError;
pub use self::events::Events;
pub use self::memory::MemoryStore;

/// Reason why an event wasn't stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectedReason {
    /// Ephemeral events aren't expected to be stored
    Ephemeral,
    /// The event already exists
    Duplicate,
    /// The event was deleted
    Deleted,
    /// The event is expired
    Expired,
    /// The event was replaced by a newer version
    Replaced,
    /// Attempt to delete a non-owned event
    InvalidDelete,
    /// The author requested to vanish
    Vanished,
    /// Other reason
    Other,
}

/// Save event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SaveEventStatus {
    /// The event has been successfully saved
    Success,
    /// The event has been rejected
    Rejected(RejectedReason),
}

impl SaveEventStatus {
    /// Check if the event was successfully saved
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Status of an event id in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventStatus {
    /// The event is saved
    Saved,
    /// The event is marked as deleted
    Deleted,
    /// The event doesn't exist
    NotExistent,
}

/// An event committed to the store
///
/// `seq` is the per-shard commit sequence: change-feed order equals commit
/// order, and a subscription replay watermark is a `seq` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEvent {
    /// Commit sequence number
    pub seq: u64,
    /// The committed event
    pub event: Event,
}

/// Stream of committed events
///
/// Delivery is at-least-once from the consumer point of view: a receiver
/// that falls behind the buffer observes a lag and continues from the oldest
/// retained commit.
#[derive(Debug)]
pub struct Changefeed {
    receiver: broadcast::Receiver<CommittedEvent>,
}

impl Changefeed {
    /// Wrap a broadcast receiver
    pub fn new(receiver: broadcast::Receiver<CommittedEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next committed event
    ///
    /// Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<CommittedEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Changefeed receiver lagged.");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Transactional event store
///
/// Every operation is atomic; operations that commit an event publish it to
/// the change-feed before returning.
#[async_trait]
pub trait EventStore: fmt::Debug + Send + Sync {
    /// Save a regular event
    ///
    /// **This method assumes that the event was already verified**
    async fn insert(&self, event: &Event) -> Result<SaveEventStatus, StoreError>;

    /// Save a replaceable event, keeping only the newest per `(pubkey, kind)`
    ///
    /// Ties on `created_at` are broken by the lexicographically smaller id.
    /// Older losing records are removed in the same transaction.
    async fn upsert_replaceable(&self, event: &Event) -> Result<SaveEventStatus, StoreError>;

    /// Save an addressable event, keeping only the newest per
    /// `(pubkey, kind, d)`
    async fn upsert_addressable(&self, event: &Event) -> Result<SaveEventStatus, StoreError>;

    /// Apply a deletion request (NIP09) and store the request itself
    ///
    /// `e` targets are deleted only when owned by the request author; `a`
    /// coordinates delete matching records with `created_at` not after the
    /// request. Deletions are never undone.
    async fn delete(&self, request: &Event) -> Result<SaveEventStatus, StoreError>;

    /// Apply a request to vanish (NIP62) and store the request itself
    ///
    /// Purges every event of the author plus every `gift_wrap_kind` event
    /// that `p`-tags the author, then marks the pubkey vanished.
    async fn vanish(&self, request: &Event, gift_wrap_kind: Kind)
        -> Result<SaveEventStatus, StoreError>;

    /// Delete events by id, only where the stored author is `requester`
    ///
    /// Returns the set of ids actually deleted.
    async fn delete_by_id(
        &self,
        ids: &[EventId],
        requester: &PublicKey,
    ) -> Result<HashSet<EventId>, StoreError>;

    /// Delete addressable records matching `coordinate` with
    /// `created_at <= max_created_at`
    async fn delete_addressable_before(
        &self,
        coordinate: &Coordinate,
        max_created_at: Timestamp,
    ) -> Result<HashSet<EventId>, StoreError>;

    /// Purge every event of `public_key` plus every `gift_wrap_kind` event
    /// that `p`-tags it
    ///
    /// Returns the number of purged events.
    async fn purge_pubkey(
        &self,
        public_key: &PublicKey,
        gift_wrap_kind: Kind,
    ) -> Result<usize, StoreError>;

    /// Check the status of an event id
    async fn check_id(&self, event_id: &EventId) -> Result<EventStatus, StoreError>;

    /// Check if the pubkey has requested to vanish
    async fn is_vanished(&self, public_key: &PublicKey) -> Result<bool, StoreError>;

    /// Query stored events matching the filter
    ///
    /// Results are ordered by `created_at` descending, ties broken by id
    /// ascending; the filter `limit` is honored.
    async fn query(&self, filter: Filter) -> Result<Events, StoreError>;

    /// Query a set of filters together with the commit watermark observed
    /// atomically with the snapshot
    ///
    /// All filters see the same snapshot. Change-feed items with `seq`
    /// greater than the returned watermark are exactly the commits not
    /// visible in it.
    async fn query_with_watermark(
        &self,
        filters: &[Filter],
    ) -> Result<(Vec<Events>, u64), StoreError>;

    /// Count stored events matching the filter
    async fn count(&self, filter: Filter) -> Result<usize, StoreError>;

    /// Subscribe to the stream of committed events
    fn changefeed(&self) -> Changefeed;

    /// Get the current commit sequence
    fn watermark(&self) -> u64;
}
