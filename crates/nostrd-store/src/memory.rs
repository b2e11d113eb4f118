// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! In-memory event store

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nostrd_protocol::{Coordinate, Event, EventId, Filter, Kind, PublicKey, Timestamp};
use tokio::sync::{broadcast, RwLock};

use crate::helper::InternalStore;
use crate::{
    Changefeed, CommittedEvent, EventStatus, EventStore, Events, SaveEventStatus, StoreError,
};

const CHANGEFEED_CAPACITY: usize = 1024;

/// In-memory event store
///
/// The write lock scope is the transaction: mutations, the sequence bump and
/// the change-feed publish all happen under it, so feed order equals commit
/// order.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<InternalStore>>,
    seq: Arc<AtomicU64>,
    feed: broadcast::Sender<CommittedEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        let (feed, ..) = broadcast::channel(CHANGEFEED_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(InternalStore::default())),
            seq: Arc::new(AtomicU64::new(0)),
            feed,
        }
    }

    /// Publish a committed event; call only while holding the write lock
    fn publish(&self, event: &Event) {
        let seq: u64 = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // Send fails only when there are no subscribers
        let _ = self.feed.send(CommittedEvent {
            seq,
            event: event.clone(),
        });
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert(&self, event: &Event) -> Result<SaveEventStatus, StoreError> {
        let mut inner = self.inner.write().await;
        let status: SaveEventStatus = inner.insert(event);
        if status.is_success() {
            self.publish(event);
        }
        Ok(status)
    }

    async fn upsert_replaceable(&self, event: &Event) -> Result<SaveEventStatus, StoreError> {
        let mut inner = self.inner.write().await;
        let status: SaveEventStatus = inner.upsert_replaceable(event);
        if status.is_success() {
            self.publish(event);
        }
        Ok(status)
    }

    async fn upsert_addressable(&self, event: &Event) -> Result<SaveEventStatus, StoreError> {
        let mut inner = self.inner.write().await;
        let status: SaveEventStatus = inner.upsert_addressable(event);
        if status.is_success() {
            self.publish(event);
        }
        Ok(status)
    }

    async fn delete(&self, request: &Event) -> Result<SaveEventStatus, StoreError> {
        let mut inner = self.inner.write().await;
        let status: SaveEventStatus = inner.delete(request);
        if status.is_success() {
            self.publish(request);
        }
        Ok(status)
    }

    async fn vanish(
        &self,
        request: &Event,
        gift_wrap_kind: Kind,
    ) -> Result<SaveEventStatus, StoreError> {
        let mut inner = self.inner.write().await;
        let status: SaveEventStatus = inner.vanish(request, gift_wrap_kind);
        if status.is_success() {
            self.publish(request);
        }
        Ok(status)
    }

    async fn delete_by_id(
        &self,
        ids: &[EventId],
        requester: &PublicKey,
    ) -> Result<HashSet<EventId>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.delete_by_id(ids, requester))
    }

    async fn delete_addressable_before(
        &self,
        coordinate: &Coordinate,
        max_created_at: Timestamp,
    ) -> Result<HashSet<EventId>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.delete_addressable_before(coordinate, max_created_at))
    }

    async fn purge_pubkey(
        &self,
        public_key: &PublicKey,
        gift_wrap_kind: Kind,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.purge_pubkey(public_key, gift_wrap_kind))
    }

    async fn check_id(&self, event_id: &EventId) -> Result<EventStatus, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.check_id(event_id))
    }

    async fn is_vanished(&self, public_key: &PublicKey) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.is_vanished(public_key))
    }

    async fn query(&self, filter: Filter) -> Result<Events, StoreError> {
        let inner = self.inner.read().await;
        Ok(Events::new(inner.query(filter)))
    }

    async fn query_with_watermark(
        &self,
        filters: &[Filter],
    ) -> Result<(Vec<Events>, u64), StoreError> {
        let inner = self.inner.read().await;
        let watermark: u64 = self.seq.load(Ordering::SeqCst);
        let results: Vec<Events> = filters
            .iter()
            .map(|filter| Events::new(inner.query(filter.clone())))
            .collect();
        Ok((results, watermark))
    }

    async fn count(&self, filter: Filter) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.count(filter))
    }

    fn changefeed(&self) -> Changefeed {
        Changefeed::new(self.feed.subscribe())
    }

    fn watermark(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use nostrd_protocol::EventBuilder;
    use nostrd_protocol::Keys;

    use super::*;

    #[tokio::test]
    async fn test_changefeed_order_matches_commit_order() {
        let store = MemoryStore::new();
        let keys = Keys::generate();
        let mut feed = store.changefeed();

        let mut ids = Vec::new();
        for i in 0..5u64 {
            let event = EventBuilder::text_note(format!("note {i}"))
                .custom_created_at(Timestamp::from_secs(100 + i))
                .sign_with_keys(&keys)
                .unwrap();
            ids.push(event.id);
            assert!(store.insert(&event).await.unwrap().is_success());
        }

        for (i, id) in ids.iter().enumerate() {
            let committed = feed.next().await.unwrap();
            assert_eq!(committed.seq, i as u64 + 1);
            assert_eq!(&committed.event.id, id);
        }
    }

    #[tokio::test]
    async fn test_rejected_events_not_published() {
        let store = MemoryStore::new();
        let keys = Keys::generate();
        let mut feed = store.changefeed();

        let event = EventBuilder::text_note("once")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(store.insert(&event).await.unwrap().is_success());
        assert!(!store.insert(&event).await.unwrap().is_success());

        let committed = feed.next().await.unwrap();
        assert_eq!(committed.event.id, event.id);
        assert_eq!(store.watermark(), 1);
    }

    #[tokio::test]
    async fn test_query_with_watermark_snapshot() {
        let store = MemoryStore::new();
        let keys = Keys::generate();

        let event = EventBuilder::text_note("before")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(store.insert(&event).await.unwrap().is_success());

        let (events, watermark) = store
            .query_with_watermark(&[Filter::new()])
            .await
            .unwrap();
        assert_eq!(events[0].len(), 1);
        assert_eq!(watermark, 1);

        let later = EventBuilder::text_note("after")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(store.insert(&later).await.unwrap().is_success());
        assert_eq!(store.watermark(), 2);
    }
}
