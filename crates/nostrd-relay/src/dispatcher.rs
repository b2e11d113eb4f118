// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Event dispatcher
//!
//! Consumes the store change-feed and fans committed events out to matching
//! subscriptions. Candidate subscriptions are found through inverted indexes
//! on `authors`, `kinds` and the `#e`/`#p`/`#d` tag values; filters with
//! none of those fields land in a generic scan set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nostrd_protocol::{
    Event, Filter, Kind, PublicKey, RelayMessage, SingleLetterTag, SubscriptionId,
};
use nostrd_store::Changefeed;
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::{Notify, RwLock};

/// Connection identifier assigned by the accept loop
pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionKey {
    conn: ConnectionId,
    sub: SubscriptionId,
}

/// Where a subscription key was inserted, for O(1) removal
#[derive(Debug, Clone)]
enum IndexRef {
    Author(PublicKey),
    Kind(Kind),
    EventTag(String),
    PubkeyTag(String),
    IdentifierTag(String),
    Generic,
}

#[derive(Debug)]
enum SubscriptionState {
    /// Historical replay in flight: live matches are parked until the
    /// replay watermark is known
    Replaying { pending: Vec<(Option<u64>, Event)> },
    /// Forwarding live events
    Live,
}

#[derive(Debug)]
struct SubscriptionEntry {
    filters: Vec<Filter>,
    watermark: u64,
    state: SubscriptionState,
    index_refs: Vec<IndexRef>,
}

#[derive(Debug)]
struct ConnectionHandle {
    sender: Sender<RelayMessage>,
    kick: Arc<Notify>,
    strikes: u32,
    subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
}

#[derive(Debug, Default)]
struct SubscriptionIndex {
    authors: HashMap<PublicKey, HashSet<SubscriptionKey>>,
    kinds: HashMap<Kind, HashSet<SubscriptionKey>>,
    event_tags: HashMap<String, HashSet<SubscriptionKey>>,
    pubkey_tags: HashMap<String, HashSet<SubscriptionKey>>,
    identifier_tags: HashMap<String, HashSet<SubscriptionKey>>,
    generic: HashSet<SubscriptionKey>,
}

impl SubscriptionIndex {
    fn insert(&mut self, key: &SubscriptionKey, filters: &[Filter]) -> Vec<IndexRef> {
        let mut refs: Vec<IndexRef> = Vec::new();

        for filter in filters.iter() {
            let mut indexed: bool = false;

            if let Some(authors) = &filter.authors {
                for author in authors.iter() {
                    self.authors.entry(*author).or_default().insert(key.clone());
                    refs.push(IndexRef::Author(*author));
                    indexed = true;
                }
            }

            if let Some(kinds) = &filter.kinds {
                for kind in kinds.iter() {
                    self.kinds.entry(*kind).or_default().insert(key.clone());
                    refs.push(IndexRef::Kind(*kind));
                    indexed = true;
                }
            }

            for (tag, map, make_ref) in [
                (
                    SingleLetterTag::E,
                    &mut self.event_tags,
                    IndexRef::EventTag as fn(String) -> IndexRef,
                ),
                (SingleLetterTag::P, &mut self.pubkey_tags, IndexRef::PubkeyTag),
                (
                    SingleLetterTag::D,
                    &mut self.identifier_tags,
                    IndexRef::IdentifierTag,
                ),
            ] {
                if let Some(values) = filter.generic_tags.get(&tag) {
                    for value in values.iter() {
                        map.entry(value.clone()).or_default().insert(key.clone());
                        refs.push(make_ref(value.clone()));
                        indexed = true;
                    }
                }
            }

            if !indexed {
                self.generic.insert(key.clone());
                refs.push(IndexRef::Generic);
            }
        }

        refs
    }

    fn remove(&mut self, key: &SubscriptionKey, refs: &[IndexRef]) {
        for index_ref in refs.iter() {
            match index_ref {
                IndexRef::Author(author) => {
                    if let Some(set) = self.authors.get_mut(author) {
                        set.remove(key);
                        if set.is_empty() {
                            self.authors.remove(author);
                        }
                    }
                }
                IndexRef::Kind(kind) => {
                    if let Some(set) = self.kinds.get_mut(kind) {
                        set.remove(key);
                        if set.is_empty() {
                            self.kinds.remove(kind);
                        }
                    }
                }
                IndexRef::EventTag(value) => {
                    if let Some(set) = self.event_tags.get_mut(value) {
                        set.remove(key);
                        if set.is_empty() {
                            self.event_tags.remove(value);
                        }
                    }
                }
                IndexRef::PubkeyTag(value) => {
                    if let Some(set) = self.pubkey_tags.get_mut(value) {
                        set.remove(key);
                        if set.is_empty() {
                            self.pubkey_tags.remove(value);
                        }
                    }
                }
                IndexRef::IdentifierTag(value) => {
                    if let Some(set) = self.identifier_tags.get_mut(value) {
                        set.remove(key);
                        if set.is_empty() {
                            self.identifier_tags.remove(value);
                        }
                    }
                }
                IndexRef::Generic => {
                    self.generic.remove(key);
                }
            }
        }
    }

    /// Union of index hits for the event, plus the generic scan set
    fn candidates(&self, event: &Event) -> HashSet<SubscriptionKey> {
        let mut out: HashSet<SubscriptionKey> = self.generic.clone();

        if let Some(set) = self.authors.get(&event.pubkey) {
            out.extend(set.iter().cloned());
        }
        if let Some(set) = self.kinds.get(&event.kind) {
            out.extend(set.iter().cloned());
        }

        let indexes = event.tags.indexes();
        for (tag, map) in [
            (SingleLetterTag::E, &self.event_tags),
            (SingleLetterTag::P, &self.pubkey_tags),
            (SingleLetterTag::D, &self.identifier_tags),
        ] {
            if let Some(values) = indexes.get(&tag) {
                for value in values.iter() {
                    if let Some(set) = map.get(value) {
                        out.extend(set.iter().cloned());
                    }
                }
            }
        }

        out
    }
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    index: SubscriptionIndex,
}

/// Event dispatcher
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<RwLock<Inner>>,
    slow_consumer_threshold: u32,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(slow_consumer_threshold: u32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            slow_consumer_threshold: slow_consumer_threshold.max(1),
        }
    }

    /// Register a connection's outbound queue
    pub async fn register_connection(
        &self,
        conn: ConnectionId,
        sender: Sender<RelayMessage>,
        kick: Arc<Notify>,
    ) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(
            conn,
            ConnectionHandle {
                sender,
                kick,
                strikes: 0,
                subscriptions: HashMap::new(),
            },
        );
    }

    /// Remove a connection and all of its subscriptions
    pub async fn unregister_connection(&self, conn: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(handle) = inner.connections.remove(&conn) {
            for (sub, entry) in handle.subscriptions.into_iter() {
                let key = SubscriptionKey { conn, sub };
                inner.index.remove(&key, &entry.index_refs);
            }
        }
    }

    /// Register (or replace) a subscription in the replaying state
    ///
    /// Live matches are parked until [`Dispatcher::activate_subscription`]
    /// supplies the replay watermark.
    pub async fn register_subscription(
        &self,
        conn: ConnectionId,
        sub: SubscriptionId,
        filters: Vec<Filter>,
    ) {
        let mut guard = self.inner.write().await;
        let inner: &mut Inner = &mut *guard;
        let key = SubscriptionKey {
            conn,
            sub: sub.clone(),
        };

        let Some(handle) = inner.connections.get_mut(&conn) else {
            return;
        };

        // Replace an existing registration under the same id
        if let Some(old) = handle.subscriptions.remove(&sub) {
            inner.index.remove(&key, &old.index_refs);
        }

        let index_refs: Vec<IndexRef> = inner.index.insert(&key, &filters);
        handle.subscriptions.insert(
            sub,
            SubscriptionEntry {
                filters,
                watermark: 0,
                state: SubscriptionState::Replaying {
                    pending: Vec::new(),
                },
                index_refs,
            },
        );
    }

    /// Switch a subscription live after its historical replay
    ///
    /// Parked events committed after `watermark` are flushed in order;
    /// everything at or below it was already covered by the replay.
    pub async fn activate_subscription(
        &self,
        conn: ConnectionId,
        sub: &SubscriptionId,
        watermark: u64,
    ) {
        let mut inner = self.inner.write().await;
        let threshold: u32 = self.slow_consumer_threshold;
        if let Some(handle) = inner.connections.get_mut(&conn) {
            let pending: Vec<(Option<u64>, Event)> = match handle.subscriptions.get_mut(sub) {
                Some(entry) => {
                    entry.watermark = watermark;
                    match std::mem::replace(&mut entry.state, SubscriptionState::Live) {
                        SubscriptionState::Replaying { pending } => pending,
                        SubscriptionState::Live => Vec::new(),
                    }
                }
                None => return,
            };

            for (seq, event) in pending.into_iter() {
                if let Some(seq) = seq {
                    if seq <= watermark {
                        continue;
                    }
                }
                let msg = RelayMessage::event(sub.clone(), event);
                deliver(handle, msg, threshold);
            }
        }
    }

    /// Remove a subscription
    pub async fn unregister_subscription(&self, conn: ConnectionId, sub: &SubscriptionId) {
        let mut inner = self.inner.write().await;
        if let Some(handle) = inner.connections.get_mut(&conn) {
            if let Some(entry) = handle.subscriptions.remove(sub) {
                let key = SubscriptionKey {
                    conn,
                    sub: sub.clone(),
                };
                inner.index.remove(&key, &entry.index_refs);
            }
        }
    }

    /// Fan an event out to every matching subscription
    ///
    /// `seq` is the commit sequence for stored events and `None` for
    /// ephemeral events, which bypass the replay watermark.
    pub async fn dispatch(&self, event: &Event, seq: Option<u64>) {
        let mut inner = self.inner.write().await;
        let threshold: u32 = self.slow_consumer_threshold;
        let candidates: HashSet<SubscriptionKey> = inner.index.candidates(event);

        for key in candidates.into_iter() {
            let Some(handle) = inner.connections.get_mut(&key.conn) else {
                continue;
            };

            let send: bool = match handle.subscriptions.get_mut(&key.sub) {
                Some(entry) => {
                    if let (Some(seq), SubscriptionState::Live) = (seq, &entry.state) {
                        if seq <= entry.watermark {
                            continue;
                        }
                    }
                    if !entry.filters.iter().any(|f| f.match_event(event)) {
                        continue;
                    }
                    match &mut entry.state {
                        SubscriptionState::Replaying { pending } => {
                            pending.push((seq, event.clone()));
                            false
                        }
                        SubscriptionState::Live => true,
                    }
                }
                None => continue,
            };

            if send {
                let msg = RelayMessage::event(key.sub.clone(), event.clone());
                deliver(handle, msg, threshold);
            }
        }
    }

    /// Consume the change-feed until shutdown
    pub async fn run(self, mut feed: Changefeed, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                item = feed.next() => match item {
                    Some(committed) => {
                        self.dispatch(&committed.event, Some(committed.seq)).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }

        tracing::info!("Event dispatcher terminated.");
    }
}

/// Enqueue a frame without blocking; a full queue costs a strike and enough
/// consecutive strikes get the connection kicked
fn deliver(handle: &mut ConnectionHandle, msg: RelayMessage, threshold: u32) {
    match handle.sender.try_send(msg) {
        Ok(()) => {
            handle.strikes = 0;
        }
        Err(TrySendError::Full(..)) => {
            handle.strikes += 1;
            tracing::debug!(strikes = handle.strikes, "Dropped frame for slow consumer.");
            if handle.strikes >= threshold {
                handle.kick.notify_one();
            }
        }
        Err(TrySendError::Closed(..)) => {}
    }
}

#[cfg(test)]
mod tests {
    use nostrd_protocol::{EventBuilder, Keys, Kind, Tag};
    use tokio::sync::mpsc;

    use super::*;

    async fn recv_event(
        rx: &mut mpsc::Receiver<RelayMessage>,
    ) -> Option<(SubscriptionId, Event)> {
        match rx.try_recv() {
            Ok(RelayMessage::Event {
                subscription_id,
                event,
            }) => Some((subscription_id, *event)),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_author_index() {
        let dispatcher = Dispatcher::new(8);
        let keys = Keys::generate();
        let other = Keys::generate();
        let (tx, mut rx) = mpsc::channel(8);
        let kick = Arc::new(Notify::new());

        dispatcher.register_connection(1, tx, kick).await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(1, sub.clone(), vec![Filter::new().author(keys.public_key())])
            .await;
        dispatcher.activate_subscription(1, &sub, 0).await;

        let matching = EventBuilder::text_note("hi")
            .sign_with_keys(&keys)
            .unwrap();
        let non_matching = EventBuilder::text_note("other")
            .sign_with_keys(&other)
            .unwrap();

        dispatcher.dispatch(&non_matching, Some(1)).await;
        dispatcher.dispatch(&matching, Some(2)).await;

        let (got_sub, got_event) = recv_event(&mut rx).await.unwrap();
        assert_eq!(got_sub, sub);
        assert_eq!(got_event.id, matching.id);
        assert!(recv_event(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_watermark_skips_replayed_commits() {
        let dispatcher = Dispatcher::new(8);
        let keys = Keys::generate();
        let (tx, mut rx) = mpsc::channel(8);

        dispatcher
            .register_connection(1, tx, Arc::new(Notify::new()))
            .await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(1, sub.clone(), vec![Filter::new().kind(Kind::TEXT_NOTE)])
            .await;
        dispatcher.activate_subscription(1, &sub, 5).await;

        let event = EventBuilder::text_note("hi")
            .sign_with_keys(&keys)
            .unwrap();

        // Covered by the replay snapshot
        dispatcher.dispatch(&event, Some(5)).await;
        assert!(recv_event(&mut rx).await.is_none());

        // Committed after the snapshot
        dispatcher.dispatch(&event, Some(6)).await;
        assert!(recv_event(&mut rx).await.is_some());
    }

    #[tokio::test]
    async fn test_pending_flush_on_activation() {
        let dispatcher = Dispatcher::new(8);
        let keys = Keys::generate();
        let (tx, mut rx) = mpsc::channel(8);

        dispatcher
            .register_connection(1, tx, Arc::new(Notify::new()))
            .await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(1, sub.clone(), vec![Filter::new().kind(Kind::TEXT_NOTE)])
            .await;

        let early = EventBuilder::text_note("early")
            .sign_with_keys(&keys)
            .unwrap();
        let late = EventBuilder::text_note("late")
            .sign_with_keys(&keys)
            .unwrap();

        // Both arrive while the replay is running; the snapshot will turn
        // out to cover seq 3
        dispatcher.dispatch(&early, Some(3)).await;
        dispatcher.dispatch(&late, Some(4)).await;
        assert!(recv_event(&mut rx).await.is_none());

        dispatcher.activate_subscription(1, &sub, 3).await;
        let (.., got) = recv_event(&mut rx).await.unwrap();
        assert_eq!(got.id, late.id);
        assert!(recv_event(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_ephemeral_bypasses_watermark() {
        let dispatcher = Dispatcher::new(8);
        let keys = Keys::generate();
        let (tx, mut rx) = mpsc::channel(8);

        dispatcher
            .register_connection(1, tx, Arc::new(Notify::new()))
            .await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(
                1,
                sub.clone(),
                vec![Filter::new().kind(Kind::from_u16(20_001))],
            )
            .await;
        dispatcher.activate_subscription(1, &sub, 100).await;

        let event = EventBuilder::new(Kind::from_u16(20_001), "ephemeral")
            .sign_with_keys(&keys)
            .unwrap();
        dispatcher.dispatch(&event, None).await;
        assert!(recv_event(&mut rx).await.is_some());
    }

    #[tokio::test]
    async fn test_tag_index_candidates() {
        let dispatcher = Dispatcher::new(8);
        let keys = Keys::generate();
        let target = Keys::generate();
        let (tx, mut rx) = mpsc::channel(8);

        dispatcher
            .register_connection(1, tx, Arc::new(Notify::new()))
            .await;
        let sub = SubscriptionId::new("mentions");
        dispatcher
            .register_subscription(
                1,
                sub.clone(),
                vec![Filter::new().pubkey(target.public_key())],
            )
            .await;
        dispatcher.activate_subscription(1, &sub, 0).await;

        let mention = EventBuilder::text_note("gm")
            .tag(Tag::public_key(target.public_key()))
            .sign_with_keys(&keys)
            .unwrap();
        let unrelated = EventBuilder::text_note("gm")
            .sign_with_keys(&keys)
            .unwrap();

        dispatcher.dispatch(&unrelated, Some(1)).await;
        dispatcher.dispatch(&mention, Some(2)).await;

        let (.., got) = recv_event(&mut rx).await.unwrap();
        assert_eq!(got.id, mention.id);
        assert!(recv_event(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_slow_consumer_kick() {
        let dispatcher = Dispatcher::new(2);
        let keys = Keys::generate();
        // Capacity 1 and nobody draining: the second frame is dropped
        let (tx, _rx) = mpsc::channel(1);
        let kick = Arc::new(Notify::new());
        let kicked = kick.clone();

        dispatcher.register_connection(1, tx, kick).await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(1, sub.clone(), vec![Filter::new().kind(Kind::TEXT_NOTE)])
            .await;
        dispatcher.activate_subscription(1, &sub, 0).await;

        for seq in 1..=3u64 {
            let event = EventBuilder::text_note(format!("n{seq}"))
                .sign_with_keys(&keys)
                .unwrap();
            dispatcher.dispatch(&event, Some(seq)).await;
        }

        // Two consecutive drops reach the threshold
        tokio::time::timeout(std::time::Duration::from_millis(100), kicked.notified())
            .await
            .expect("expected slow consumer kick");
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let dispatcher = Dispatcher::new(8);
        let keys = Keys::generate();
        let (tx, mut rx) = mpsc::channel(8);

        dispatcher
            .register_connection(1, tx, Arc::new(Notify::new()))
            .await;
        let sub = SubscriptionId::new("s1");
        dispatcher
            .register_subscription(1, sub.clone(), vec![Filter::new()])
            .await;
        dispatcher.activate_subscription(1, &sub, 0).await;
        dispatcher.unregister_subscription(1, &sub).await;

        let event = EventBuilder::text_note("hi")
            .sign_with_keys(&keys)
            .unwrap();
        dispatcher.dispatch(&event, Some(1)).await;
        assert!(recv_event(&mut rx).await.is_none());
    }
}
