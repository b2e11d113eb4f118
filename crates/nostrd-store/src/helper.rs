// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Indexed event set
//!
//! The single-threaded core of [`crate::MemoryStore`]: every public method
//! is one transaction when called under the store lock.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::iter;
use std::sync::Arc;

use nostrd_protocol::{Coordinate, Event, EventId, Filter, Kind, PublicKey, Timestamp};

use crate::{EventStatus, RejectedReason, SaveEventStatus};

type StoredEvent = Arc<Event>;

/// Indexed event set
#[derive(Debug, Default)]
pub(crate) struct InternalStore {
    /// Sorted events, newest first
    events: BTreeSet<StoredEvent>,
    ids: HashMap<EventId, StoredEvent>,
    author_index: HashMap<PublicKey, BTreeSet<StoredEvent>>,
    kind_author_index: HashMap<(Kind, PublicKey), BTreeSet<StoredEvent>>,
    addressable_index: HashMap<(Kind, PublicKey, String), StoredEvent>,
    /// Tombstones: ids that must never be admitted again
    deleted_ids: HashSet<EventId>,
    /// Latest deletion timestamp per coordinate
    deleted_coordinates: HashMap<Coordinate, Timestamp>,
    /// Vanished authors with their retained request
    vanished: HashMap<PublicKey, StoredEvent>,
}

/// `candidate` wins over `existing` when newer, or same age with the
/// lexicographically smaller id
fn wins_over(candidate: &Event, existing: &Event) -> bool {
    candidate.created_at > existing.created_at
        || (candidate.created_at == existing.created_at && candidate.id < existing.id)
}

impl InternalStore {
    fn admission_guard(&self, event: &Event) -> Option<RejectedReason> {
        if event.kind.is_ephemeral() {
            return Some(RejectedReason::Ephemeral);
        }
        if self.ids.contains_key(&event.id) {
            return Some(RejectedReason::Duplicate);
        }
        if self.deleted_ids.contains(&event.id) {
            return Some(RejectedReason::Deleted);
        }
        if self.vanished.contains_key(&event.pubkey) {
            return Some(RejectedReason::Vanished);
        }
        if event.is_expired(&Timestamp::now()) {
            return Some(RejectedReason::Expired);
        }
        None
    }

    fn coordinate_deleted(&self, event: &Event) -> bool {
        match event.coordinate() {
            Some(coordinate) => self
                .deleted_coordinates
                .get(&coordinate)
                .map_or(false, |t| *t >= event.created_at),
            None => false,
        }
    }

    fn index_event(&mut self, event: &Event) {
        let e: StoredEvent = Arc::new(event.clone());

        self.events.insert(e.clone());
        self.ids.insert(e.id, e.clone());
        self.author_index
            .entry(e.pubkey)
            .or_default()
            .insert(e.clone());
        self.kind_author_index
            .entry((e.kind, e.pubkey))
            .or_default()
            .insert(e.clone());

        if e.kind.is_addressable() {
            let identifier: String = e.tags.identifier().unwrap_or_default().to_string();
            self.addressable_index
                .insert((e.kind, e.pubkey, identifier), e);
        }
    }

    /// Remove an event from every index and tombstone its id
    fn discard(&mut self, id: &EventId) {
        if let Some(ev) = self.ids.remove(id) {
            self.events.remove(&ev);

            if let Some(set) = self.author_index.get_mut(&ev.pubkey) {
                set.remove(&ev);
            }

            if let Some(set) = self.kind_author_index.get_mut(&(ev.kind, ev.pubkey)) {
                set.remove(&ev);
            }

            if ev.kind.is_addressable() {
                let identifier: String = ev.tags.identifier().unwrap_or_default().to_string();
                self.addressable_index
                    .remove(&(ev.kind, ev.pubkey, identifier));
            }
        }
        self.deleted_ids.insert(*id);
    }

    fn discard_events(&mut self, ids: &HashSet<EventId>) {
        for id in ids.iter() {
            self.discard(id);
        }
    }

    /// Save a regular event
    pub fn insert(&mut self, event: &Event) -> SaveEventStatus {
        if let Some(reason) = self.admission_guard(event) {
            return SaveEventStatus::Rejected(reason);
        }
        self.index_event(event);
        SaveEventStatus::Success
    }

    /// Save a replaceable event, keeping only the newest per `(pubkey, kind)`
    pub fn upsert_replaceable(&mut self, event: &Event) -> SaveEventStatus {
        if let Some(reason) = self.admission_guard(event) {
            return SaveEventStatus::Rejected(reason);
        }
        if self.coordinate_deleted(event) {
            return SaveEventStatus::Rejected(RejectedReason::Deleted);
        }

        let mut to_discard: Vec<EventId> = Vec::new();
        if let Some(set) = self.kind_author_index.get(&(event.kind, event.pubkey)) {
            for existing in set.iter() {
                if wins_over(event, existing) {
                    to_discard.push(existing.id);
                } else {
                    return SaveEventStatus::Rejected(RejectedReason::Replaced);
                }
            }
        }

        for id in to_discard.iter() {
            self.discard(id);
        }
        self.index_event(event);
        SaveEventStatus::Success
    }

    /// Save an addressable event, keeping only the newest per
    /// `(pubkey, kind, d)`
    pub fn upsert_addressable(&mut self, event: &Event) -> SaveEventStatus {
        if let Some(reason) = self.admission_guard(event) {
            return SaveEventStatus::Rejected(reason);
        }
        if self.coordinate_deleted(event) {
            return SaveEventStatus::Rejected(RejectedReason::Deleted);
        }

        let identifier: String = event.tags.identifier().unwrap_or_default().to_string();
        let key = (event.kind, event.pubkey, identifier);

        if let Some(existing) = self.addressable_index.get(&key) {
            if !wins_over(event, existing) {
                return SaveEventStatus::Rejected(RejectedReason::Replaced);
            }
            let existing_id: EventId = existing.id;
            self.discard(&existing_id);
        }

        self.index_event(event);
        SaveEventStatus::Success
    }

    /// Apply a deletion request (NIP09) and store the request itself
    ///
    /// Targets not owned by the request author are skipped: the request is
    /// still stored, just ineffective for them.
    pub fn delete(&mut self, request: &Event) -> SaveEventStatus {
        if let Some(reason) = self.admission_guard(request) {
            return SaveEventStatus::Rejected(reason);
        }

        let author: PublicKey = request.pubkey;
        let mut to_discard: HashSet<EventId> = HashSet::new();

        // `e` targets: delete only what the author owns
        for id in request.tags.event_ids() {
            if let Some(ev) = self.ids.get(&id) {
                if ev.pubkey == author {
                    to_discard.insert(id);
                }
            }
        }

        // `a` targets: record the coordinate tombstone and delete records
        // not newer than the request
        for coordinate in request.tags.coordinates() {
            if coordinate.public_key != author {
                continue;
            }

            self.deleted_coordinates
                .entry(coordinate.clone())
                .and_modify(|t| {
                    if request.created_at > *t {
                        *t = request.created_at;
                    }
                })
                .or_insert(request.created_at);

            to_discard.extend(self.addressable_ids_before(&coordinate, request.created_at));
        }

        self.discard_events(&to_discard);
        self.index_event(request);
        SaveEventStatus::Success
    }

    /// Apply a request to vanish (NIP62)
    ///
    /// The request is retained aside the queryable set; the pubkey stays
    /// vanished for the lifetime of the store.
    pub fn vanish(&mut self, request: &Event, gift_wrap_kind: Kind) -> SaveEventStatus {
        if self.vanished.contains_key(&request.pubkey) {
            return SaveEventStatus::Rejected(RejectedReason::Vanished);
        }
        if self.deleted_ids.contains(&request.id) {
            return SaveEventStatus::Rejected(RejectedReason::Deleted);
        }

        self.purge_pubkey(&request.pubkey, gift_wrap_kind);
        self.vanished
            .insert(request.pubkey, Arc::new(request.clone()));
        SaveEventStatus::Success
    }

    /// Delete events by id, only where the stored author is `requester`
    pub fn delete_by_id(&mut self, ids: &[EventId], requester: &PublicKey) -> HashSet<EventId> {
        let deleted: HashSet<EventId> = ids
            .iter()
            .filter(|id| {
                self.ids
                    .get(*id)
                    .map_or(false, |ev| &ev.pubkey == requester)
            })
            .copied()
            .collect();
        self.discard_events(&deleted);
        deleted
    }

    /// Delete addressable records matching `coordinate` with
    /// `created_at <= max_created_at`
    pub fn delete_addressable_before(
        &mut self,
        coordinate: &Coordinate,
        max_created_at: Timestamp,
    ) -> HashSet<EventId> {
        let ids: HashSet<EventId> = self
            .addressable_ids_before(coordinate, max_created_at)
            .into_iter()
            .collect();
        self.discard_events(&ids);
        ids
    }

    fn addressable_ids_before(&self, coordinate: &Coordinate, max: Timestamp) -> Vec<EventId> {
        if coordinate.identifier.is_empty() {
            match self
                .kind_author_index
                .get(&(coordinate.kind, coordinate.public_key))
            {
                Some(set) => set
                    .iter()
                    .filter(|ev| ev.created_at <= max)
                    .map(|ev| ev.id)
                    .collect(),
                None => Vec::new(),
            }
        } else {
            self.addressable_index
                .get(&(
                    coordinate.kind,
                    coordinate.public_key,
                    coordinate.identifier.clone(),
                ))
                .filter(|ev| ev.created_at <= max)
                .map(|ev| vec![ev.id])
                .unwrap_or_default()
        }
    }

    /// Purge every event of `public_key` plus every `gift_wrap_kind` event
    /// that `p`-tags it
    pub fn purge_pubkey(&mut self, public_key: &PublicKey, gift_wrap_kind: Kind) -> usize {
        let mut to_discard: HashSet<EventId> = self
            .author_index
            .get(public_key)
            .map(|set| set.iter().map(|ev| ev.id).collect())
            .unwrap_or_default();

        to_discard.extend(
            self.events
                .iter()
                .filter(|ev| {
                    ev.kind == gift_wrap_kind && ev.tags.public_keys().any(|p| &p == public_key)
                })
                .map(|ev| ev.id),
        );

        let count: usize = to_discard.len();
        self.discard_events(&to_discard);
        count
    }

    pub fn check_id(&self, event_id: &EventId) -> EventStatus {
        if self.ids.contains_key(event_id) {
            EventStatus::Saved
        } else if self.deleted_ids.contains(event_id) {
            EventStatus::Deleted
        } else {
            EventStatus::NotExistent
        }
    }

    #[inline]
    pub fn is_vanished(&self, public_key: &PublicKey) -> bool {
        self.vanished.contains_key(public_key)
    }

    /// Pick the narrowest index for the filter
    fn plan<'a>(&'a self, filter: &Filter) -> Box<dyn Iterator<Item = &'a StoredEvent> + 'a> {
        let single_author: Option<PublicKey> = filter
            .authors
            .as_ref()
            .filter(|a| a.len() == 1)
            .and_then(|a| a.iter().next().copied());
        let single_kind: Option<Kind> = filter
            .kinds
            .as_ref()
            .filter(|k| k.len() == 1)
            .and_then(|k| k.iter().next().copied());

        match (single_kind, single_author) {
            (Some(kind), Some(author)) => match self.kind_author_index.get(&(kind, author)) {
                Some(set) => Box::new(set.iter()),
                None => Box::new(iter::empty()),
            },
            (None, Some(author)) => match self.author_index.get(&author) {
                Some(set) => Box::new(set.iter()),
                None => Box::new(iter::empty()),
            },
            _ => Box::new(self.events.iter()),
        }
    }

    /// Query matching events, newest first, honoring the filter limit
    pub fn query(&self, filter: Filter) -> Vec<Event> {
        if let (Some(since), Some(until)) = (filter.since, filter.until) {
            if since > until {
                return Vec::new();
            }
        }

        let limit: Option<usize> = filter.limit;
        let mut out: Vec<Event> = Vec::new();

        for event in self.plan(&filter) {
            if filter.match_event(event) {
                out.push(event.as_ref().clone());
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }

        out
    }

    /// Count matching events, ignoring the filter limit
    pub fn count(&self, filter: Filter) -> usize {
        if let (Some(since), Some(until)) = (filter.since, filter.until) {
            if since > until {
                return 0;
            }
        }

        self.plan(&filter)
            .filter(|event| filter.match_event(event))
            .count()
    }
}
