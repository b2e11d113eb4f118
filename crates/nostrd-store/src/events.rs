// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Events collection

use std::slice::Iter;
use std::vec::IntoIter;

use nostrd_protocol::{Event, EventId};

/// Query result collection
///
/// Ordered by `created_at` descending, ties broken by id ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Events(Vec<Event>);

impl Events {
    /// Construct from an already-ordered list
    #[inline]
    pub fn new(events: Vec<Event>) -> Self {
        Self(events)
    }

    /// Number of events
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the first (newest) event
    #[inline]
    pub fn first(&self) -> Option<&Event> {
        self.0.first()
    }

    /// Check if an event id is present
    pub fn contains_id(&self, id: &EventId) -> bool {
        self.0.iter().any(|e| &e.id == id)
    }

    /// Iterate events
    #[inline]
    pub fn iter(&self) -> Iter<'_, Event> {
        self.0.iter()
    }

    /// Convert into a `Vec<Event>`
    #[inline]
    pub fn to_vec(self) -> Vec<Event> {
        self.0
    }
}

impl IntoIterator for Events {
    type Item = Event;
    type IntoIter = IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
