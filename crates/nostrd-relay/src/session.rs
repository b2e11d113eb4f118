// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Connection session state

use std::collections::{HashMap, HashSet};

use nostrd_protocol::{Filter, PublicKey, SubscriptionId};
use rand::RngCore;

/// Per-connection session state
///
/// Owned by the connection reader task; never shared.
#[derive(Debug)]
pub struct Session {
    challenge: String,
    authed_pubkeys: HashSet<PublicKey>,
    /// Active subscriptions, mirrored in the dispatcher registry
    pub subscriptions: HashMap<SubscriptionId, Vec<Filter>>,
}

impl Session {
    /// New session with a fresh auth challenge
    pub fn new() -> Self {
        Self {
            challenge: generate_challenge(),
            authed_pubkeys: HashSet::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Get the NIP42 challenge issued to this connection
    #[inline]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Check if the pubkey has completed NIP42 auth on this connection
    #[inline]
    pub fn is_authed(&self, public_key: &PublicKey) -> bool {
        self.authed_pubkeys.contains(public_key)
    }

    /// Mark the pubkey as authenticated
    #[inline]
    pub fn authenticate(&mut self, public_key: PublicKey) {
        self.authed_pubkeys.insert(public_key);
    }

    /// Check if any pubkey has authenticated on this connection
    #[inline]
    pub fn has_authed(&self) -> bool {
        !self.authed_pubkeys.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// 32 random bytes, hex encoded
fn generate_challenge() -> String {
    let mut bytes: [u8; 32] = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use nostrd_protocol::Keys;

    use super::*;

    #[test]
    fn test_challenge_is_unique_and_hex() {
        let a = Session::new();
        let b = Session::new();
        assert_eq!(a.challenge().len(), 64);
        assert_ne!(a.challenge(), b.challenge());
        assert!(a.challenge().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_authed_pubkeys() {
        let keys = Keys::generate();
        let mut session = Session::new();
        assert!(!session.is_authed(&keys.public_key()));
        session.authenticate(keys.public_key());
        assert!(session.is_authed(&keys.public_key()));
    }
}
