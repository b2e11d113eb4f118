// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! NIP42: Authentication of clients to relays
//!
//! <https://github.com/nostr-protocol/nips/blob/master/42.md>

use crate::event::kind::Kind;
use crate::event::Event;
use crate::types::Timestamp;

/// Maximum age (and future skew) of an auth event, in seconds
const MAX_AUTH_EVENT_AGE: u64 = 600;

/// Check if the [`Event`] is a valid authentication for this connection.
///
/// This function checks for:
/// - event kind, that must be [`Kind::AUTHENTICATION`];
/// - `relay` tag, that must match `relay_url` arg;
/// - `challenge` tag, that must match `challenge` arg;
/// - `created_at`, that must be within 10 minutes of the current time.
///
/// The event signature must be verified separately.
pub fn is_valid_auth_event(event: &Event, relay_url: &str, challenge: &str) -> bool {
    // Check event kind
    if event.kind != Kind::AUTHENTICATION {
        return false;
    }

    // Check if it has the "relay" tag
    match event.tags.relay_url() {
        Some(url) => {
            if !relay_url_matches(url, relay_url) {
                return false;
            }
        }
        None => return false,
    }

    // Check if it has the challenge
    match event.tags.challenge() {
        Some(c) => {
            if c != challenge {
                return false;
            }
        }
        None => return false,
    }

    // Check freshness
    let now: Timestamp = Timestamp::now();
    if event.created_at > now + MAX_AUTH_EVENT_AGE
        || event.created_at < now - MAX_AUTH_EVENT_AGE
    {
        return false;
    }

    // Valid
    true
}

/// Compare relay urls, ignoring case and a trailing slash
fn relay_url_matches(a: &str, b: &str) -> bool {
    a.trim_end_matches('/').eq_ignore_ascii_case(b.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::builder::EventBuilder;
    use crate::key::Keys;

    const RELAY_URL: &str = "wss://relay.example.com";
    const CHALLENGE: &str = "1234567890";

    #[test]
    fn test_valid_auth_event() {
        let keys = Keys::generate();
        let event = EventBuilder::auth(CHALLENGE, RELAY_URL)
            .sign_with_keys(&keys)
            .unwrap();
        assert!(is_valid_auth_event(&event, RELAY_URL, CHALLENGE));
        // Trailing slash is not significant
        assert!(is_valid_auth_event(&event, "wss://relay.example.com/", CHALLENGE));
    }

    #[test]
    fn test_invalid_auth_event() {
        let keys = Keys::generate();

        // Wrong challenge
        let event = EventBuilder::auth("abcd", RELAY_URL)
            .sign_with_keys(&keys)
            .unwrap();
        assert!(!is_valid_auth_event(&event, RELAY_URL, CHALLENGE));

        // Wrong relay url
        let event = EventBuilder::auth(CHALLENGE, "wss://other.example.com")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(!is_valid_auth_event(&event, RELAY_URL, CHALLENGE));

        // Wrong kind
        let event = EventBuilder::text_note("abcd")
            .sign_with_keys(&keys)
            .unwrap();
        assert!(!is_valid_auth_event(&event, RELAY_URL, CHALLENGE));

        // Stale timestamp
        let event = EventBuilder::auth(CHALLENGE, RELAY_URL)
            .custom_created_at(Timestamp::now() - 3_600)
            .sign_with_keys(&keys)
            .unwrap();
        assert!(!is_valid_auth_event(&event, RELAY_URL, CHALLENGE));
    }
}
