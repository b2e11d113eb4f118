// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Rate limiter
//!
//! Per-key token buckets with burst capacity and progressive bans. Keys are
//! opaque strings (`conn:<remote>`, `pub:<pubkey>`, ...); state is sharded
//! so concurrent `allow` calls contend only within a shard.

use std::cmp;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

const SHARDS: usize = 16;
const VIOLATION_WINDOW: Duration = Duration::from_secs(60);

/// Rate limit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allowed,
    /// The bucket is empty
    Limited,
    /// The key is banned
    Banned,
}

impl Decision {
    /// Check if the request may proceed
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug)]
struct KeyState {
    tokens: f64,
    last_refill: Instant,
    violations: u32,
    last_violation: Option<Instant>,
    banned_until: Option<Instant>,
    ban_count: u32,
    last_seen: Instant,
}

impl KeyState {
    fn new(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst.max(1)),
            last_refill: now,
            violations: 0,
            last_violation: None,
            banned_until: None,
            ban_count: 0,
            last_seen: now,
        }
    }
}

/// Sharded token-bucket rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, KeyState>>>,
    burst: u32,
    ban_threshold: u32,
    ban_duration: Duration,
    max_ban_duration: Duration,
    progressive: bool,
}

impl RateLimiter {
    /// Build a limiter from configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            burst: config.burst,
            ban_threshold: config.ban_threshold.max(1),
            ban_duration: Duration::from_secs(config.ban_duration),
            max_ban_duration: Duration::from_secs(config.max_ban_duration),
            progressive: config.progressive,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, KeyState>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    /// Take one token for `key` from a bucket refilled at `max_per_second`
    pub fn allow(&self, key: &str, max_per_second: u32) -> Decision {
        let now: Instant = Instant::now();
        let mut shard = self.shard(key).lock().unwrap_or_else(|e| e.into_inner());
        let state: &mut KeyState = shard
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(self.burst, now));
        state.last_seen = now;

        // Active ban
        if let Some(until) = state.banned_until {
            if now < until {
                return Decision::Banned;
            }
            state.banned_until = None;
            state.violations = 0;
        }

        // Refill
        let elapsed: f64 = now.duration_since(state.last_refill).as_secs_f64();
        let capacity: f64 = f64::from(self.burst.max(1));
        state.tokens = (state.tokens + elapsed * f64::from(max_per_second)).min(capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Decision::Allowed;
        }

        // Denied: count violations within the window
        match state.last_violation {
            Some(last) if now.duration_since(last) <= VIOLATION_WINDOW => {
                state.violations += 1;
            }
            _ => state.violations = 1,
        }
        state.last_violation = Some(now);

        if state.violations >= self.ban_threshold {
            let duration: Duration = if self.progressive {
                let factor: u32 = 1u32 << cmp::min(state.ban_count, 16);
                cmp::min(self.ban_duration.saturating_mul(factor), self.max_ban_duration)
            } else {
                self.ban_duration
            };
            state.banned_until = Some(now + duration);
            state.ban_count += 1;
            state.violations = 0;
            tracing::debug!(key, ?duration, "Rate limit key banned.");
            return Decision::Banned;
        }

        Decision::Limited
    }

    /// Remove entries idle for longer than `max_idle`
    ///
    /// Returns the number of removed keys.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now: Instant = Instant::now();
        let mut removed: usize = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            let before: usize = shard.len();
            shard.retain(|_, state| now.duration_since(state.last_seen) <= max_idle);
            removed += before - shard.len();
        }
        removed
    }
}
