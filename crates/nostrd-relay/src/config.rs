// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Configuration

use std::net::SocketAddr;
use std::time::Duration;

use clap::{ArgAction, Args, Parser};
use nostrd_protocol::nips::nip11::{Limitation, RelayInformationDocument, SupportedNip};
use nostrd_protocol::PublicKey;

use crate::error::Error;

/// nostrd - Nostr relay daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "nostrd")]
#[command(about = "Nostr relay daemon", version)]
pub struct Config {
    /// Bind address for WebSocket/HTTP
    #[arg(long, env = "NOSTRD_WS_ADDR", default_value = "127.0.0.1:7777")]
    pub ws_addr: SocketAddr,

    /// Canonical relay URL, used for NIP42 auth validation
    #[arg(long, env = "NOSTRD_PUBLIC_URL", default_value = "ws://127.0.0.1:7777")]
    pub public_url: String,

    /// Relay name, returned in the NIP11 document
    #[arg(long, default_value = "nostrd")]
    pub name: String,

    /// Relay description
    #[arg(long)]
    pub description: Option<String>,

    /// Relay contact
    #[arg(long)]
    pub contact: Option<String>,

    /// Relay owner public key
    #[arg(long)]
    pub relay_pubkey: Option<PublicKey>,

    /// Relay icon URL
    #[arg(long)]
    pub icon: Option<String>,

    /// Supported NIPs advertised in the NIP11 document
    #[arg(long, value_delimiter = ',', default_values_t = default_supported_nips())]
    pub supported_nips: Vec<SupportedNip>,

    /// Maximum length of an incoming WebSocket message, in bytes
    #[arg(long, default_value_t = 524_288)]
    pub max_message_length: usize,

    /// Maximum length of an event content field, in bytes
    #[arg(long, default_value_t = 65_536)]
    pub max_content_length: usize,

    /// Maximum number of tags per event
    #[arg(long, default_value_t = 2_000)]
    pub max_event_tags: usize,

    /// Maximum length of a subscription id
    #[arg(long, default_value_t = 64)]
    pub max_subid_length: usize,

    /// Maximum number of active subscriptions per connection
    #[arg(long, default_value_t = 32)]
    pub max_subscriptions: usize,

    /// Maximum number of filters per REQ
    #[arg(long, default_value_t = 10)]
    pub max_filters_per_req: usize,

    /// Clamp for the `limit` field of filters
    #[arg(long, default_value_t = 5_000)]
    pub max_limit: usize,

    /// Maximum number of concurrent connections
    #[arg(long, default_value_t = 1_024)]
    pub max_connections: usize,

    /// Reject events with `created_at` older than this many seconds
    #[arg(long, default_value_t = 94_608_000)]
    pub created_at_floor: u64,

    /// Reject events with `created_at` further in the future than this many seconds
    #[arg(long, default_value_t = 900)]
    pub created_at_skew: u64,

    /// Require at least this POW difficulty on event ids (NIP13)
    #[arg(long)]
    pub min_pow_difficulty: Option<u8>,

    /// Socket write deadline, in seconds
    #[arg(long, default_value_t = 10)]
    pub write_timeout: u64,

    /// Idle connection deadline, in seconds
    #[arg(long, default_value_t = 600)]
    pub idle_timeout: u64,

    /// Graceful shutdown drain deadline, in seconds
    #[arg(long, default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Number of event processor workers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Event processor queue size, per worker
    #[arg(long, default_value_t = 1_024)]
    pub queue_size: usize,

    /// Outbound frame queue size, per connection
    #[arg(long, default_value_t = 256)]
    pub send_queue_size: usize,

    /// Consecutive dropped frames before a slow consumer is disconnected
    #[arg(long, default_value_t = 64)]
    pub slow_consumer_threshold: u32,

    /// Kind number of the "request to vanish" event (NIP62)
    #[arg(long, default_value_t = 62)]
    pub vanish_kind: u16,

    /// Kind number of gift wrap events purged by a vanish (NIP59)
    #[arg(long, default_value_t = 1_059)]
    pub gift_wrap_kind: u16,

    /// Require NIP42 auth for COUNT requests
    #[arg(long, action = ArgAction::SetTrue)]
    pub count_requires_auth: bool,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    /// Pubkeys whose events are always rejected
    #[arg(long = "blacklist", value_delimiter = ',')]
    pub blacklist_pubkeys: Vec<PublicKey>,

    /// When non-empty, only these pubkeys may publish
    #[arg(long = "whitelist", value_delimiter = ',')]
    pub whitelist_pubkeys: Vec<PublicKey>,
}

/// Rate limiter knobs
#[derive(Args, Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained events per second accepted per key
    #[arg(long = "rate-limit-max-events-per-second", default_value_t = 25)]
    pub max_events_per_second: u32,

    /// Sustained REQ/COUNT frames per second accepted per key
    #[arg(long = "rate-limit-max-requests-per-second", default_value_t = 50)]
    pub max_requests_per_second: u32,

    /// Token bucket capacity
    #[arg(long = "rate-limit-burst", default_value_t = 50)]
    pub burst: u32,

    /// Denials within the violation window before a ban
    #[arg(long = "rate-limit-ban-threshold", default_value_t = 100)]
    pub ban_threshold: u32,

    /// Ban duration, in seconds
    #[arg(long = "rate-limit-ban-duration", default_value_t = 60)]
    pub ban_duration: u64,

    /// Ceiling for progressive ban duration, in seconds
    #[arg(long = "rate-limit-max-ban-duration", default_value_t = 3_600)]
    pub max_ban_duration: u64,

    /// Double the ban duration on repeated bans
    #[arg(long = "rate-limit-progressive", action = ArgAction::Set, default_value_t = true)]
    pub progressive: bool,
}

fn default_supported_nips() -> Vec<SupportedNip> {
    [1, 9, 11, 13, 40, 42, 45, 50, 56, 59, 62, 70]
        .into_iter()
        .map(SupportedNip::Number)
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["nostrd"])
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Error> {
        if !self.public_url.starts_with("ws://") && !self.public_url.starts_with("wss://") {
            return Err(Error::Config(format!(
                "public_url must be a ws:// or wss:// url, got '{}'",
                self.public_url
            )));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be greater than zero".into()));
        }
        if self.queue_size == 0 || self.send_queue_size == 0 {
            return Err(Error::Config("queue sizes must be greater than zero".into()));
        }
        if self.max_limit == 0 || self.max_subscriptions == 0 {
            return Err(Error::Config("limits must be greater than zero".into()));
        }
        if self.rate_limit.max_events_per_second == 0
            || self.rate_limit.max_requests_per_second == 0
        {
            return Err(Error::Config("rate limits must be greater than zero".into()));
        }
        Ok(())
    }

    /// Socket write deadline
    #[inline]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }

    /// Idle connection deadline
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Graceful shutdown drain deadline
    #[inline]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    /// Build the NIP11 relay information document
    pub fn relay_information(&self) -> RelayInformationDocument {
        RelayInformationDocument {
            name: Some(self.name.clone()),
            description: self.description.clone(),
            pubkey: self.relay_pubkey.map(|pk| pk.to_hex()),
            contact: self.contact.clone(),
            supported_nips: self.supported_nips.clone(),
            software: Some(env!("CARGO_PKG_REPOSITORY").to_string()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            limitation: Some(Limitation {
                max_message_length: Some(self.max_message_length as i32),
                max_subscriptions: Some(self.max_subscriptions as i32),
                max_limit: Some(self.max_limit as i32),
                max_subid_length: Some(self.max_subid_length as i32),
                max_event_tags: Some(self.max_event_tags as i32),
                max_content_length: Some(self.max_content_length as i32),
                min_pow_difficulty: self.min_pow_difficulty.map(|d| d as i32),
                auth_required: Some(false),
                payment_required: Some(false),
                restricted_writes: Some(!self.whitelist_pubkeys.is_empty()),
                ..Default::default()
            }),
            icon: self.icon.clone(),
            banner: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vanish_kind, 62);
        assert_eq!(config.gift_wrap_kind, 1_059);
        assert!(!config.count_requires_auth);
        assert!(config.rate_limit.progressive);
    }

    #[test]
    fn test_invalid_public_url() {
        let mut config = Config::default();
        config.public_url = "https://relay.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relay_information_limits() {
        let config = Config::default();
        let info = config.relay_information();
        let limitation = info.limitation.unwrap();
        assert_eq!(limitation.max_subscriptions, Some(32));
        assert_eq!(limitation.restricted_writes, Some(false));
        assert!(info
            .supported_nips
            .contains(&SupportedNip::Number(62)));
    }

    #[test]
    fn test_env_style_overrides() {
        let config = Config::parse_from([
            "nostrd",
            "--ws-addr",
            "0.0.0.0:8080",
            "--vanish-kind",
            "30062",
            "--rate-limit-burst",
            "10",
        ]);
        assert_eq!(config.ws_addr.port(), 8080);
        assert_eq!(config.vanish_kind, 30_062);
        assert_eq!(config.rate_limit.burst, 10);
    }
}
