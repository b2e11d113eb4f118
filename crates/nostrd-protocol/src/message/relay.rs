// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Relay messages

use std::fmt;

use serde_json::{json, Value};

use super::{MessageHandleError, SubscriptionId};
use crate::event::id::EventId;
use crate::event::Event;

/// Machine-readable prefixes for `OK` and `CLOSED` messages
///
/// <https://github.com/nostr-protocol/nips/blob/master/01.md>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineReadablePrefix {
    /// `duplicate`
    Duplicate,
    /// `pow`
    Pow,
    /// `blocked`
    Blocked,
    /// `rate-limited`
    RateLimited,
    /// `invalid`
    Invalid,
    /// `auth-required`
    AuthRequired,
    /// `restricted`
    Restricted,
    /// `error`
    Error,
}

impl fmt::Display for MachineReadablePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "duplicate"),
            Self::Pow => write!(f, "pow"),
            Self::Blocked => write!(f, "blocked"),
            Self::RateLimited => write!(f, "rate-limited"),
            Self::Invalid => write!(f, "invalid"),
            Self::AuthRequired => write!(f, "auth-required"),
            Self::Restricted => write!(f, "restricted"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Messages sent by relays, received by clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// An event matching a subscription
    Event {
        /// Subscription id
        subscription_id: SubscriptionId,
        /// Event
        event: Box<Event>,
    },
    /// Acceptance or denial of an `EVENT` message
    Ok {
        /// Event id
        event_id: EventId,
        /// Status
        status: bool,
        /// Message, optionally prefixed (see [`MachineReadablePrefix`])
        message: String,
    },
    /// End of stored events for a subscription
    EndOfStoredEvents(SubscriptionId),
    /// Server-initiated subscription termination
    Closed {
        /// Subscription id
        subscription_id: SubscriptionId,
        /// Reason, optionally prefixed (see [`MachineReadablePrefix`])
        message: String,
    },
    /// Human-readable notice
    Notice(String),
    /// Authentication challenge (NIP42)
    Auth {
        /// Challenge
        challenge: String,
    },
    /// Count response (NIP45)
    Count {
        /// Subscription id
        subscription_id: SubscriptionId,
        /// Count of events matching the filters
        count: usize,
    },
}

impl RelayMessage {
    /// Compose an `EVENT` message
    #[inline]
    pub fn event(subscription_id: SubscriptionId, event: Event) -> Self {
        Self::Event {
            subscription_id,
            event: Box::new(event),
        }
    }

    /// Compose an `OK` message
    #[inline]
    pub fn ok<S>(event_id: EventId, status: bool, message: S) -> Self
    where
        S: Into<String>,
    {
        Self::Ok {
            event_id,
            status,
            message: message.into(),
        }
    }

    /// Compose an `EOSE` message
    #[inline]
    pub fn eose(subscription_id: SubscriptionId) -> Self {
        Self::EndOfStoredEvents(subscription_id)
    }

    /// Compose a `CLOSED` message
    #[inline]
    pub fn closed<S>(subscription_id: SubscriptionId, message: S) -> Self
    where
        S: Into<String>,
    {
        Self::Closed {
            subscription_id,
            message: message.into(),
        }
    }

    /// Compose a `NOTICE` message
    #[inline]
    pub fn notice<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::Notice(message.into())
    }

    /// Compose an `AUTH` challenge message
    #[inline]
    pub fn auth<S>(challenge: S) -> Self
    where
        S: Into<String>,
    {
        Self::Auth {
            challenge: challenge.into(),
        }
    }

    /// Compose a `COUNT` response
    #[inline]
    pub fn count(subscription_id: SubscriptionId, count: usize) -> Self {
        Self::Count {
            subscription_id,
            count,
        }
    }

    /// Serialize as JSON array
    pub fn as_json(&self) -> String {
        match self {
            Self::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]).to_string(),
            Self::Ok {
                event_id,
                status,
                message,
            } => json!(["OK", event_id, status, message]).to_string(),
            Self::EndOfStoredEvents(subscription_id) => {
                json!(["EOSE", subscription_id]).to_string()
            }
            Self::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]).to_string(),
            Self::Notice(message) => json!(["NOTICE", message]).to_string(),
            Self::Auth { challenge } => json!(["AUTH", challenge]).to_string(),
            Self::Count {
                subscription_id,
                count,
            } => json!(["COUNT", subscription_id, {"count": count}]).to_string(),
        }
    }

    /// Deserialize from a JSON array
    pub fn from_json<T>(json: T) -> Result<Self, MessageHandleError>
    where
        T: AsRef<[u8]>,
    {
        let v: Vec<Value> = serde_json::from_slice(json.as_ref())?;

        if v.is_empty() {
            return Err(MessageHandleError::InvalidMessageFormat);
        }

        let verb: &str = v[0]
            .as_str()
            .ok_or(MessageHandleError::InvalidMessageFormat)?;

        match verb {
            // ["EVENT", <subscription id>, <event JSON>]
            "EVENT" => {
                if v.len() != 3 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                let event: Event = serde_json::from_value(v[2].clone())?;
                Ok(Self::event(subscription_id, event))
            }
            // ["OK", <event id>, <true|false>, <message>]
            "OK" => {
                if v.len() != 4 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let event_id: EventId = serde_json::from_value(v[1].clone())?;
                let status: bool = serde_json::from_value(v[2].clone())?;
                let message: String = serde_json::from_value(v[3].clone())?;
                Ok(Self::Ok {
                    event_id,
                    status,
                    message,
                })
            }
            // ["EOSE", <subscription id>]
            "EOSE" => {
                if v.len() != 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                Ok(Self::eose(subscription_id))
            }
            // ["CLOSED", <subscription id>, <message>]
            "CLOSED" => {
                if v.len() != 3 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                let message: String = serde_json::from_value(v[2].clone())?;
                Ok(Self::Closed {
                    subscription_id,
                    message,
                })
            }
            // ["NOTICE", <message>]
            "NOTICE" => {
                if v.len() != 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let message: String = serde_json::from_value(v[1].clone())?;
                Ok(Self::Notice(message))
            }
            // ["AUTH", <challenge>]
            "AUTH" => {
                if v.len() != 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let challenge: String = serde_json::from_value(v[1].clone())?;
                Ok(Self::Auth { challenge })
            }
            // ["COUNT", <subscription id>, {"count": <n>}]
            "COUNT" => {
                if v.len() != 3 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                let count: usize = v[2]
                    .get("count")
                    .and_then(|c| c.as_u64())
                    .ok_or(MessageHandleError::InvalidMessageFormat)?
                    as usize;
                Ok(Self::count(subscription_id, count))
            }
            _ => Err(MessageHandleError::InvalidMessageFormat),
        }
    }
}
