// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Client messages

use serde_json::{json, Value};

use super::{MessageHandleError, SubscriptionId};
use crate::event::Event;
use crate::filter::Filter;

/// Messages sent by clients, received by relays
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Publish an event
    Event(Box<Event>),
    /// Open or replace a subscription
    Req {
        /// Subscription id
        subscription_id: SubscriptionId,
        /// Filters
        filters: Vec<Filter>,
    },
    /// Count events matching filters (NIP45)
    Count {
        /// Subscription id
        subscription_id: SubscriptionId,
        /// Filters
        filters: Vec<Filter>,
    },
    /// Close a subscription
    Close(SubscriptionId),
    /// Authenticate (NIP42)
    Auth(Box<Event>),
}

impl ClientMessage {
    /// Compose an `EVENT` message
    #[inline]
    pub fn event(event: Event) -> Self {
        Self::Event(Box::new(event))
    }

    /// Compose a `REQ` message
    #[inline]
    pub fn req(subscription_id: SubscriptionId, filters: Vec<Filter>) -> Self {
        Self::Req {
            subscription_id,
            filters,
        }
    }

    /// Compose a `COUNT` message
    #[inline]
    pub fn count(subscription_id: SubscriptionId, filters: Vec<Filter>) -> Self {
        Self::Count {
            subscription_id,
            filters,
        }
    }

    /// Compose a `CLOSE` message
    #[inline]
    pub fn close(subscription_id: SubscriptionId) -> Self {
        Self::Close(subscription_id)
    }

    /// Compose an `AUTH` message
    #[inline]
    pub fn auth(event: Event) -> Self {
        Self::Auth(Box::new(event))
    }

    /// Serialize as JSON array
    pub fn as_json(&self) -> String {
        self.as_value().to_string()
    }

    fn as_value(&self) -> Value {
        match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut json = json!(["REQ", subscription_id]);
                let mut filters = json!(filters);
                if let (Some(json), Some(filters)) =
                    (json.as_array_mut(), filters.as_array_mut())
                {
                    json.append(filters);
                }
                json
            }
            Self::Count {
                subscription_id,
                filters,
            } => {
                let mut json = json!(["COUNT", subscription_id]);
                let mut filters = json!(filters);
                if let (Some(json), Some(filters)) =
                    (json.as_array_mut(), filters.as_array_mut())
                {
                    json.append(filters);
                }
                json
            }
            Self::Close(subscription_id) => json!(["CLOSE", subscription_id]),
            Self::Auth(event) => json!(["AUTH", event]),
        }
    }

    /// Deserialize from a JSON array
    ///
    /// The first array element selects the command.
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
            // ["EVENT", <event JSON>]
            "EVENT" => {
                if v.len() != 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let event: Event = serde_json::from_value(v[1].clone())?;
                Ok(Self::event(event))
            }
            // ["REQ", <subscription id>, <filter JSON>...]
            "REQ" => {
                if v.len() < 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                let filters: Vec<Filter> = serde_json::from_value(Value::Array(v[2..].to_vec()))?;
                Ok(Self::req(subscription_id, filters))
            }
            // ["COUNT", <subscription id>, <filter JSON>...]
            "COUNT" => {
                if v.len() < 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                let filters: Vec<Filter> = serde_json::from_value(Value::Array(v[2..].to_vec()))?;
                Ok(Self::count(subscription_id, filters))
            }
            // ["CLOSE", <subscription id>]
            "CLOSE" => {
                if v.len() != 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let subscription_id: SubscriptionId = serde_json::from_value(v[1].clone())?;
                Ok(Self::close(subscription_id))
            }
            // ["AUTH", <signed event JSON>]
            "AUTH" => {
                if v.len() != 2 {
                    return Err(MessageHandleError::InvalidMessageFormat);
                }
                let event: Event = serde_json::from_value(v[1].clone())?;
                Ok(Self::auth(event))
            }
            verb => Err(MessageHandleError::UnknownCommand(verb.to_string())),
        }
    }
}
