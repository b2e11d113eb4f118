// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Utilities

use once_cell::sync::Lazy;
use secp256k1::{All, Secp256k1};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Global secp256k1 context, randomized at first use
pub static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(|| {
    let mut ctx = Secp256k1::new();
    let mut rng = secp256k1::rand::thread_rng();
    ctx.randomize(&mut rng);
    ctx
});

/// JSON (de)serialization for wire types
pub trait JsonUtil: Sized + Serialize + DeserializeOwned {
    /// Error
    type Err: From<serde_json::Error>;

    /// Deserialize from JSON
    fn from_json<T>(json: T) -> Result<Self, Self::Err>
    where
        T: AsRef<[u8]>,
    {
        Ok(serde_json::from_slice(json.as_ref())?)
    }

    /// Serialize to JSON
    fn as_json(&self) -> String {
        // Serialization of an in-memory value can't fail here
        serde_json::to_string(self).unwrap_or_default()
    }
}
