// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Keys

use std::fmt;
use std::str::FromStr;

use secp256k1::rand::rngs::OsRng;
use secp256k1::{Keypair, SecretKey, XOnlyPublicKey};
use serde::{Deserialize, Deserializer, Serialize};

use crate::util::SECP256K1;

/// Key error
#[derive(Debug, PartialEq)]
pub enum Error {
    /// Hex decode error
    Hex(hex::FromHexError),
    /// Secp256k1 error
    Secp256k1(secp256k1::Error),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex(e) => write!(f, "Hex: {e}"),
            Self::Secp256k1(e) => write!(f, "Secp256k1: {e}"),
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self::Hex(e)
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Self::Secp256k1(e)
    }
}

/// Public key
///
/// 32-bytes lowercase hex-encoded x-only schnorr public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(XOnlyPublicKey);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl PublicKey {
    /// Public key len
    pub const LEN: usize = 32;

    /// Parse from hex string
    pub fn from_hex<S>(hex: S) -> Result<Self, Error>
    where
        S: AsRef<[u8]>,
    {
        let mut bytes: [u8; Self::LEN] = [0u8; Self::LEN];
        hex::decode_to_slice(hex, &mut bytes)?;
        Self::from_slice(&bytes)
    }

    /// Parse from bytes
    #[inline]
    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        Ok(Self(XOnlyPublicKey::from_slice(slice)?))
    }

    /// Get serialized bytes
    #[inline]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        self.0.serialize()
    }

    /// Get as hex string
    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Get a reference to the inner x-only key
    #[inline]
    pub fn xonly(&self) -> &XOnlyPublicKey {
        &self.0
    }
}

impl From<XOnlyPublicKey> for PublicKey {
    fn from(pk: XOnlyPublicKey) -> Self {
        Self(pk)
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    #[inline]
    fn from_str(pk: &str) -> Result<Self, Self::Err> {
        Self::from_hex(pk)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<PublicKey> for String {
    fn from(pk: PublicKey) -> Self {
        pk.to_hex()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pk: String = String::deserialize(deserializer)?;
        Self::from_hex(pk).map_err(serde::de::Error::custom)
    }
}

/// Schnorr key pair
///
/// Used for signing events in tests and tooling; the relay itself only
/// verifies.
#[derive(Debug, Clone)]
pub struct Keys {
    public_key: PublicKey,
    key_pair: Keypair,
}

impl Keys {
    /// Construct from a secret key
    pub fn new(secret_key: SecretKey) -> Self {
        let key_pair: Keypair = Keypair::from_secret_key(&SECP256K1, &secret_key);
        let (public_key, ..) = XOnlyPublicKey::from_keypair(&key_pair);
        Self {
            public_key: PublicKey(public_key),
            key_pair,
        }
    }

    /// Generate random keys
    pub fn generate() -> Self {
        Self::new(SecretKey::new(&mut OsRng))
    }

    /// Parse a secret key from hex
    pub fn parse<S>(secret_key: S) -> Result<Self, Error>
    where
        S: AsRef<str>,
    {
        let mut bytes: [u8; 32] = [0u8; 32];
        hex::decode_to_slice(secret_key.as_ref(), &mut bytes)?;
        Ok(Self::new(SecretKey::from_slice(&bytes)?))
    }

    /// Get the public key
    #[inline]
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Get the key pair
    #[inline]
    pub fn key_pair(&self) -> &Keypair {
        &self.key_pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_hex_round_trip() {
        let hex = "aa4fc8665f5696e33db7e1a572e3b0f5b3d615837b0f362dcb1c8068b098c7b4";
        let pk = PublicKey::from_hex(hex).unwrap();
        assert_eq!(pk.to_hex(), hex);
    }

    #[test]
    fn test_generated_keys_round_trip() {
        let keys = Keys::generate();
        let pk = PublicKey::from_hex(keys.public_key().to_hex()).unwrap();
        assert_eq!(pk, keys.public_key());
    }
}
