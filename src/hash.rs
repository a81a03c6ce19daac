//! Salted one-way identity hashing
//!
//! Phone numbers and other contact identifiers are never emitted raw. They
//! pass through a keyed HMAC-SHA256 seeded with a per-installation salt, so
//! keys are stable within one installation (groupable) but unlinkable across
//! installations.
//!
//! Numeric identifiers are reduced to their last nine decimal digits before
//! hashing, which strips international and area-code prefixes: +31612345678
//! and 0612345678 normalize to the same key.

use crate::error::{ArgusError, Result};
use crate::store::KeyValueStore;
use crate::types::AnonymizedKey;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use sha2::Sha256;
use std::sync::Arc;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

/// Store key holding the hex-encoded installation salt
const SALT_KEY: &str = "hash.salt";

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// Modulus keeping only the last nine decimal digits of a phone number
const PHONE_SUFFIX_MODULUS: i64 = 1_000_000_000;

/// Optional sign followed by digits: the identifier is a phone number
static IS_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("valid regex"));

/// Keyed identity hasher bound to the installation salt
pub struct IdentityHasher {
    salt: Vec<u8>,
}

/// Outcome of hashing one raw identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashedTarget {
    /// Absent when the identifier was a negative-number sentinel
    pub key: Option<AnonymizedKey>,
    /// True when the identifier did not parse as a phone number
    pub is_non_numeric: bool,
}

impl IdentityHasher {
    /// Load the installation salt, generating and persisting one on first use
    ///
    /// Persistence happens before any hash is computed; if it fails, no key
    /// is ever derived from an unpersisted salt.
    pub fn from_store(store: &Arc<dyn KeyValueStore>) -> Result<Self> {
        let salt = match store.get(SALT_KEY)? {
            Some(hex) => decode_hex(&hex)
                .ok_or_else(|| ArgusError::Hash(format!("Malformed salt at {}", SALT_KEY)))?,
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                store.set(SALT_KEY, &encode_hex(&salt))?;
                info!("Generated new installation salt");
                salt
            }
        };
        Ok(Self { salt })
    }

    /// Construct from an explicit salt, for tests
    #[cfg(test)]
    pub(crate) fn with_salt(salt: Vec<u8>) -> Self {
        Self { salt }
    }

    /// Anonymize a raw call/message target
    ///
    /// Non-numeric targets (e.g. "Dropbox") are hashed as opaque text.
    /// Negative numbers are the platform sentinel for unknown/hidden callers
    /// and produce no key at all. Non-negative numbers keep only their last
    /// nine digits before hashing.
    pub fn hash_target(&self, raw: &str) -> Result<HashedTarget> {
        if !IS_NUMBER.is_match(raw) {
            return Ok(HashedTarget {
                key: Some(self.hash_bytes(raw.as_bytes())?),
                is_non_numeric: true,
            });
        }

        // Digit strings too long for i64 cannot be real phone numbers;
        // treat them as opaque text
        let number: i64 = match raw.parse() {
            Ok(n) => n,
            Err(_) => {
                return Ok(HashedTarget {
                    key: Some(self.hash_bytes(raw.as_bytes())?),
                    is_non_numeric: true,
                })
            }
        };

        if number < 0 {
            return Ok(HashedTarget {
                key: None,
                is_non_numeric: false,
            });
        }

        let suffix = (number % PHONE_SUFFIX_MODULUS) as u32;
        Ok(HashedTarget {
            key: Some(self.hash_bytes(&suffix.to_be_bytes())?),
            is_non_numeric: false,
        })
    }

    fn hash_bytes(&self, data: &[u8]) -> Result<AnonymizedKey> {
        let mut mac = HmacSha256::new_from_slice(&self.salt)
            .map_err(|e| ArgusError::Hash(format!("Invalid HMAC key: {}", e)))?;
        mac.update(data);
        let bytes: [u8; 32] = mac.finalize().into_bytes().into();
        Ok(AnonymizedKey::from_bytes(bytes))
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|chunk| {
            std::str::from_utf8(chunk)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
        })
        .collect()
}
