//! Cache key derivation.

use crate::error::ErrorContext;
use crate::types::RequestDescriptor;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex-encoded SHA-256 digest identifying one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub model: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        self.hash.get(..8).unwrap_or(&self.hash)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Canonical form hashed into a key. Field order is fixed by the struct,
/// parameter order by the `BTreeMap`.
#[derive(Serialize)]
struct Canonical<'a> {
    payload: &'a str,
    parameters: &'a BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<&'a str>,
}

/// Derives [`CacheKey`]s from [`RequestDescriptor`]s.
///
/// Pure: the same descriptor (and salt) always yields the same key.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Mix a namespace into every key, e.g. to separate environments sharing a disk cache.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn derive(&self, descriptor: &RequestDescriptor) -> Result<CacheKey> {
        if descriptor.payload().trim().is_empty() {
            return Err(Error::invalid_descriptor_with_context(
                "payload must not be empty",
                ErrorContext::new()
                    .with_field_path("descriptor.payload")
                    .with_source("key_deriver"),
            ));
        }
        if let Some((name, reason)) = descriptor.rejected_param() {
            return Err(Error::invalid_descriptor_with_context(
                "parameter is not serializable",
                ErrorContext::new()
                    .with_field_path(format!("descriptor.parameters.{}", name))
                    .with_details(reason)
                    .with_source("key_deriver"),
            ));
        }
        if descriptor.parameters().keys().any(|k| k.is_empty()) {
            return Err(Error::invalid_descriptor_with_context(
                "parameter names must not be empty",
                ErrorContext::new()
                    .with_field_path("descriptor.parameters")
                    .with_source("key_deriver"),
            ));
        }

        let canonical = serde_json::to_vec(&Canonical {
            payload: descriptor.payload(),
            parameters: descriptor.parameters(),
            salt: self.salt.as_deref(),
        })
        .map_err(|e| {
            Error::invalid_descriptor_with_context(
                "descriptor could not be serialized",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("key_deriver"),
            )
        })?;

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        let mut key = CacheKey::new(hash);
        if let Some(m) = descriptor.model() {
            key = key.with_model(m);
        }
        Ok(key)
    }
}
