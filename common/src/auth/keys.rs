//! Remote key-set resolution with an in-memory cache.
//!
//! ```text
//! token header kid → cache hit? return key
//!                  → miss: GET key set, parse every entry, cache by kid
//!                  → return match or KeyNotFound
//! ```
//!
//! Fetch failures are never cached, so the next miss fetches again. Entries
//! stay cached until [`KeyResolver::invalidate`], [`KeyResolver::clear`] or
//! process restart. Identity-provider key sets rotate rarely, so the cache is
//! not bounded.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;

use super::error::KeyResolveError;

/// A public verification key published by the identity provider.
#[derive(Clone)]
pub struct SigningKey {
    pub key_id: String,
    /// Algorithm the key set declares for this key, if any.
    pub algorithm: Option<Algorithm>,
    pub decoding_key: DecodingKey,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RawKeySet {
    keys: Vec<serde_json::Value>,
}

/// Resolves key identifiers against a remote JSON Web Key Set.
pub struct KeyResolver {
    jwks_url: String,
    http: reqwest::Client,
    cache: DashMap<String, Arc<SigningKey>>,
}

impl KeyResolver {
    /// Build a resolver whose fetches give up after `fetch_timeout`.
    pub fn new(jwks_url: impl Into<String>, fetch_timeout: Duration) -> Result<Self, KeyResolveError> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| KeyResolveError::KeyFetchFailed(format!("http client: {}", e)))?;

        Ok(Self::with_client(jwks_url, http))
    }

    pub fn with_client(jwks_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            http,
            cache: DashMap::new(),
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Return the key for `kid`, fetching the key set on a cache miss.
    pub async fn resolve(&self, kid: &str) -> Result<Arc<SigningKey>, KeyResolveError> {
        if let Some(entry) = self.cache.get(kid) {
            return Ok(Arc::clone(entry.value()));
        }

        tracing::debug!("Signing key {} not cached, fetching {}", kid, self.jwks_url);
        let keys = self.fetch_key_set().await?;

        for key in keys {
            // Whole entries only; concurrent fetches overwrite with identical keys
            self.cache.insert(key.key_id.clone(), Arc::new(key));
        }

        match self.cache.get(kid) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None => {
                tracing::warn!("Signing key {} absent from fetched key set", kid);
                Err(KeyResolveError::KeyNotFound { kid: kid.to_string() })
            },
        }
    }

    /// Drop one cached key so the next lookup refetches.
    pub fn invalidate(&self, kid: &str) -> bool {
        self.cache.remove(kid).is_some()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn fetch_key_set(&self) -> Result<Vec<SigningKey>, KeyResolveError> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Key set request to {} failed: {}", self.jwks_url, e);
                KeyResolveError::KeyFetchFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("Key set endpoint {} returned {}", self.jwks_url, status);
            return Err(KeyResolveError::KeyFetchFailed(format!("status {}", status)));
        }

        let raw: RawKeySet = response.json().await.map_err(|e| {
            tracing::error!("Key set from {} is not valid JSON: {}", self.jwks_url, e);
            KeyResolveError::KeyFetchFailed(e.to_string())
        })?;

        Ok(parse_key_set(raw))
    }
}

fn parse_key_set(raw: RawKeySet) -> Vec<SigningKey> {
    raw.keys
        .into_iter()
        .filter_map(|entry| match parse_key(&entry) {
            Ok(key) => Some(key),
            Err(reason) => {
                tracing::debug!("Skipping key set entry: {}", reason);
                None
            },
        })
        .collect()
}

fn parse_key(entry: &serde_json::Value) -> Result<SigningKey, String> {
    let key_id = entry
        .get("kid")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "entry has no kid".to_string())?
        .to_string();

    let algorithm = entry
        .get("alg")
        .and_then(|v| v.as_str())
        .and_then(|alg| Algorithm::from_str(alg).ok());

    let jwk: Jwk = serde_json::from_value(entry.clone())
        .map_err(|e| format!("{}: unsupported key: {}", key_id, e))?;
    let decoding_key = DecodingKey::from_jwk(&jwk)
        .map_err(|e| format!("{}: unusable key material: {}", key_id, e))?;

    Ok(SigningKey {
        key_id,
        algorithm,
        decoding_key,
    })
}
