//! Key-Share Client — ships minute keys to the secret-sharing service.
//!
//! The share service splits each key across three backend nodes; this side
//! only POSTs `{packageUuid, encryptionKey}` to `/store-key`. A small LRU
//! set of already-sent key UUIDs suppresses duplicates (one key serves every
//! batch of its minute). Failures never block an upload — the caller logs
//! them and moves on.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::Deserialize;
use tracing::debug;

/// How many recently-sent key UUIDs to remember.
const SENT_CACHE_SIZE: usize = 16;

/// Key-share client errors.
#[derive(Debug, thiserror::Error)]
pub enum KeyShareError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("share service returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("share service reported failure for key {0}")]
    Rejected(String),
}

/// Result of a store attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKeyOutcome {
    /// Key accepted by the share service
    Stored,
    /// Key UUID was already sent recently — nothing to do
    Duplicate,
}

#[derive(Debug, Deserialize)]
struct StoreKeyResponse {
    success: bool,
    #[serde(default)]
    #[allow(dead_code)]
    collection_id: Option<String>,
}

/// HTTP client for the key-share service.
pub struct KeyShareClient {
    http: reqwest::Client,
    base_url: String,
    sent: Mutex<LruCache<String, ()>>,
}

impl KeyShareClient {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        let capacity = NonZeroUsize::new(SENT_CACHE_SIZE)
            .expect("sent-cache size is a non-zero constant");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            sent: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Ship one minute key to the share service, deduplicating by key UUID.
    pub async fn store_key(
        &self,
        key_uuid: &str,
        raw_key: &[u8; 32],
    ) -> Result<StoreKeyOutcome, KeyShareError> {
        if self.already_sent(key_uuid) {
            debug!(key_uuid = %key_uuid, "Minute key already shipped — skipping");
            return Ok(StoreKeyOutcome::Duplicate);
        }

        let body = serde_json::json!({
            "packageUuid": key_uuid,
            "encryptionKey": hex::encode(raw_key),
        });

        let resp = self
            .http
            .post(format!("{}/store-key", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(KeyShareError::ServerError(resp.status()));
        }

        let parsed: StoreKeyResponse = resp.json().await?;
        if !parsed.success {
            return Err(KeyShareError::Rejected(key_uuid.to_string()));
        }

        self.mark_sent(key_uuid);
        debug!(key_uuid = %key_uuid, "Minute key stored with share service");
        Ok(StoreKeyOutcome::Stored)
    }

    fn already_sent(&self, key_uuid: &str) -> bool {
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.get(key_uuid).is_some()
    }

    fn mark_sent(&self, key_uuid: &str) {
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.put(key_uuid.to_string(), ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_marks_and_detects() {
        let client = KeyShareClient::new("http://127.0.0.1:1");
        assert!(!client.already_sent("enckey-1-a"));
        client.mark_sent("enckey-1-a");
        assert!(client.already_sent("enckey-1-a"));
    }

    #[tokio::test]
    async fn test_duplicate_short_circuits_without_network() {
        // Unroutable base URL: reaching the network would error, so a clean
        // Duplicate return proves the LRU check ran first.
        let client = KeyShareClient::new("http://127.0.0.1:1");
        client.mark_sent("enckey-1-a");
        let outcome = client.store_key("enckey-1-a", &[0u8; 32]).await.unwrap();
        assert_eq!(outcome, StoreKeyOutcome::Duplicate);
    }
}
