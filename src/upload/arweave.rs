//! Archive Client — signed submissions to the permanent-storage gateway.
//!
//! The gateway accepts one JSON envelope per upload: owner, signature over
//! the payload and its tag list, the tags, and the payload itself. The
//! response carries the content id, which is surfaced verbatim. The same
//! client answers the restore-time GraphQL query and raw downloads.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::tags::{validate_tags, Tag, TagError};
use super::wallet::{Wallet, WalletError};

/// Archive client errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("tag validation failed: {0}")]
    Validation(#[from] TagError),
    #[error("signing failed: {0}")]
    Wallet(#[from] WalletError),
    #[error("gateway response missing transaction id")]
    MissingId,
}

impl ArchiveError {
    /// Validation and signing problems will not heal on retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Wallet(_))
    }
}

/// A tag name/value filter for the GraphQL transaction query.
#[derive(Debug, Clone)]
pub struct TagFilter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    transactions: GraphQlConnection,
}

#[derive(Debug, Deserialize)]
struct GraphQlConnection {
    edges: Vec<GraphQlEdge>,
}

#[derive(Debug, Deserialize)]
struct GraphQlEdge {
    node: GraphQlNode,
}

#[derive(Debug, Deserialize)]
struct GraphQlNode {
    id: String,
}

/// HTTP client for the archive-network gateway.
#[derive(Clone)]
pub struct ArchiveClient {
    http: reqwest::Client,
    gateway_url: String,
    wallet: Arc<Wallet>,
}

impl ArchiveClient {
    pub fn new(gateway_url: &str, wallet: Arc<Wallet>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            wallet,
        }
    }

    /// Upload a payload with its tag list; returns the gateway's content id.
    pub async fn upload(&self, bytes: &[u8], tags: &[Tag]) -> Result<String, ArchiveError> {
        validate_tags(tags)?;

        let signature = self.wallet.sign(&signing_input(bytes, tags))?;
        let body = serde_json::json!({
            "owner": self.wallet.owner(),
            "signature": URL_SAFE_NO_PAD.encode(&signature),
            "tags": tags,
            "data": STANDARD.encode(bytes),
        });

        let resp = self
            .http
            .post(format!("{}/tx", self.gateway_url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ArchiveError::ServerError(resp.status()));
        }

        let parsed: SubmitResponse = resp.json().await?;
        let tx_id = parsed.id.ok_or(ArchiveError::MissingId)?;
        debug!(tx_id = %tx_id, size = bytes.len(), "Archive upload accepted");
        Ok(tx_id)
    }

    /// Most recent transaction owned by this wallet matching every filter.
    pub async fn query_latest(
        &self,
        filters: &[TagFilter],
    ) -> Result<Option<String>, ArchiveError> {
        let tag_clauses: Vec<String> = filters
            .iter()
            .map(|f| format!(r#"{{ name: "{}", values: ["{}"] }}"#, f.name, f.value))
            .collect();
        let query = format!(
            r#"query {{ transactions(owners: ["{}"], tags: [{}], first: 1, sort: HEIGHT_DESC) {{ edges {{ node {{ id }} }} }} }}"#,
            self.wallet.address(),
            tag_clauses.join(", "),
        );

        let resp = self
            .http
            .post(format!("{}/graphql", self.gateway_url))
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ArchiveError::ServerError(resp.status()));
        }

        let parsed: GraphQlResponse = resp.json().await?;
        Ok(parsed
            .data
            .and_then(|d| d.transactions.edges.into_iter().next())
            .map(|e| e.node.id))
    }

    /// Download a transaction's raw payload.
    pub async fn download(&self, tx_id: &str) -> Result<Vec<u8>, ArchiveError> {
        let resp = self
            .http
            .get(format!("{}/{}", self.gateway_url, tx_id))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ArchiveError::ServerError(resp.status()));
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Wallet address this client signs with.
    pub fn wallet_address(&self) -> &str {
        self.wallet.address()
    }

    /// The wallet itself, for callers that sign their own payloads.
    pub fn wallet(&self) -> &Arc<Wallet> {
        &self.wallet
    }
}

/// Deterministic signing input: payload digest then each tag pair.
fn signing_input(bytes: &[u8], tags: &[Tag]) -> Vec<u8> {
    let mut input = Vec::new();
    input.extend_from_slice(&Sha256::digest(bytes));
    for tag in tags {
        input.extend_from_slice(tag.name.as_bytes());
        input.push(0);
        input.extend_from_slice(tag.value.as_bytes());
        input.push(0);
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_input_is_deterministic_and_tag_sensitive() {
        let tags_a = vec![Tag::new("Encrypted", "false")];
        let tags_b = vec![Tag::new("Encrypted", "true")];

        assert_eq!(signing_input(b"x", &tags_a), signing_input(b"x", &tags_a));
        assert_ne!(signing_input(b"x", &tags_a), signing_input(b"x", &tags_b));
        assert_ne!(signing_input(b"x", &tags_a), signing_input(b"y", &tags_a));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ArchiveError::Validation(TagError::EmptyName).is_fatal());
        assert!(!ArchiveError::MissingId.is_fatal());
        assert!(!ArchiveError::ServerError(reqwest::StatusCode::BAD_GATEWAY).is_fatal());
    }
}
