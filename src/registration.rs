//! Node Self-Registration — publish a signed descriptor at boot.
//!
//! Purely informational: the descriptor tells the network where this node
//! lives and which wallet it archives under. The message is the sorted-key
//! JSON serialisation of the descriptor (BTreeMap ordering), signed with
//! the wallet key; failure is logged and never blocks boot.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::config::AppConfig;
use crate::upload::{ArchiveClient, ArchiveError, Tag, WalletError, APP_NAME};

/// Registration errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("public IP lookup failed: {0}")]
    IpLookup(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error("descriptor serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    ip: String,
}

/// Publish the signed node descriptor; returns the registration tx id.
pub async fn register_node(
    archive: &ArchiveClient,
    config: &AppConfig,
) -> Result<String, RegistrationError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let public_ip = lookup_public_ip(&config.services.ip_lookup_url).await?;

    // BTreeMap gives the canonical sorted-key serialisation the signature
    // commits to.
    let mut descriptor: BTreeMap<&str, Value> = BTreeMap::new();
    descriptor.insert("apiPort", Value::from(config.api.port));
    descriptor.insert("beastPort", Value::from(config.node.beast_port));
    descriptor.insert("nodeType", Value::from(config.node.node_type.as_str()));
    descriptor.insert("publicIP", Value::from(public_ip.as_str()));
    descriptor.insert("timestamp", Value::from(now_ms));
    descriptor.insert("version", Value::from(env!("CARGO_PKG_VERSION")));
    descriptor.insert(
        "walletAddress",
        Value::from(archive.wallet_address().to_string()),
    );

    let message = serde_json::to_string(&descriptor)?;
    let signature = archive.wallet().sign(message.as_bytes())?;

    let blob = serde_json::json!({
        "nodeInfo": descriptor,
        "signature": URL_SAFE_NO_PAD.encode(&signature),
        "message": message,
    });

    let tags = vec![
        Tag::new("App-Name", APP_NAME),
        Tag::new("Type", "node-registration"),
        Tag::new("Node-Type", &config.node.node_type),
        Tag::new("Version", env!("CARGO_PKG_VERSION")),
        Tag::new("Timestamp", now_ms.to_string()),
    ];

    let tx_id = archive.upload(&serde_json::to_vec(&blob)?, &tags).await?;
    info!(tx_id = %tx_id, ip = %public_ip, "Node descriptor published");
    Ok(tx_id)
}

async fn lookup_public_ip(url: &str) -> Result<String, RegistrationError> {
    let resp = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .map_err(|e| RegistrationError::IpLookup(e.to_string()))?
        .get(url)
        .send()
        .await
        .map_err(|e| RegistrationError::IpLookup(e.to_string()))?;

    let parsed: IpLookupResponse = resp
        .json()
        .await
        .map_err(|e| RegistrationError::IpLookup(e.to_string()))?;
    Ok(parsed.ip)
}
