//! Node wallet — RSA key material loaded from a JWK file.
//!
//! The wallet signs every gateway submission and the node descriptor. The
//! file lives under the local `keys/` directory and must exist at boot
//! (fail fast). The owner field is the JWK modulus verbatim; the address is
//! the base64url SHA-256 of the raw modulus bytes.

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rsa::{BigUint, Pss, RsaPrivateKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Wallet errors — all fatal at boot.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("failed to read wallet file {0}: {1}")]
    Io(String, String),
    #[error("wallet JWK parse error: {0}")]
    Parse(String),
    #[error("wallet is not an RSA JWK (kty = {0})")]
    NotRsa(String),
    #[error("wallet JWK is missing the private component '{0}'")]
    MissingComponent(&'static str),
    #[error("wallet JWK component '{0}' is not valid base64url")]
    BadComponent(&'static str),
    #[error("invalid RSA key material: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// On-disk JWK shape. Public members `n`/`e` plus the private CRT set.
#[derive(Debug, Deserialize)]
struct JwkFile {
    kty: String,
    n: String,
    e: String,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
}

/// The node's archive-network wallet.
#[derive(Debug)]
pub struct Wallet {
    key: RsaPrivateKey,
    /// JWK modulus, base64url — the gateway's owner field
    owner: String,
    /// base64url(SHA-256(modulus bytes)) — the wallet address
    address: String,
}

impl Wallet {
    /// Load and validate a JWK wallet file.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Io(path.display().to_string(), e.to_string()))?;
        Self::from_jwk_str(&contents)
    }

    /// Parse a JWK document into a signing wallet.
    pub fn from_jwk_str(jwk: &str) -> Result<Self, WalletError> {
        let parsed: JwkFile =
            serde_json::from_str(jwk).map_err(|e| WalletError::Parse(e.to_string()))?;
        if parsed.kty != "RSA" {
            return Err(WalletError::NotRsa(parsed.kty));
        }

        let n_bytes = decode_component(&parsed.n, "n")?;
        let e_bytes = decode_component(&parsed.e, "e")?;
        let d_bytes = decode_component(
            parsed.d.as_deref().ok_or(WalletError::MissingComponent("d"))?,
            "d",
        )?;
        let p_bytes = decode_component(
            parsed.p.as_deref().ok_or(WalletError::MissingComponent("p"))?,
            "p",
        )?;
        let q_bytes = decode_component(
            parsed.q.as_deref().ok_or(WalletError::MissingComponent("q"))?,
            "q",
        )?;

        let key = RsaPrivateKey::from_components(
            BigUint::from_bytes_be(&n_bytes),
            BigUint::from_bytes_be(&e_bytes),
            BigUint::from_bytes_be(&d_bytes),
            vec![
                BigUint::from_bytes_be(&p_bytes),
                BigUint::from_bytes_be(&q_bytes),
            ],
        )
        .map_err(|e| WalletError::InvalidKey(e.to_string()))?;

        let address = URL_SAFE_NO_PAD.encode(Sha256::digest(&n_bytes));

        Ok(Self {
            key,
            owner: parsed.n,
            address,
        })
    }

    /// RSA-PSS signature over the SHA-256 digest of `message`.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, WalletError> {
        let digest = Sha256::digest(message);
        self.key
            .sign_with_rng(&mut rand::thread_rng(), Pss::new::<Sha256>(), &digest)
            .map_err(|e| WalletError::Signing(e.to_string()))
    }

    /// JWK modulus, base64url — used as the gateway owner field.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Wallet address: base64url SHA-256 of the modulus bytes.
    pub fn address(&self) -> &str {
        &self.address
    }
}

fn decode_component(value: &str, name: &'static str) -> Result<Vec<u8>, WalletError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|_| WalletError::BadComponent(name))
}
