//! Encryptor — minute-rotated authenticated encryption for archive packages.
//!
//! A 32-byte master key never leaves this service. Working keys are derived
//! per minute epoch with HKDF-SHA256, salted by a key UUID of the form
//! `enckey-{minute_epoch}-{uuid}`, so every batch encrypted in the same
//! minute shares one key UUID. Packages use AES-256-GCM and travel as
//! `IV(12) ‖ AuthTag(16) ‖ Ciphertext`.
//!
//! Snapshot backups use a fixed key id instead of the minute key so the key
//! can be re-derived at restore time from the master key alone.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use uuid::Uuid;

/// HKDF info string binding derived keys to this purpose.
const KEY_DERIVATION_INFO: &[u8] = b"arweave-package-encryption";

/// IV length for AES-256-GCM.
const IV_LEN: usize = 12;

/// GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Encryption errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: wrong key or corrupted package")]
    Decrypt,
    #[error("encrypted package too short: {0} bytes")]
    Truncated(usize),
    #[error("key derivation failed")]
    Derive,
}

/// A minute-scoped working key.
#[derive(Debug, Clone)]
pub struct MinuteKey {
    pub key_uuid: String,
    pub raw_key: [u8; 32],
    pub minute_epoch: i64,
}

/// An encrypted package ready for upload.
pub struct EncryptedPackage {
    /// `IV ‖ AuthTag ‖ Ciphertext`
    pub encrypted: Vec<u8>,
    /// SHA-256 of the plaintext, lowercase hex
    pub data_hash: String,
    /// Plaintext size in bytes
    pub size: usize,
    /// The raw working key (forwarded to the key-share service)
    pub raw_key: [u8; 32],
    pub package_uuid: String,
    pub key_uuid: String,
}

/// Owns the master key and the cached minute key.
pub struct Encryptor {
    master_key: [u8; 32],
    minute_key: Mutex<Option<MinuteKey>>,
}

impl Encryptor {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            master_key,
            minute_key: Mutex::new(None),
        }
    }

    /// Return the cached minute key, deriving a fresh one when the minute
    /// epoch has rolled over.
    pub fn minute_key(&self, now_ms: i64) -> Result<MinuteKey, CryptoError> {
        let epoch = now_ms.div_euclid(60_000);
        let mut cached = match self.minute_key.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(key) = cached.as_ref() {
            if key.minute_epoch == epoch {
                return Ok(key.clone());
            }
        }

        let key_uuid = format!("enckey-{epoch}-{}", Uuid::new_v4());
        let raw_key = self.derive_key(&key_uuid)?;
        let key = MinuteKey {
            key_uuid,
            raw_key,
            minute_epoch: epoch,
        };
        *cached = Some(key.clone());
        Ok(key)
    }

    /// Encrypt a package with the current minute key.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        package_uuid: &str,
        now_ms: i64,
    ) -> Result<EncryptedPackage, CryptoError> {
        let key = self.minute_key(now_ms)?;
        self.encrypt_with(plaintext, package_uuid, &key.key_uuid, key.raw_key)
    }

    /// Encrypt with a key derived from a fixed id, for payloads that must be
    /// decryptable later from the master key alone (snapshot backups).
    pub fn encrypt_with_fixed_key(
        &self,
        plaintext: &[u8],
        fixed_id: &str,
    ) -> Result<EncryptedPackage, CryptoError> {
        let raw_key = self.derive_key(fixed_id)?;
        self.encrypt_with(plaintext, fixed_id, fixed_id, raw_key)
    }

    /// Decrypt a package given its key UUID (minute-scoped or fixed).
    pub fn decrypt(&self, encrypted: &[u8], key_uuid: &str) -> Result<Vec<u8>, CryptoError> {
        if encrypted.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(encrypted.len()));
        }
        let raw_key = self.derive_key(key_uuid)?;
        let (iv, rest) = encrypted.split_at(IV_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        // The aead crate expects ciphertext ‖ tag.
        let mut joined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        joined.extend_from_slice(ciphertext);
        joined.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&raw_key));
        cipher
            .decrypt(Nonce::from_slice(iv), joined.as_ref())
            .map_err(|_| CryptoError::Decrypt)
    }

    /// HKDF-SHA256(ikm = master key, salt = utf8(key uuid), info = fixed).
    fn derive_key(&self, key_uuid: &str) -> Result<[u8; 32], CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(key_uuid.as_bytes()), &self.master_key);
        let mut okm = [0u8; 32];
        hk.expand(KEY_DERIVATION_INFO, &mut okm)
            .map_err(|_| CryptoError::Derive)?;
        Ok(okm)
    }

    fn encrypt_with(
        &self,
        plaintext: &[u8],
        package_uuid: &str,
        key_uuid: &str,
        raw_key: [u8; 32],
    ) -> Result<EncryptedPackage, CryptoError> {
        let data_hash = hex::encode(Sha256::digest(plaintext));

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&raw_key));
        let ct_and_tag = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        let (ciphertext, tag) = ct_and_tag.split_at(ct_and_tag.len() - TAG_LEN);

        let mut encrypted = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
        encrypted.extend_from_slice(&iv);
        encrypted.extend_from_slice(tag);
        encrypted.extend_from_slice(ciphertext);

        Ok(EncryptedPackage {
            encrypted,
            data_hash,
            size: plaintext.len(),
            raw_key,
            package_uuid: package_uuid.to_string(),
            key_uuid: key_uuid.to_string(),
        })
    }
}
