//! Package encryption and key escrow.

mod encryptor;
mod keyshare;

pub use encryptor::{CryptoError, EncryptedPackage, Encryptor, MinuteKey};
pub use keyshare::{KeyShareClient, KeyShareError, StoreKeyOutcome};
