//! Key material, cryptographic primitives and the hybrid transfer envelope.
pub mod engine;
pub mod keys;
pub mod keystore;
pub mod protocol;

pub use keys::MacKey;
pub use keystore::KeyStore;
pub use protocol::package_for_transfer;

use thiserror::Error;

/// Failures raised by the primitives in [`engine`].
///
/// These never cross the `TransferService` boundary; they are mapped onto
/// `TransferError` kinds first.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("input of {len} bytes exceeds the {max}-byte limit for this key")]
    DataTooLarge { len: usize, max: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}
