//! Key material types.
//!
//! Symmetric keys and MAC keys zeroize their memory on drop. Their `Debug`
//! output is redacted so they never end up in logs.
use rand_core::{OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;

/// Length of a symmetric (AES-256) key in bytes.
pub const SYMMETRIC_KEY_LENGTH: usize = 32;

/// Length of an AES-CBC initialization vector in bytes.
pub const IV_LENGTH: usize = 16;

/// Length of a freshly generated MAC key in bytes.
pub const MAC_KEY_LENGTH: usize = 32;

/// A 256-bit symmetric key used for a single payload encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LENGTH]);

impl SymmetricKey {
    /// Generates a key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; SYMMETRIC_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    #[cfg(test)]
    pub fn from_bytes(key: [u8; SYMMETRIC_KEY_LENGTH]) -> Self {
        Self(key)
    }

    /// Parses a key from a byte slice.
    ///
    /// Accepts either the raw 32 bytes or the 64-character hex text form that
    /// existing senders wrap with RSA.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` if the input is neither form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut key = [0u8; SYMMETRIC_KEY_LENGTH];
        match bytes.len() {
            SYMMETRIC_KEY_LENGTH => key.copy_from_slice(bytes),
            len if len == SYMMETRIC_KEY_LENGTH * 2 => {
                hex::decode_to_slice(bytes, &mut key)
                    .map_err(|_| CryptoError::InvalidKeyLength(len))?;
            }
            len => return Err(CryptoError::InvalidKeyLength(len)),
        }
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LENGTH] {
        &self.0
    }

    /// Returns the lowercase hex text form of the key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// A 128-bit AES-CBC initialization vector.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_LENGTH]);

impl Iv {
    /// Generates a fresh IV. Every encryption call must use its own.
    pub fn generate() -> Self {
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    #[cfg(test)]
    pub fn from_bytes(iv: [u8; IV_LENGTH]) -> Self {
        Self(iv)
    }

    /// Parses an IV from its hex text form.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encoding` if the text is not 32 hex characters.
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let mut iv = [0u8; IV_LENGTH];
        hex::decode_to_slice(text, &mut iv)
            .map_err(|e| CryptoError::Encoding(format!("invalid IV: {}", e)))?;
        Ok(Self(iv))
    }

    pub fn as_bytes(&self) -> &[u8; IV_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", self.to_hex())
    }
}

/// An HMAC-SHA256 key.
///
/// The system holds two kinds of MAC key: the transport key shared with
/// senders, and one integrity key per stored artifact. Both use this type but
/// are never interchanged.
///
/// MAC keys are keyed by their lowercase hex text, which is the form
/// published to senders and stored in the ledger.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MacKey(String);

impl MacKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut raw = [0u8; MAC_KEY_LENGTH];
        OsRng.fill_bytes(&mut raw);
        let key = Self(hex::encode(raw));
        raw.zeroize();
        key
    }

    /// Restores a key from its hex text form.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::Encoding` if the text is empty or not hex.
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let text = text.trim();
        if text.is_empty() || hex::decode(text).is_err() {
            return Err(CryptoError::Encoding("MAC key must be non-empty hex".into()));
        }
        Ok(Self(text.to_ascii_lowercase()))
    }

    /// The bytes fed to HMAC as the key.
    pub fn keying_material(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MacKey([REDACTED])")
    }
}
