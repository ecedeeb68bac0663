//! The hybrid transfer envelope: AES-256-CBC for the payload, RSA-OAEP for the
//! payload key, and HMAC-SHA256 over the ciphertext (Encrypt-then-MAC).
//!
//! On the receiving side the order is fixed: verify the MAC, unwrap the key,
//! decrypt the payload. Nothing is decrypted for an envelope whose MAC does
//! not verify.
use super::engine;
use super::keys::{Iv, MacKey, SymmetricKey};
use super::CryptoError;
use crate::error::TransferError;
use crate::types::TransferEnvelope;
use base64::prelude::*;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Unwraps the symmetric key carried in an envelope.
///
/// Implemented for `RsaPrivateKey`; the indirection lets callers observe or
/// substitute the unwrap step.
pub trait KeyUnwrap {
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

impl KeyUnwrap for RsaPrivateKey {
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        engine::asymmetric_decrypt(wrapped, self)
    }
}

/// Encrypts `plaintext` for the holder of `recipient_public_key`.
///
/// A fresh symmetric key and IV are generated for every call. The MAC covers
/// the base64 ciphertext text only, never the plaintext, wrapped key or IV.
///
/// # Errors
///
/// Returns an error if wrapping the symmetric key fails.
pub fn package_for_transfer(
    plaintext: &[u8],
    filename: &str,
    recipient_public_key: &RsaPublicKey,
    transport_mac_key: &MacKey,
) -> Result<TransferEnvelope, CryptoError> {
    let key = engine::generate_symmetric_key();
    let iv = engine::generate_iv();

    let ciphertext = engine::symmetric_encrypt(plaintext, &key, &iv);
    let encrypted_data = BASE64_STANDARD.encode(&ciphertext);

    // Senders wrap the key's hex text; keep that form on the wire.
    let key_text = Zeroizing::new(key.to_hex());
    let wrapped = engine::asymmetric_encrypt(key_text.as_bytes(), recipient_public_key)?;

    let hmac = engine::compute_mac_hex(encrypted_data.as_bytes(), transport_mac_key);

    Ok(TransferEnvelope {
        encrypted_data,
        encrypted_key: BASE64_STANDARD.encode(wrapped),
        iv: iv.to_hex(),
        hmac,
        filename: filename.to_string(),
        sender_info: None,
    })
}

/// Wire names of the envelope fields a sender must supply.
pub const REQUIRED_ENVELOPE_FIELDS: [&str; 5] = ["encryptedData", "encryptedKey", "iv", "hmac", "filename"];

/// Checks that every required envelope field is present.
///
/// # Errors
///
/// Returns `TransferError::Validation` naming the missing fields.
pub fn validate_envelope(envelope: &TransferEnvelope) -> Result<(), TransferError> {
    let values = [
        &envelope.encrypted_data,
        &envelope.encrypted_key,
        &envelope.iv,
        &envelope.hmac,
        &envelope.filename,
    ];
    let missing: Vec<&str> = REQUIRED_ENVELOPE_FIELDS
        .iter()
        .zip(values)
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TransferError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Verifies and decrypts an envelope.
///
/// # Errors
///
/// - `IntegrityViolation` if the MAC does not match; no decryption is attempted.
/// - `KeyUnwrap` if the wrapped key cannot be decoded or unwrapped.
/// - `PayloadDecrypt` if the IV or ciphertext is malformed or fails to decrypt.
pub fn unpack_transfer<K: KeyUnwrap + ?Sized>(
    envelope: &TransferEnvelope,
    recipient_private_key: &K,
    transport_mac_key: &MacKey,
) -> Result<Vec<u8>, TransferError> {
    if !engine::verify_mac(
        envelope.encrypted_data.as_bytes(),
        transport_mac_key,
        &envelope.hmac,
    ) {
        warn!(
            "Envelope MAC verification failed for '{}'; rejecting before decryption",
            envelope.filename
        );
        return Err(TransferError::IntegrityViolation);
    }
    debug!("Envelope MAC verified for '{}'", envelope.filename);

    let key = unwrap_symmetric_key(envelope, recipient_private_key)?;

    let iv = Iv::from_hex(&envelope.iv).map_err(|_| TransferError::PayloadDecrypt)?;
    let ciphertext = BASE64_STANDARD
        .decode(envelope.encrypted_data.trim())
        .map_err(|_| TransferError::PayloadDecrypt)?;

    engine::symmetric_decrypt(&ciphertext, &key, &iv).map_err(|e| {
        warn!("Payload decryption failed for '{}': {}", envelope.filename, e);
        TransferError::PayloadDecrypt
    })
}

fn unwrap_symmetric_key<K: KeyUnwrap + ?Sized>(
    envelope: &TransferEnvelope,
    recipient_private_key: &K,
) -> Result<SymmetricKey, TransferError> {
    let wrapped = BASE64_STANDARD
        .decode(envelope.encrypted_key.trim())
        .map_err(|_| TransferError::KeyUnwrap)?;

    let key_bytes = recipient_private_key.unwrap_key(&wrapped).map_err(|e| {
        warn!("Key unwrap failed for '{}': {}", envelope.filename, e);
        TransferError::KeyUnwrap
    })?;

    SymmetricKey::from_slice(&key_bytes).map_err(|_| TransferError::KeyUnwrap)
}
