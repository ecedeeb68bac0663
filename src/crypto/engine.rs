//! Cryptographic primitives used by the transfer protocol and the integrity ledger.
//!
//! - AES-256-CBC with PKCS#7 padding for bulk data.
//! - RSA-2048 with OAEP (SHA-256) for wrapping symmetric keys.
//! - HMAC-SHA256 for authentication, compared in constant time.
//!
//! Everything here is a pure function of its inputs apart from key and IV
//! generation, which draw from the operating system's CSPRNG.
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand_core::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::keys::{Iv, MacKey, SymmetricKey};
use super::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// RSA modulus size in bits.
pub const RSA_KEY_BITS: usize = 2048;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// OAEP with SHA-256 costs two digests plus two bytes of the modulus.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// An RSA key pair. The private half is only ever serialized to the key
/// directory by the `KeyStore`.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
}

impl KeyPair {
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Encodes the public key as SPKI PEM.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        public_key_to_pem(&self.public_key)
    }

    /// Encodes the private key as PKCS#8 PEM.
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(format!("private key PEM: {}", e)))
    }

    /// Restores a key pair from a PKCS#8 private key PEM.
    pub fn from_private_key_pem(pem: &str) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::Encoding(format!("private key PEM: {}", e)))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            public_key,
            private_key,
        })
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, CryptoError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::Encoding(format!("public key PEM: {}", e)))
}

pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| CryptoError::Encoding(format!("public key PEM: {}", e)))
}

/// Generates a random 256-bit symmetric key.
pub fn generate_symmetric_key() -> SymmetricKey {
    SymmetricKey::generate()
}

/// Generates a random 128-bit IV.
pub fn generate_iv() -> Iv {
    Iv::generate()
}

/// Encrypts `plaintext` with AES-256-CBC and PKCS#7 padding.
///
/// The output is always a non-empty multiple of the block size.
pub fn symmetric_encrypt(plaintext: &[u8], key: &SymmetricKey, iv: &Iv) -> Vec<u8> {
    Aes256CbcEnc::new(key.as_bytes().into(), iv.as_bytes().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts AES-256-CBC ciphertext produced by [`symmetric_encrypt`].
///
/// # Errors
///
/// Returns `CryptoError::Decryption` if the ciphertext is empty, not a
/// multiple of the block size, or carries invalid padding.
pub fn symmetric_decrypt(
    ciphertext: &[u8],
    key: &SymmetricKey,
    iv: &Iv,
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::Decryption(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_SIZE
        )));
    }

    Aes256CbcDec::new(key.as_bytes().into(), iv.as_bytes().into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decryption("invalid padding".into()))
}

/// Generates a 2048-bit RSA key pair.
///
/// # Errors
///
/// Returns `CryptoError::KeyGeneration` if the RSA implementation fails.
pub fn generate_asymmetric_key_pair() -> Result<KeyPair, CryptoError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);
    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Largest input `asymmetric_encrypt` accepts for a given public key.
pub fn max_asymmetric_plaintext(public_key: &RsaPublicKey) -> usize {
    use rsa::traits::PublicKeyParts;
    public_key.size().saturating_sub(OAEP_SHA256_OVERHEAD)
}

/// Encrypts `data` with RSA-OAEP-SHA256.
///
/// # Errors
///
/// Returns `CryptoError::DataTooLarge` if `data` exceeds the OAEP bound for
/// the key. Input is never truncated.
pub fn asymmetric_encrypt(data: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let max = max_asymmetric_plaintext(public_key);
    if data.len() > max {
        return Err(CryptoError::DataTooLarge {
            len: data.len(),
            max,
        });
    }

    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypts RSA-OAEP-SHA256 ciphertext.
///
/// # Errors
///
/// Returns `CryptoError::Decryption` on any padding or format mismatch.
pub fn asymmetric_decrypt(
    ciphertext: &[u8],
    private_key: &RsaPrivateKey,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("RSA-OAEP decryption failed".into()))
}

/// Computes HMAC-SHA256 over `data` and returns the 32-byte tag.
pub fn compute_mac(data: &[u8], key: &MacKey) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key.keying_material())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Computes HMAC-SHA256 and returns it as lowercase hex.
pub fn compute_mac_hex(data: &[u8], key: &MacKey) -> String {
    hex::encode(compute_mac(data, key))
}

/// Checks `expected_tag` (hex) against the HMAC of `data`.
///
/// Returns `false` for malformed hex, any length mismatch or a wrong tag.
/// The comparison runs in constant time with respect to the tag contents.
pub fn verify_mac(data: &[u8], key: &MacKey, expected_tag: &str) -> bool {
    let expected = match hex::decode(expected_tag.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let computed = compute_mac(data, key);
    if expected.len() != computed.len() {
        return false;
    }
    computed.ct_eq(expected.as_slice()).into()
}
