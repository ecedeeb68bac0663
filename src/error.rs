//! Error taxonomy exposed at the `TransferService` boundary.
use thiserror::Error;

/// Everything a caller of the transfer service can observe going wrong.
///
/// Messages are safe to show to clients: they never include key material,
/// paths outside the artifact's own name, or low-level error chains.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Missing or malformed request fields. No side effects took place.
    #[error("{0}")]
    Validation(String),

    /// The envelope MAC did not verify; the payload was discarded undecrypted.
    #[error("HMAC verification failed - file integrity compromised")]
    IntegrityViolation,

    #[error("Failed to decrypt AES key - invalid RSA encryption")]
    KeyUnwrap,

    #[error("Failed to decrypt file - invalid AES encryption or IV")]
    PayloadDecrypt,

    /// No ledger record exists for the id.
    #[error("File not found")]
    RecordNotFound,

    /// The ledger record exists but the stored bytes are gone.
    #[error("File not found on disk")]
    NotFoundOnDisk,

    #[error("Access denied")]
    AccessDenied,

    /// Disk or ledger I/O failed. The detail is logged, not returned.
    #[error("Storage error")]
    Storage(#[source] anyhow::Error),
}

impl TransferError {
    /// Coarse classification reported to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::IntegrityViolation => "integrity_violation",
            Self::KeyUnwrap => "key_unwrap",
            Self::PayloadDecrypt => "payload_decrypt",
            Self::RecordNotFound => "not_found",
            Self::NotFoundOnDisk => "not_found_on_disk",
            Self::AccessDenied => "access_denied",
            Self::Storage(_) => "storage",
        }
    }

    /// True for failures that mean the received content cannot be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation | Self::KeyUnwrap | Self::PayloadDecrypt
        )
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }
}
