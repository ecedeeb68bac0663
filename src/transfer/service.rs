//! The transfer service ties the key store, integrity ledger and file store
//! together.
//!
//! Artifact lifecycle: `Uploading -> Stored -> (Verified | Contaminated) -> Deleted`.
//! A ledger record is always written before its file, and removed again if
//! the file write fails, so a file never exists without its record.
use super::policy;
use super::verdict::IntegrityVerdict;
use crate::crypto::protocol::{self, unpack_transfer};
use crate::crypto::{engine, KeyStore, MacKey};
use crate::error::TransferError;
use crate::storage::files::ReadOutcome;
use crate::storage::{FileStore, IntegrityLedger};
use crate::types::{
    ArtifactRecord, ArtifactSummary, Principal, TransferEnvelope, DEFAULT_EXTERNAL_SOURCE,
    UPLOADS_SENTINEL,
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const INTERNAL_ID_PREFIX: &str = "file";
const EXTERNAL_ID_PREFIX: &str = "ext";

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

/// The content of a downloaded artifact together with its integrity result.
///
/// Callers must treat `verified == false` as untrusted content and surface it
/// as contaminated rather than serving it silently.
#[derive(Debug)]
pub struct Download {
    pub record: ArtifactRecord,
    pub plaintext: Vec<u8>,
    pub verified: bool,
}

impl Download {
    pub fn verdict(&self) -> IntegrityVerdict {
        IntegrityVerdict::from_verified(self.verified)
    }
}

/// An artifact accepted from an external sender.
#[derive(Debug)]
pub struct ReceivedArtifact {
    pub record: ArtifactRecord,
    pub size: usize,
    pub stored_name: String,
}

pub struct TransferService {
    keys: Arc<KeyStore>,
    ledger: Arc<dyn IntegrityLedger + Send + Sync>,
    files: Arc<FileStore>,
    max_payload_bytes: usize,
}

impl TransferService {
    pub fn new(
        keys: Arc<KeyStore>,
        ledger: Arc<dyn IntegrityLedger + Send + Sync>,
        files: Arc<FileStore>,
    ) -> Self {
        Self {
            keys,
            ledger,
            files,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Sets the largest plaintext the service accepts.
    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Longest base64 ciphertext that can still decrypt to an accepted payload.
    fn max_encoded_payload(&self) -> usize {
        (self.max_payload_bytes + 16 + 2) / 3 * 4
    }

    fn payload_too_large(&self) -> TransferError {
        TransferError::Validation(format!(
            "File exceeds the {}-byte limit",
            self.max_payload_bytes
        ))
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Stores `plaintext` for `owner` and records its integrity metadata.
    ///
    /// A fresh integrity key is generated for every artifact; it is never the
    /// transport MAC key.
    ///
    /// # Errors
    ///
    /// - `Validation` if the filename is empty or too long, the plaintext is
    ///   larger than the configured maximum, or the owner cannot be used
    ///   as a storage namespace.
    /// - `Storage` if either write fails. A record whose file could not be
    ///   written is rolled back.
    pub async fn upload(
        &self,
        plaintext: &[u8],
        filename: &str,
        owner: &str,
        source: &str,
    ) -> Result<ArtifactRecord, TransferError> {
        let prefix = if owner == UPLOADS_SENTINEL {
            EXTERNAL_ID_PREFIX
        } else {
            INTERNAL_ID_PREFIX
        };
        self.store(plaintext, filename, owner, source, prefix).await
    }

    async fn store(
        &self,
        plaintext: &[u8],
        filename: &str,
        owner: &str,
        source: &str,
        prefix: &str,
    ) -> Result<ArtifactRecord, TransferError> {
        if filename.trim().is_empty() {
            return Err(TransferError::Validation("Filename is required".into()));
        }
        if owner.trim().is_empty() {
            return Err(TransferError::Validation("Target user is required".into()));
        }
        if plaintext.len() > self.max_payload_bytes {
            return Err(self.payload_too_large());
        }

        let id = self.ledger.generate_id(prefix).map_err(TransferError::storage)?;
        self.files
            .artifact_path(owner, &id, filename)
            .map_err(|e| TransferError::Validation(e.to_string()))?;

        debug!("Artifact {} uploading for '{}' ({} bytes)", id, owner, plaintext.len());

        let integrity_key = self.fresh_integrity_key().await?;
        let integrity_hash = engine::compute_mac_hex(plaintext, &integrity_key);

        let record = ArtifactRecord {
            id: id.clone(),
            filename: filename.to_string(),
            filetype: filetype_of(filename),
            integrity_hash,
            integrity_key: integrity_key.to_hex().to_string(),
            owner_principal: owner.to_string(),
            source_principal: source.to_string(),
            created_at: Utc::now(),
        };

        let record = self
            .ledger
            .create(record)
            .await
            .map_err(TransferError::storage)?;

        if let Err(write_err) = self.files.write(owner, &id, filename, plaintext).await {
            error!("Writing artifact {} failed: {:#}", id, write_err);
            return match self.ledger.delete(&id).await {
                Ok(_) => Err(TransferError::storage(write_err)),
                Err(rollback_err) => {
                    error!(
                        "Rollback of ledger record {} failed, record has no file: {:#}",
                        id, rollback_err
                    );
                    Err(TransferError::storage(
                        write_err.context(format!("rollback of record {} failed: {}", id, rollback_err)),
                    ))
                }
            };
        }

        info!("Artifact {} stored for '{}' by '{}'", id, owner, source);
        Ok(record)
    }

    async fn fresh_integrity_key(&self) -> Result<MacKey, TransferError> {
        let transport = self
            .keys
            .transport_mac_key()
            .await
            .map_err(TransferError::storage)?;
        loop {
            let key = MacKey::generate();
            if &key != transport {
                return Ok(key);
            }
        }
    }

    /// Verifies, decrypts and stores an envelope from an external sender.
    ///
    /// The artifact is owned by the uploads sentinel and attributed to the
    /// sender's `senderInfo`, or `external-system` when absent.
    ///
    /// # Errors
    ///
    /// - `Validation` if a required field is missing or the payload is larger
    ///   than the configured maximum.
    /// - `IntegrityViolation`, `KeyUnwrap` or `PayloadDecrypt` if the
    ///   envelope does not open; nothing is stored in that case.
    /// - `Storage` if key material is unavailable or storing fails.
    pub async fn receive_external(
        &self,
        envelope: &TransferEnvelope,
    ) -> Result<ReceivedArtifact, TransferError> {
        protocol::validate_envelope(envelope)?;
        if envelope.encrypted_data.len() > self.max_encoded_payload() {
            warn!(
                "Rejected external envelope for '{}': {} encoded bytes",
                envelope.filename,
                envelope.encrypted_data.len()
            );
            return Err(self.payload_too_large());
        }
        info!("Received external envelope for '{}'", envelope.filename);

        let key_pair = self.keys.key_pair().await.map_err(TransferError::storage)?;
        let transport_key = self
            .keys
            .transport_mac_key()
            .await
            .map_err(TransferError::storage)?;

        let plaintext = unpack_transfer(envelope, key_pair.private_key(), transport_key)?;
        info!(
            "External envelope for '{}' verified and decrypted ({} bytes)",
            envelope.filename,
            plaintext.len()
        );

        let source = envelope
            .sender_info
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_EXTERNAL_SOURCE);

        let record = self
            .upload(&plaintext, &envelope.filename, UPLOADS_SENTINEL, source)
            .await?;
        let stored_name = stored_name_of(&self.files, &record);

        Ok(ReceivedArtifact {
            size: plaintext.len(),
            stored_name,
            record,
        })
    }

    /// Reads an artifact and re-checks it against its ledger record.
    ///
    /// The plaintext is returned even when verification fails; see
    /// [`Download`].
    ///
    /// # Errors
    ///
    /// - `RecordNotFound` if no record exists.
    /// - `AccessDenied` if `requester` may not read the artifact.
    /// - `NotFoundOnDisk` if the record exists but the file does not.
    /// - `Storage` on I/O failure.
    pub async fn download(&self, id: &str, requester: &Principal) -> Result<Download, TransferError> {
        let record = self
            .ledger
            .get_by_id(id)
            .await
            .map_err(TransferError::storage)?
            .ok_or(TransferError::RecordNotFound)?;

        if !policy::can_read(&record, requester) {
            warn!("'{}' denied access to artifact {}", requester.id, id);
            return Err(TransferError::AccessDenied);
        }

        let plaintext = match self
            .files
            .read(&record.owner_principal, &record.id, &record.filename)
            .await
            .map_err(TransferError::storage)?
        {
            ReadOutcome::Found(bytes) => bytes,
            ReadOutcome::NotFound => {
                warn!("Artifact {} has a ledger record but no file on disk", id);
                return Err(TransferError::NotFoundOnDisk);
            }
        };

        let verified = verify_at_rest(&record, &plaintext);
        if verified {
            debug!("Artifact {} verified", id);
        } else {
            warn!("Artifact {} failed integrity verification: contaminated", id);
        }

        Ok(Download {
            record,
            plaintext,
            verified,
        })
    }

    /// Checks an artifact's integrity without handing out its content.
    ///
    /// # Errors
    ///
    /// Same as [`TransferService::download`].
    pub async fn verify(
        &self,
        id: &str,
        requester: &Principal,
    ) -> Result<(ArtifactRecord, IntegrityVerdict), TransferError> {
        let download = self.download(id, requester).await?;
        let verdict = download.verdict();
        Ok((download.record, verdict))
    }

    /// Deletes an artifact's file and its ledger record.
    ///
    /// Both removals are attempted even if one of them fails.
    ///
    /// # Returns
    ///
    /// `false` if no record with `id` exists.
    ///
    /// # Errors
    ///
    /// - `AccessDenied` if `actor` may not delete the artifact.
    /// - `Storage` if either removal failed.
    pub async fn delete(&self, id: &str, actor: &Principal) -> Result<bool, TransferError> {
        let record = match self
            .ledger
            .get_by_id(id)
            .await
            .map_err(TransferError::storage)?
        {
            Some(record) => record,
            None => return Ok(false),
        };

        if !policy::can_delete(&record, actor) {
            warn!("'{}' denied deletion of artifact {}", actor.id, id);
            return Err(TransferError::AccessDenied);
        }

        let file_result = self
            .files
            .remove(&record.owner_principal, &record.id, &record.filename)
            .await;
        let ledger_result = self.ledger.delete(id).await;

        match (file_result, ledger_result) {
            (Ok(file_removed), Ok(record_removed)) => {
                if !file_removed {
                    warn!("Artifact {} had no file on disk at deletion", id);
                }
                info!("Artifact {} deleted by '{}'", id, actor.id);
                Ok(record_removed)
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Deleting artifact {} failed: {:#}", id, e);
                Err(TransferError::storage(e))
            }
        }
    }

    /// Lists the artifacts owned by `principal`.
    pub async fn list_for(&self, principal: &Principal) -> Result<Vec<ArtifactSummary>, TransferError> {
        let records = self
            .ledger
            .get_by_owner(&principal.id)
            .await
            .map_err(TransferError::storage)?;
        Ok(records
            .iter()
            .map(|r| ArtifactSummary::from_record(r, false))
            .collect())
    }

    /// Lists every artifact with its owner. Admins only.
    pub async fn list_all(&self, actor: &Principal) -> Result<Vec<ArtifactSummary>, TransferError> {
        if !policy::can_list_all(actor) {
            return Err(TransferError::AccessDenied);
        }
        let records = self.ledger.list_all().await.map_err(TransferError::storage)?;
        Ok(records
            .iter()
            .map(|r| ArtifactSummary::from_record(r, true))
            .collect())
    }

    /// Lists the artifacts received from external senders. Admins only.
    pub async fn list_external(&self, actor: &Principal) -> Result<Vec<ArtifactSummary>, TransferError> {
        if !policy::can_list_all(actor) {
            return Err(TransferError::AccessDenied);
        }
        let records = self
            .ledger
            .get_by_owner(UPLOADS_SENTINEL)
            .await
            .map_err(TransferError::storage)?;
        Ok(records
            .iter()
            .map(|r| ArtifactSummary::from_record(r, false))
            .collect())
    }

    /// Lists the artifacts `principal` uploaded for others, with their owners.
    pub async fn list_sent_by(&self, principal: &Principal) -> Result<Vec<ArtifactSummary>, TransferError> {
        let records = self
            .ledger
            .get_by_uploader(&principal.id)
            .await
            .map_err(TransferError::storage)?;
        Ok(records
            .iter()
            .map(|r| ArtifactSummary::from_record(r, true))
            .collect())
    }
}

/// Recomputes the artifact MAC with its own key. A record whose key cannot be
/// parsed counts as a failed verification.
fn verify_at_rest(record: &ArtifactRecord, plaintext: &[u8]) -> bool {
    match MacKey::from_hex(&record.integrity_key) {
        Ok(key) => engine::verify_mac(plaintext, &key, &record.integrity_hash),
        Err(_) => {
            warn!("Artifact {} has an unreadable integrity key", record.id);
            false
        }
    }
}

/// Lowercased extension with its dot, or `unknown`.
fn filetype_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn stored_name_of(files: &FileStore, record: &ArtifactRecord) -> String {
    files
        .artifact_path(&record.owner_principal, &record.id, &record.filename)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}
