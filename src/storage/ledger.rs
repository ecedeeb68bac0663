//! This module defines the integrity ledger: the store of `ArtifactRecord`s
//! that holds the per-artifact MAC key and value needed to re-verify a stored
//! file later.
//!
//! The ledger lives in its own sled database, apart from any user-account
//! store. Every mutation is a single-key atomic operation, so concurrent
//! uploads and deletes cannot lose each other's updates.
use crate::types::{ArtifactPatch, ArtifactRecord};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use sled::Db;

/// A trait for storing and retrieving artifact records.
#[async_trait]
pub trait IntegrityLedger {
    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if a record with the same id already exists or the
    /// record cannot be written.
    async fn create(&self, record: ArtifactRecord) -> Result<ArtifactRecord>;

    /// Retrieves a record by id.
    async fn get_by_id(&self, id: &str) -> Result<Option<ArtifactRecord>>;

    /// Lists the records owned by `principal`, oldest first.
    async fn get_by_owner(&self, principal: &str) -> Result<Vec<ArtifactRecord>>;

    /// Lists the records uploaded by `principal`, oldest first.
    async fn get_by_uploader(&self, principal: &str) -> Result<Vec<ArtifactRecord>>;

    /// Lists every record, oldest first.
    async fn list_all(&self) -> Result<Vec<ArtifactRecord>>;

    /// Applies `patch` to the record with `id`.
    ///
    /// # Returns
    ///
    /// The updated record, or `None` if no record has that id.
    // No request path patches records; kept for ledger maintenance.
    #[allow(dead_code)]
    async fn update(&self, id: &str, patch: ArtifactPatch) -> Result<Option<ArtifactRecord>>;

    /// Removes the record with `id`. Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Generates an id that has never been handed out by this ledger.
    ///
    /// Ids consist of `prefix`, a millisecond timestamp and a monotonic
    /// counter, so they only ever contain `[A-Za-z0-9_]`.
    fn generate_id(&self, prefix: &str) -> Result<String>;
}

/// An `IntegrityLedger` implementation using `sled` for storage.
pub struct SledIntegrityLedger {
    db: Db,
    tree: sled::Tree,
}

impl SledIntegrityLedger {
    /// Creates a new `SledIntegrityLedger`.
    ///
    /// # Errors
    ///
    /// Returns an error if the `artifacts` tree cannot be opened.
    pub fn new(db: Db) -> Result<Self> {
        let tree = db.open_tree("artifacts")?;
        Ok(Self { db, tree })
    }

    fn serialize_record(record: &ArtifactRecord) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(record)?)
    }

    fn deserialize_record(data: &[u8]) -> Result<ArtifactRecord> {
        Ok(serde_json::from_slice(data)?)
    }

    fn collect_where<F>(&self, keep: F) -> Result<Vec<ArtifactRecord>>
    where
        F: Fn(&ArtifactRecord) -> bool,
    {
        let mut records = Vec::new();
        for result in self.tree.iter() {
            let (_key, value) = result?;
            let record = Self::deserialize_record(&value)?;
            if keep(&record) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[async_trait]
impl IntegrityLedger for SledIntegrityLedger {
    async fn create(&self, record: ArtifactRecord) -> Result<ArtifactRecord> {
        let value = Self::serialize_record(&record)?;

        let swapped = self
            .tree
            .compare_and_swap(record.id.as_bytes(), None as Option<&[u8]>, Some(value))?;
        if swapped.is_err() {
            bail!("Artifact record '{}' already exists", record.id);
        }

        self.tree.flush_async().await?;
        Ok(record)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        match self.tree.get(id.as_bytes())? {
            Some(data) => Ok(Some(Self::deserialize_record(&data)?)),
            None => Ok(None),
        }
    }

    async fn get_by_owner(&self, principal: &str) -> Result<Vec<ArtifactRecord>> {
        self.collect_where(|r| r.owner_principal == principal)
    }

    async fn get_by_uploader(&self, principal: &str) -> Result<Vec<ArtifactRecord>> {
        self.collect_where(|r| r.source_principal == principal)
    }

    async fn list_all(&self) -> Result<Vec<ArtifactRecord>> {
        self.collect_where(|_| true)
    }

    async fn update(&self, id: &str, patch: ArtifactPatch) -> Result<Option<ArtifactRecord>> {
        // Optimistic retry: another writer may change the record between our
        // read and the swap.
        loop {
            let current = match self.tree.get(id.as_bytes())? {
                Some(data) => data,
                None => return Ok(None),
            };

            let mut record = Self::deserialize_record(&current)?;
            if let Some(filetype) = patch.filetype.clone() {
                record.filetype = filetype;
            }
            if let Some(source) = patch.source_principal.clone() {
                record.source_principal = source;
            }
            let value = Self::serialize_record(&record)?;

            if self
                .tree
                .compare_and_swap(id.as_bytes(), Some(current), Some(value))?
                .is_ok()
            {
                self.tree.flush_async().await?;
                return Ok(Some(record));
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.tree.remove(id.as_bytes())?.is_some();
        if removed {
            self.tree.flush_async().await?;
        }
        Ok(removed)
    }

    fn generate_id(&self, prefix: &str) -> Result<String> {
        let counter = self.db.generate_id()?;
        Ok(format!(
            "{}_{}_{}",
            prefix,
            Utc::now().timestamp_millis(),
            counter
        ))
    }
}
