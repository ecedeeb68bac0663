//! Plaintext artifact storage: one directory per owning principal, one file
//! per artifact named `<id>_<sanitized filename>`.
//!
//! Every path is built from sanitized components and then checked to resolve
//! inside the owner's namespace before it is touched.
use anyhow::{anyhow, bail, Context, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Longest single path component most filesystems accept.
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Replaces every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Result of reading an artifact's bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(Vec<u8>),
    NotFound,
}

/// Filesystem store for artifact plaintext.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be created or resolved.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating file store root {}", root.display()))?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the namespace directory name for `principal`.
    ///
    /// # Errors
    ///
    /// Returns an error for principals that sanitize to an empty or
    /// dot-only name.
    fn namespace_name(principal: &str) -> Result<String> {
        let name = sanitize_component(principal);
        if name.is_empty() || name.chars().all(|c| c == '.') {
            bail!("Principal '{}' cannot be used as a storage namespace", principal);
        }
        Ok(name)
    }

    fn namespace_path(&self, principal: &str) -> Result<PathBuf> {
        Ok(self.root.join(Self::namespace_name(principal)?))
    }

    /// Derives the on-disk path for an artifact without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the id or principal is unusable, if `<id>_<name>`
    /// is longer than [`MAX_FILE_NAME_BYTES`], or if the result would not be
    /// a direct child of the owner's namespace.
    pub fn artifact_path(&self, principal: &str, id: &str, filename: &str) -> Result<PathBuf> {
        let safe_id = sanitize_component(id);
        if safe_id != id || id.is_empty() {
            bail!("Artifact id '{}' contains unsupported characters", id);
        }

        let namespace = self.namespace_path(principal)?;
        let file_name = format!("{}_{}", safe_id, sanitize_component(filename));
        if file_name.len() > MAX_FILE_NAME_BYTES {
            bail!(
                "Filename is too long ({} bytes stored, limit {})",
                file_name.len(),
                MAX_FILE_NAME_BYTES
            );
        }
        let path = namespace.join(&file_name);

        let mut components = path
            .strip_prefix(&namespace)
            .map_err(|_| anyhow!("Artifact path for '{}' escapes its namespace", id))?
            .components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == file_name.as_str() => Ok(path),
            _ => bail!("Artifact path for '{}' escapes its namespace", id),
        }
    }

    /// Creates the namespace directory for `principal` if it does not exist.
    ///
    /// Calling it again for the same principal has no further effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or resolves
    /// outside the store root.
    pub async fn ensure_namespace(&self, principal: &str) -> Result<PathBuf> {
        let namespace = self.namespace_path(principal)?;
        fs::create_dir_all(&namespace)
            .await
            .with_context(|| format!("creating namespace for '{}'", principal))?;
        self.check_contained(&namespace).await?;
        Ok(namespace)
    }

    /// Resolves symlinks and confirms `namespace` still lies directly under the root.
    async fn check_contained(&self, namespace: &Path) -> Result<()> {
        let resolved = fs::canonicalize(namespace).await?;
        if resolved.parent() != Some(self.root.as_path()) {
            bail!(
                "Namespace {} resolves outside the file store",
                namespace.display()
            );
        }
        Ok(())
    }

    /// Writes an artifact's bytes, creating the namespace if needed.
    ///
    /// Refuses to overwrite an existing artifact. On a failed write the
    /// partial file is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid, the file already exists, or
    /// the write fails.
    pub async fn write(
        &self,
        principal: &str,
        id: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let path = self.artifact_path(principal, id, filename)?;
        self.ensure_namespace(principal).await?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .with_context(|| format!("creating artifact {}", id))?;

        let written = async {
            use tokio::io::AsyncWriteExt;
            file.write_all(bytes).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(e).with_context(|| format!("writing artifact {}", id));
        }

        debug!("Stored artifact {} ({} bytes)", id, bytes.len());
        Ok(path)
    }

    /// Reads an artifact's bytes.
    ///
    /// A missing file is reported as `ReadOutcome::NotFound`, not an error;
    /// it can legitimately happen after a concurrent delete.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid paths or I/O failures other than absence.
    pub async fn read(&self, principal: &str, id: &str, filename: &str) -> Result<ReadOutcome> {
        let path = self.artifact_path(principal, id, filename)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(ReadOutcome::Found(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ReadOutcome::NotFound),
            Err(e) => Err(e).with_context(|| format!("reading artifact {}", id)),
        }
    }

    /// Removes an artifact's file. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid paths or I/O failures other than absence.
    pub async fn remove(&self, principal: &str, id: &str, filename: &str) -> Result<bool> {
        let path = self.artifact_path(principal, id, filename)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing artifact {}", id)),
        }
    }
}
