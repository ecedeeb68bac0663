//! This module manages the receiver's long-lived key material: the RSA key
//! pair used to unwrap symmetric keys and the transport MAC key shared with
//! senders.
//!
//! Keys are generated on first use and persisted to the key directory; later
//! runs load them from disk. Initialization happens at most once per
//! `KeyStore`, even under concurrent first access.
use super::engine::{self, KeyPair};
use super::keys::MacKey;
use crate::types::{AlgorithmSuite, PublicKeyBootstrap};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{info, warn};

const PUBLIC_KEY_FILE: &str = "public.pem";
const PRIVATE_KEY_FILE: &str = "private.pem";
const HMAC_KEY_FILE: &str = "hmac.key";

struct KeyMaterial {
    key_pair: KeyPair,
    public_key_pem: String,
    transport_mac_key: MacKey,
}

/// Owner of the receiver's asymmetric key pair and transport MAC key.
///
/// Constructed once at startup and shared (behind an `Arc`) with every
/// component that needs key material.
pub struct KeyStore {
    dir: PathBuf,
    material: OnceCell<KeyMaterial>,
}

impl KeyStore {
    /// Creates a key store rooted at `dir`. Nothing is read or generated
    /// until the first access.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            material: OnceCell::new(),
        }
    }

    /// Creates a key store that already holds `key_pair` and
    /// `transport_mac_key`, skipping disk and RSA generation.
    #[cfg(test)]
    pub(crate) fn preloaded(
        dir: impl Into<PathBuf>,
        key_pair: KeyPair,
        transport_mac_key: MacKey,
    ) -> Self {
        let public_key_pem = key_pair
            .public_key_pem()
            .expect("test key pair encodes to PEM");
        Self {
            dir: dir.into(),
            material: OnceCell::new_with(Some(KeyMaterial {
                key_pair,
                public_key_pem,
                transport_mac_key,
            })),
        }
    }

    /// Loads the key material from disk, generating and persisting it if it
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the key directory cannot be created, the key files
    /// cannot be read or written, or their contents are invalid.
    pub async fn initialize(&self) -> Result<()> {
        self.material().await.map(|_| ())
    }

    async fn material(&self) -> Result<&KeyMaterial> {
        self.material
            .get_or_try_init(|| async {
                let dir = self.dir.clone();
                tokio::task::spawn_blocking(move || load_or_generate(&dir)).await?
            })
            .await
    }

    /// Returns the RSA key pair.
    pub async fn key_pair(&self) -> Result<&KeyPair> {
        Ok(&self.material().await?.key_pair)
    }

    /// Returns the public key as SPKI PEM.
    pub async fn public_key_pem(&self) -> Result<&str> {
        Ok(&self.material().await?.public_key_pem)
    }

    /// Returns the transport MAC key shared with senders.
    pub async fn transport_mac_key(&self) -> Result<&MacKey> {
        Ok(&self.material().await?.transport_mac_key)
    }

    /// Builds the public bootstrap document handed to senders.
    ///
    /// Contains the public key and transport MAC key only; the private key
    /// and per-artifact integrity keys are never part of it.
    pub async fn bootstrap(&self) -> Result<PublicKeyBootstrap> {
        let material = self.material().await?;
        Ok(PublicKeyBootstrap::new(
            material.public_key_pem.clone(),
            material.transport_mac_key.to_hex().to_string(),
            AlgorithmSuite::current(),
        ))
    }
}

fn load_or_generate(dir: &Path) -> Result<KeyMaterial> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating key directory {}", dir.display()))?;

    let public_path = dir.join(PUBLIC_KEY_FILE);
    let private_path = dir.join(PRIVATE_KEY_FILE);
    let hmac_path = dir.join(HMAC_KEY_FILE);

    let present = [&public_path, &private_path, &hmac_path]
        .iter()
        .filter(|p| p.exists())
        .count();

    if present == 3 {
        let material = load(&private_path, &hmac_path)?;
        info!("Loaded existing RSA key pair from {}", dir.display());
        return Ok(material);
    }

    if present > 0 {
        warn!(
            "Key directory {} is incomplete ({} of 3 files); regenerating all keys",
            dir.display(),
            present
        );
    }

    let material = generate()?;
    let private_pem = material.key_pair.private_key_pem()?;

    write_atomic(&private_path, private_pem.as_bytes(), true)?;
    write_atomic(&hmac_path, material.transport_mac_key.to_hex().as_bytes(), true)?;
    write_atomic(&public_path, material.public_key_pem.as_bytes(), false)?;

    info!("Generated new RSA key pair in {}", dir.display());
    Ok(material)
}

fn load(private_path: &Path, hmac_path: &Path) -> Result<KeyMaterial> {
    let private_pem = zeroize::Zeroizing::new(
        fs::read_to_string(private_path)
            .with_context(|| format!("reading {}", private_path.display()))?,
    );
    let key_pair = KeyPair::from_private_key_pem(&private_pem)?;

    let hmac_text = zeroize::Zeroizing::new(
        fs::read_to_string(hmac_path).with_context(|| format!("reading {}", hmac_path.display()))?,
    );
    let transport_mac_key = MacKey::from_hex(&hmac_text)?;

    // The public key is always re-derived from the private key so a stale
    // public.pem cannot be served.
    let public_key_pem = key_pair.public_key_pem()?;

    Ok(KeyMaterial {
        key_pair,
        public_key_pem,
        transport_mac_key,
    })
}

fn generate() -> Result<KeyMaterial> {
    let key_pair = engine::generate_asymmetric_key_pair()?;
    let public_key_pem = key_pair.public_key_pem()?;
    Ok(KeyMaterial {
        key_pair,
        public_key_pem,
        transport_mac_key: MacKey::generate(),
    })
}

/// Writes `contents` to a sibling temp file and renames it into place so a
/// crash never leaves a truncated key file behind.
fn write_atomic(path: &Path, contents: &[u8], owner_only: bool) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if owner_only {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    #[cfg(unix)]
    if owner_only {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = owner_only;

    fs::rename(&tmp, path).with_context(|| format!("installing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn generates_then_reloads_same_keys() {
        let temp = TempDir::new().unwrap();

        let first = KeyStore::new(temp.path().join("keys"));
        let pem = first.public_key_pem().await.unwrap().to_string();
        let mac = first.transport_mac_key().await.unwrap().clone();

        let second = KeyStore::new(temp.path().join("keys"));
        assert_eq!(second.public_key_pem().await.unwrap(), pem);
        assert_eq!(second.transport_mac_key().await.unwrap(), &mac);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn secret_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let store = KeyStore::new(temp.path());
        store.initialize().await.unwrap();

        for name in [PRIVATE_KEY_FILE, HMAC_KEY_FILE] {
            let mode = fs::metadata(temp.path().join(name)).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{} has mode {:o}", name, mode);
        }
    }

    #[tokio::test]
    async fn concurrent_first_access_initializes_once() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(KeyStore::new(temp.path()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.public_key_pem().await.unwrap().to_string() })
            })
            .collect();

        let mut pems = Vec::new();
        for handle in handles {
            pems.push(handle.await.unwrap());
        }
        assert!(pems.windows(2).all(|w| w[0] == w[1]));

        let on_disk = fs::read_to_string(temp.path().join(PUBLIC_KEY_FILE)).unwrap();
        assert_eq!(on_disk, pems[0]);
    }

    #[tokio::test]
    async fn bootstrap_never_contains_private_key() {
        let temp = TempDir::new().unwrap();
        let store = KeyStore::new(temp.path());
        let bootstrap = store.bootstrap().await.unwrap();
        let json = serde_json::to_string(&bootstrap).unwrap();

        assert!(json.contains("BEGIN PUBLIC KEY"));
        assert!(!json.contains("PRIVATE KEY"));
        assert_eq!(bootstrap.hmac_key, store.transport_mac_key().await.unwrap().to_hex());
        assert_eq!(bootstrap.algorithm.asymmetric, "RSA-2048-OAEP-SHA256");
    }

    #[tokio::test]
    async fn incomplete_directory_is_regenerated() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(PUBLIC_KEY_FILE), "stale").unwrap();

        let store = KeyStore::new(temp.path());
        let pem = store.public_key_pem().await.unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(temp.path().join(PRIVATE_KEY_FILE).exists());
    }
}
