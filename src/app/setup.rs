//! This module handles the initial setup of the receiver.
use super::config::Config;
use crate::crypto::KeyStore;
use crate::storage::{FileStore, SledIntegrityLedger};
use crate::transfer::TransferService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Everything the receiver needs to serve requests.
pub struct PreparedApp {
    pub config: Config,
    pub service: Arc<TransferService>,
}

/// Prepares the receiver for running.
///
/// This function performs the following steps:
/// 1. Creates the data directory.
/// 2. Loads or generates the key material.
/// 3. Opens the integrity ledger.
/// 4. Opens the file store.
///
/// # Errors
///
/// This function will return an error if any of the setup steps fail.
pub async fn prepare(config: Config) -> Result<PreparedApp> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let keys = Arc::new(KeyStore::new(config.keys_dir()));
    keys.initialize().await?;

    let db = sled::open(config.ledger_dir())
        .with_context(|| format!("opening ledger at {}", config.ledger_dir().display()))?;
    let ledger = Arc::new(SledIntegrityLedger::new(db)?);

    let files = Arc::new(FileStore::new(config.files_dir())?);

    info!("Data directory: {}", config.data_dir.display());

    let service = Arc::new(
        TransferService::new(keys, ledger, files).with_max_payload_bytes(config.max_payload_bytes),
    );
    Ok(PreparedApp { config, service })
}

/// Installs the global `tracing` subscriber. Later calls have no effect.
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn configure_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.effective_log_filter()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
