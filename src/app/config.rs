//! Layered runtime configuration: defaults, then an optional JSON file, then
//! command-line flags and environment.
use super::args::{AppArgs, Command};
use crate::transfer::service::DEFAULT_MAX_PAYLOAD_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_LOG_FILTER: &str = "info,sealdrop=debug";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    pub max_payload_bytes: usize,
    /// Principal granted the admin role regardless of request headers.
    pub admin_principal: Option<String>,
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            admin_principal: None,
            log_filter: None,
        }
    }
}

impl Config {
    pub fn read_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Builds the effective configuration for `args`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file named by `--config` cannot be read
    /// or parsed.
    pub fn resolve(args: &AppArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::read_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(args);
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &AppArgs) {
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(filter) = &args.log_filter {
            self.log_filter = Some(filter.clone());
        }
        if let Command::Serve {
            bind,
            max_payload_bytes,
            admin_principal,
        } = &args.command
        {
            if let Some(bind) = bind {
                self.bind = *bind;
            }
            if let Some(max) = max_payload_bytes {
                self.max_payload_bytes = *max;
            }
            if let Some(admin) = admin_principal {
                self.admin_principal = Some(admin.clone());
            }
        }
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join("keys")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
