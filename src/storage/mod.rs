//! This module defines the storage substrates for artifacts: the integrity
//! ledger holding their metadata and the file store holding their bytes.
pub mod files;
pub mod ledger;

pub use files::FileStore;
pub use ledger::{IntegrityLedger, SledIntegrityLedger};
