//! Upload, download and delete orchestration over the ledger and file store.
pub mod policy;
pub mod service;
pub mod verdict;

pub use service::TransferService;
pub use verdict::IntegrityVerdict;
