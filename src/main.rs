//! The main entry point for the sealdrop receiver and sender.
mod app;
mod crypto;
mod error;
mod storage;
mod transfer;
mod types;
mod web;

use anyhow::Result;

/// The main function of the application.
///
/// Parses the command line and runs the selected subcommand: the receiver
/// service, the third-party sender, or the key bootstrap printer.
///
/// # Errors
///
/// Returns an error if setup fails or the selected subcommand fails.
#[tokio::main]
async fn main() -> Result<()> {
    app::launch().await
}
