use super::config::Config;
use super::setup;
use crate::web::{self, auth::HeaderPrincipalResolver, AppState};
use anyhow::Result;
use std::sync::Arc;

/// Runs the receiver HTTP service until it fails.
pub async fn run(config: Config) -> Result<()> {
    println!("🔐 Starting sealdrop receiver");
    println!("Bind address: {}", config.bind);
    println!("Data directory: {}", config.data_dir.display());
    println!();

    let setup::PreparedApp { config, service } = setup::prepare(config).await?;

    let state = Arc::new(AppState {
        service,
        resolver: Arc::new(HeaderPrincipalResolver::new(config.admin_principal.clone())),
    });

    web::start_server(state, config.bind).await
}

/// Prints the bootstrap document senders need, generating keys if necessary.
pub async fn print_keys(config: Config) -> Result<()> {
    let prepared = setup::prepare(config).await?;
    let bootstrap = prepared.service.keys().bootstrap().await?;
    println!("{}", serde_json::to_string_pretty(&bootstrap)?);
    Ok(())
}
