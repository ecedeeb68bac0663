pub mod args;
pub mod config;
mod sender;
mod server;
mod setup;

pub use args::AppArgs;

use anyhow::Result;
use args::Command;
use config::Config;

pub async fn launch() -> Result<()> {
    launch_with_args(AppArgs::from_cli()).await
}

pub async fn launch_with_args(args: AppArgs) -> Result<()> {
    let config = Config::resolve(&args)?;
    setup::configure_logging(&config);

    match args.command {
        Command::Serve { .. } => server::run(config).await,
        Command::Keys => server::print_keys(config).await,
        Command::Send {
            file,
            server,
            sender,
            insecure,
        } => {
            let options = sender::SendOptions {
                server,
                sender_info: sender,
                insecure,
            };
            let receipt = sender::send_file(&file, &options).await?;
            sender::print_receipt(&receipt);
            Ok(())
        }
    }
}
