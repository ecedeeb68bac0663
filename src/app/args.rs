use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "sealdrop")]
#[command(about = "Hybrid-encrypted file exchange with integrity verification")]
pub struct AppArgs {
    #[arg(long, global = true, help = "Config file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "SEALDROP_DATA_DIR",
        help = "Data directory [default: data]"
    )]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Log filter, e.g. info,sealdrop=debug")]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the receiver HTTP service
    Serve {
        #[arg(long, help = "Address to listen on [default: 127.0.0.1:3000]")]
        bind: Option<SocketAddr>,

        #[arg(long, help = "Largest accepted payload in bytes")]
        max_payload_bytes: Option<usize>,

        #[arg(long, help = "Principal that always has the admin role")]
        admin_principal: Option<String>,
    },

    /// Encrypt a file and send it to a receiver, as a third-party system would
    Send {
        /// File to send
        file: PathBuf,

        #[arg(long, default_value = "http://127.0.0.1:3000", help = "Receiver base URL")]
        server: String,

        #[arg(long, help = "Identifier sent as senderInfo")]
        sender: Option<String>,

        #[arg(long, help = "Accept self-signed TLS certificates")]
        insecure: bool,
    },

    /// Print the public key bootstrap document and exit
    Keys,
}

impl AppArgs {
    pub fn from_cli() -> Self {
        <Self as Parser>::parse()
    }
}
