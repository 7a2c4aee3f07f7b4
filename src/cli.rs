use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chathub", about = "ChatHub connection configuration backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (the default when no subcommand is given).
    Serve {
        /// Override the port from CHATHUB_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print a fresh random value suitable for CONFIG_ENCRYPTION_KEY.
    GenKey,
}
