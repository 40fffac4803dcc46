use clap::{Parser, Subcommand};

/// Scribe Gateway: credential broker and API proxy
#[derive(Parser)]
#[command(name = "scribe-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to PORT, then 5000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Acquire a token once and print it
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Log in with LOGIN_USERNAME/LOGIN_PASSWORD
    Login,
    /// Fetch the token for an account (self endpoint, then upstream)
    Account {
        #[arg(long)]
        account_id: String,
    },
    /// Call the upstream token endpoint directly, once
    Direct {
        #[arg(long)]
        account_id: String,
    },
}
