//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Server host to connect to (client commands)
    #[arg(long)]
    pub host: Option<String>,

    /// Server port to connect to (client commands)
    #[arg(long)]
    pub port: Option<u16>,

    /// Client state file path
    #[arg(long)]
    pub state_file: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the socket server
    Serve {
        /// Address to bind, e.g. 127.0.0.1:7464
        #[arg(short, long)]
        bind: Option<String>,
        /// Worker pool size
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Generate an X25519 key pair and print it
    Keygen,
    /// Create a session on the server
    CreateSession {
        /// Session id to register; a fresh one is fabricated when omitted
        #[arg(short, long)]
        session_id: Option<String>,
    },
    /// Exchange public keys against an existing session
    Handshake {
        /// Session id to handshake against; defaults to the remembered one
        #[arg(short, long)]
        session_id: Option<String>,
    },
    /// Query server time, session count, and encryption status
    Status,
    /// Look up a server-side configuration value
    ConfigGet {
        /// Configuration key
        key: String,
    },
}
