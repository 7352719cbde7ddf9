use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chunkstream")]
#[command(author, version, about = "HTTP range streaming over pooled, rate-limited backend sessions")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Print the chunk fetch plan for a byte range
    Plan {
        /// Object size in bytes
        #[arg(long)]
        size: u64,

        /// Backend chunk size in bytes
        #[arg(long, default_value = "1048576")]
        chunk_size: u64,

        /// Range header value, e.g. "bytes=0-1023"
        #[arg(long)]
        range: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version information
    Version,
}
