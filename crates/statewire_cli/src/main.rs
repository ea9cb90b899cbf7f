//! Statewire CLI
//!
//! Runs a statewire live server.
//!
//! # Commands
//!
//! - `serve` - Serve the counter demo over WebSocket
//! - `version` - Show version information

mod commands;
mod demo;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Statewire live server.
#[derive(Parser)]
#[command(name = "statewire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the counter demo
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Seconds an idle session is kept
        #[arg(long, default_value = "300")]
        ttl_secs: u64,

        /// Seconds between expiry sweeps
        #[arg(long, default_value = "60")]
        sweep_secs: u64,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            ttl_secs,
            sweep_secs,
        } => {
            commands::serve::run(bind, ttl_secs, sweep_secs)?;
        }
        Commands::Version => {
            println!("Statewire CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Statewire Engine v{}", statewire_engine::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["statewire", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                bind,
                ttl_secs,
                sweep_secs,
            } => {
                assert_eq!(bind, SocketAddr::from(([127, 0, 0, 1], 8080)));
                assert_eq!(ttl_secs, 300);
                assert_eq!(sweep_secs, 60);
            }
            Commands::Version => panic!("expected serve"),
        }
    }

    #[test]
    fn serve_flags() {
        let cli = Cli::try_parse_from([
            "statewire",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--ttl-secs",
            "30",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { ttl_secs: 30, .. }));
    }
}
