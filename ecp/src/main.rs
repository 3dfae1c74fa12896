//! ECP CLI - External Credential Provider command-line interface
//!
//! Runs a kubelet-style credential provider plugin for an image and prints
//! the resulting credentials, the same way a registry resolver would obtain
//! them.

mod commands;

use clap::{Parser, Subcommand};
use ecp_lib::SelectionPolicy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ecp")]
#[command(author, version, about = "External Credential Provider CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch credentials for an image from a credential provider plugin
    Get {
        /// Fully qualified image reference (e.g. registry.example.com/team/app:1.0)
        image: String,

        /// Registry host used in diagnostics (defaults to the image's host)
        #[arg(long)]
        host: Option<String>,

        /// Path of the credential provider executable
        #[arg(long, env = "ECP_PLUGIN_PATH")]
        plugin: PathBuf,

        /// Seconds to wait for the plugin before killing it
        #[arg(long, env = "ECP_PLUGIN_TIMEOUT", default_value_t = 60)]
        timeout: u64,

        /// Entry selection when the plugin returns several: any | most-specific
        #[arg(long, env = "ECP_SELECTION", default_value_t = SelectionPolicy::Any)]
        selection: SelectionPolicy,
    },
    /// Display version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Get {
            image,
            host,
            plugin,
            timeout,
            selection,
        }) => {
            let args = commands::get::GetArgs {
                image,
                host,
                plugin,
                timeout,
                selection,
            };
            commands::get::run(args).await?;
        }
        Some(Commands::Version) => {
            println!("ecp {}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            println!("ECP CLI - use --help for usage information");
        }
    }

    Ok(())
}
