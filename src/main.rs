//! SQL to CSV export tool
//!
//! Runs the configured queries, writes each result set to a dated CSV file and
//! optionally zips, uploads over SFTP and removes the local copy.

// sqlexport/src/main.rs
mod config;
mod errors;
mod export;
mod transfer;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{ClientConfig, DEFAULT_CONFIG_PATH};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sqlexport",
    version,
    about = "Export SQL query results to CSV and deliver them over SFTP"
)]
struct Args {
    /// Path to the JSON client config
    #[arg(short = 'c', long = "conf", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    conf: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

/// Main entry point for the export tool
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse_from(normalize_legacy_args(env::args()));
    initialize_logging(args.verbose);

    match run_app(&args).await {
        Ok(_) => {
            println!("✅ Export completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(args: &Args) -> Result<()> {
    // Secrets may live in a .env file next to the config; a missing file is fine.
    dotenv::dotenv().ok();

    info!("Loading config from {}", args.conf.display());
    let mut client_config = ClientConfig::load_from_json(&args.conf).with_context(|| {
        format!(
            "Error importing json config, check path ({})",
            args.conf.display()
        )
    })?;
    client_config.resolve_secrets()?;
    client_config.validate()?;

    export::run_export_flow(&client_config)
        .await
        .context("Export process failed")?;
    Ok(())
}

/// Accepts the single-dash `-conf` spelling by rewriting it to `--conf`.
fn normalize_legacy_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            if arg == "-conf" || arg.starts_with("-conf=") {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

fn initialize_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
