mod logic;
pub(crate) mod archive; // Single-entry zip creation
pub(crate) mod csv_writer;
pub(crate) mod db; // Driver connections and result-set streaming

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::transfer::{SftpSettings, SftpUploader};
use db::Database;

/// Public entry point for the export process.
///
/// Connects once, runs every job against that connection and closes it again
/// whether or not the jobs succeeded.
pub async fn run_export_flow(config: &ClientConfig) -> Result<()> {
    if config.files.is_empty() {
        warn!("No files configured in 'files'. Nothing to export.");
        return Ok(());
    }

    let local_dir = config.local_dir();
    fs::create_dir_all(&local_dir)
        .with_context(|| format!("Failed to create local output directory: {}", local_dir.display()))?;
    info!("📂 Writing exports to {}", local_dir.display());

    let mut uploader = SftpUploader::new(SftpSettings::from_config(config)?);
    let mut database = Database::connect(config)
        .await
        .context("Cannot proceed with export - database connection failed")?;

    let run_date = Local::now().date_naive();
    let result =
        logic::perform_export_orchestration(config, &mut database, &mut uploader, run_date).await;

    if let Err(e) = database.close().await {
        warn!("{:#}", e);
    }

    let outcomes = result?;
    let total_rows: u64 = outcomes.iter().map(|o| o.rows).sum();
    let uploaded = outcomes.iter().filter(|o| o.bytes_uploaded.is_some()).count();
    info!(
        "🎉 Exported {} file(s), {} rows in total, {} uploaded",
        outcomes.len(),
        total_rows,
        uploaded
    );
    for outcome in &outcomes {
        if outcome.deleted {
            info!("   {} (uploaded, local copy removed)", outcome.file_name);
        } else {
            info!("   {}", outcome.path.display());
        }
    }
    Ok(())
}
