// sqlexport/src/export/archive.rs
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::ExportError;
use crate::utils::naming::zip_path_for;

/// Compresses a CSV file into a single-entry zip archive next to it.
///
/// The archive gets the CSV's stem with a `.zip` extension and its only
/// entry is named after the CSV file. Once the entry has been verified the
/// source CSV is removed.
///
/// # Returns
/// Path to the created archive.
pub fn zip_csv_file(csv_path: &Path) -> Result<PathBuf> {
    if !csv_path.is_file() {
        return Err(ExportError::Archive(format!(
            "Source for archival is not a file: {}",
            csv_path.display()
        ))
        .into());
    }
    let entry_name = csv_path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid CSV file name: {}", csv_path.display()))?
        .to_string();
    let zip_path = zip_path_for(csv_path);

    info!("🗜 Compressing {} to {}", csv_path.display(), zip_path.display());

    let csv_len = fs::metadata(csv_path)
        .with_context(|| format!("Failed to stat CSV file: {}", csv_path.display()))?
        .len();

    let zip_file = File::create(&zip_path)
        .with_context(|| format!("Failed to create archive file: {}", zip_path.display()))?;
    let mut archive = ZipWriter::new(BufWriter::new(zip_file));
    let options = entry_options(csv_len);

    archive
        .start_file(entry_name.as_str(), options)
        .with_context(|| format!("Failed to add entry {} to archive", entry_name))?;

    let source_len = {
        let mut source = BufReader::new(
            File::open(csv_path)
                .with_context(|| format!("Failed to open CSV file: {}", csv_path.display()))?,
        );
        io::copy(&mut source, &mut archive).with_context(|| {
            format!(
                "Failed to copy {} into archive {}",
                csv_path.display(),
                zip_path.display()
            )
        })?
    };

    let mut zip_writer = archive
        .finish()
        .with_context(|| format!("Failed to finish archive: {}", zip_path.display()))?;
    zip_writer
        .flush()
        .with_context(|| format!("Failed to flush archive: {}", zip_path.display()))?;
    drop(zip_writer);

    verify_single_entry(&zip_path, &entry_name, source_len)?;

    fs::remove_file(csv_path)
        .with_context(|| format!("Failed to delete source CSV: {}", csv_path.display()))?;
    debug!("Removed source CSV {}", csv_path.display());

    info!("✓ Archive created at {} ({} bytes of CSV)", zip_path.display(), source_len);
    Ok(zip_path)
}

/// Deflated entry options; entries past the 4 GiB zip limit need ZIP64.
fn entry_options(source_len: u64) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(source_len >= u64::from(u32::MAX))
}

/// Reopens a freshly written archive and checks the entry is there with the
/// expected uncompressed size.
fn verify_single_entry(zip_path: &Path, entry_name: &str, expected_len: u64) -> Result<()> {
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to reopen archive: {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Archive is not readable: {}", zip_path.display()))?;
    let entry = archive
        .by_name(entry_name)
        .with_context(|| format!("Entry {} missing from {}", entry_name, zip_path.display()))?;

    if entry.size() != expected_len {
        return Err(ExportError::Archive(format!(
            "Entry {} in {} holds {} bytes, expected {}",
            entry_name,
            zip_path.display(),
            entry.size(),
            expected_len
        ))
        .into());
    }
    Ok(())
}
