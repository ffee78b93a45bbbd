// sqlexport/src/export/csv_writer.rs
use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::errors::ExportError;

/// Result-set sink writing one CSV file: a header row followed by one record
/// per database row. Quoting of embedded delimiters is left to the `csv` crate.
pub struct CsvExport {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows_written: u64,
}

impl CsvExport {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            rows_written: 0,
        })
    }

    pub fn write_header<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<()> {
        self.writer
            .write_record(columns.iter().map(|c| c.as_ref()))
            .map_err(|source| self.output_error("CSV header".to_string(), source))?;
        Ok(())
    }

    pub fn write_row<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<()> {
        self.writer
            .write_record(fields.iter().map(|f| f.as_ref()))
            .map_err(|source| self.output_error(format!("row {}", self.rows_written + 1), source))?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flushes buffered output and closes the file, returning the row count.
    pub fn finish(mut self) -> Result<u64> {
        self.writer
            .flush()
            .map_err(|e| self.output_error("buffered rows".to_string(), e.into()))?;
        Ok(self.rows_written)
    }

    fn output_error(&self, what: String, source: csv::Error) -> ExportError {
        ExportError::Output {
            what,
            path: self.path.clone(),
            source,
        }
    }
}
