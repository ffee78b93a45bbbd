pub(crate) mod sftp_upload;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use sftp_upload::{SftpSettings, SftpUploader};

/// Delivers a finished export file to its remote destination.
#[async_trait]
pub trait FileUploader {
    /// Uploads `local_path` as `file_name` and returns the number of bytes sent.
    async fn upload(&mut self, local_path: &Path, file_name: &str) -> Result<u64>;
}
