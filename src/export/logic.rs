// sqlexport/src/export/logic.rs
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::archive::zip_csv_file;
use super::csv_writer::CsvExport;
use super::db::QuerySource;
use crate::config::{ClientConfig, ExportJob};
use crate::errors::ExportError;
use crate::transfer::FileUploader;
use crate::utils::naming::export_file_name;

/// What happened to a single export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub file_name: String,
    pub path: PathBuf,
    pub rows: u64,
    pub bytes_uploaded: Option<u64>,
    pub deleted: bool,
}

/// Runs every configured job in order.
///
/// Each job goes through query, CSV write, optional zip, optional upload and
/// optional delete. The first failing step aborts the whole run; jobs after it
/// are not attempted and files already produced are left in place.
pub async fn perform_export_orchestration<Q, U>(
    config: &ClientConfig,
    source: &mut Q,
    uploader: &mut U,
    run_date: NaiveDate,
) -> Result<Vec<JobOutcome>>
where
    Q: QuerySource + Send,
    U: FileUploader + Send,
{
    let local_dir = config.local_dir();
    if config.delete_files && !config.upload_files {
        warn!("delete_files is set but upload_files is not; local files will be kept");
    }

    let mut outcomes = Vec::with_capacity(config.files.len());
    for job in &config.files {
        let outcome = run_job(config, job, &local_dir, source, uploader, run_date)
            .await
            .with_context(|| format!("Export job '{}' failed", job.filename))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

async fn run_job<Q, U>(
    config: &ClientConfig,
    job: &ExportJob,
    local_dir: &Path,
    source: &mut Q,
    uploader: &mut U,
    run_date: NaiveDate,
) -> Result<JobOutcome>
where
    Q: QuerySource + Send,
    U: FileUploader + Send,
{
    info!("📄 {} loading started", job.filename);

    let mut file_name = export_file_name(&job.filename, run_date);
    let mut path = local_dir.join(&file_name);

    let mut out = CsvExport::create(&path)?;
    source
        .export_query(&job.query, &mut out)
        .await
        .map_err(|e| query_error(job, e))?;
    let rows = out.finish()?;
    info!("✓ Wrote {} rows to {}", rows, path.display());

    if config.zip_files {
        path = zip_csv_file(&path)?;
        file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid archive file name: {}", path.display()))?
            .to_string();
    }

    let mut bytes_uploaded = None;
    if config.upload_files {
        let bytes = uploader.upload(&path, &file_name).await?;
        info!("✅ File {} uploaded ({} bytes)", file_name, bytes);
        bytes_uploaded = Some(bytes);
    }

    let mut deleted = false;
    if config.delete_files && bytes_uploaded.is_some() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete local file: {}", path.display()))?;
        info!("🗑 Deleted local file {}", path.display());
        deleted = true;
    }

    Ok(JobOutcome {
        file_name,
        path,
        rows,
        bytes_uploaded,
        deleted,
    })
}

/// Tags a failed export as a query error unless the failure came from writing
/// the local CSV file, which keeps its own error and source chain.
fn query_error(job: &ExportJob, err: anyhow::Error) -> anyhow::Error {
    if matches!(
        err.downcast_ref::<ExportError>(),
        Some(ExportError::Output { .. })
    ) {
        return err;
    }
    ExportError::Query {
        job: job.filename.clone(),
        message: format!("{:#}", err),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves canned result sets keyed by query text.
    struct FakeSource {
        results: HashMap<String, (Vec<&'static str>, Vec<Vec<&'static str>>)>,
        executed: Vec<String>,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                results: HashMap::new(),
                executed: Vec::new(),
            }
        }

        fn with(mut self, query: &str, header: Vec<&'static str>, rows: Vec<Vec<&'static str>>) -> Self {
            self.results.insert(query.to_string(), (header, rows));
            self
        }
    }

    #[async_trait]
    impl QuerySource for FakeSource {
        async fn export_query(&mut self, query: &str, out: &mut CsvExport) -> Result<()> {
            self.executed.push(query.to_string());
            let (header, rows) = self
                .results
                .get(query)
                .ok_or_else(|| anyhow::anyhow!("Invalid object name in '{}'", query))?;
            out.write_header(header)?;
            for row in rows {
                out.write_row(row)?;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingUploader {
        uploads: Vec<(String, Vec<u8>)>,
        fail: bool,
    }

    #[async_trait]
    impl FileUploader for RecordingUploader {
        async fn upload(&mut self, local_path: &Path, file_name: &str) -> Result<u64> {
            if self.fail {
                return Err(ExportError::Transfer("connection refused".to_string()).into());
            }
            let content = fs::read(local_path)?;
            let len = content.len() as u64;
            self.uploads.push((file_name.to_string(), content));
            Ok(len)
        }
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn config_for(dir: &Path, jobs: &[(&str, &str)]) -> ClientConfig {
        ClientConfig {
            localpath: dir.display().to_string(),
            files: jobs
                .iter()
                .map(|(filename, query)| ExportJob {
                    filename: filename.to_string(),
                    query: query.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn files_in(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names = fs::read_dir(dir)?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    #[tokio::test]
    async fn test_single_job_zipped_without_upload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config_for(dir.path(), &[("report", "SELECT id, name FROM t")]);
        config.zip_files = true;
        config.delete_files = false;
        config.upload_files = false;

        let mut source = FakeSource::new().with(
            "SELECT id, name FROM t",
            vec!["id", "name"],
            vec![vec!["1", "a"], vec!["2", "b"]],
        );
        let mut uploader = RecordingUploader::default();

        let outcomes =
            perform_export_orchestration(&config, &mut source, &mut uploader, run_date()).await?;

        assert_eq!(files_in(dir.path())?, vec!["report_2024-03-05.zip".to_string()]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].file_name, "report_2024-03-05.zip");
        assert_eq!(outcomes[0].rows, 2);
        assert_eq!(outcomes[0].bytes_uploaded, None);
        assert!(uploader.uploads.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_plain_csv_contents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config_for(dir.path(), &[("customers", "q1")]);
        let mut source = FakeSource::new().with(
            "q1",
            vec!["id", "name"],
            vec![vec!["1", "Smith, John"], vec!["2", ""]],
        );

        perform_export_orchestration(&config, &mut source, &mut RecordingUploader::default(), run_date())
            .await?;

        let content = fs::read_to_string(dir.path().join("customers_2024-03-05.csv"))?;
        assert_eq!(content, "id,name\n1,\"Smith, John\"\n2,\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_then_delete() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config_for(dir.path(), &[("orders", "q1"), ("refunds", "q2")]);
        config.upload_files = true;
        config.delete_files = true;

        let mut source = FakeSource::new()
            .with("q1", vec!["id"], vec![vec!["1"]])
            .with("q2", vec!["id"], vec![]);
        let mut uploader = RecordingUploader::default();

        let outcomes =
            perform_export_orchestration(&config, &mut source, &mut uploader, run_date()).await?;

        assert_eq!(source.executed, vec!["q1", "q2"]);
        assert_eq!(uploader.uploads.len(), 2);
        assert_eq!(uploader.uploads[0].0, "orders_2024-03-05.csv");
        assert_eq!(uploader.uploads[0].1, b"id\n1\n");
        assert_eq!(uploader.uploads[1].0, "refunds_2024-03-05.csv");
        assert!(outcomes.iter().all(|o| o.deleted));
        assert_eq!(outcomes[0].bytes_uploaded, Some(5));
        assert!(files_in(dir.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_zipped_upload_sends_archive_name() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config_for(dir.path(), &[("orders", "q1")]);
        config.zip_files = true;
        config.upload_files = true;

        let mut source = FakeSource::new().with("q1", vec!["id"], vec![vec!["1"]]);
        let mut uploader = RecordingUploader::default();
        perform_export_orchestration(&config, &mut source, &mut uploader, run_date()).await?;

        assert_eq!(uploader.uploads[0].0, "orders_2024-03-05.zip");
        // Starts with the zip local file header signature.
        assert_eq!(&uploader.uploads[0].1[..4], b"PK\x03\x04");
        assert_eq!(files_in(dir.path())?, vec!["orders_2024-03-05.zip".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_requires_upload() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config_for(dir.path(), &[("orders", "q1")]);
        config.delete_files = true;

        let mut source = FakeSource::new().with("q1", vec!["id"], vec![]);
        let outcomes = perform_export_orchestration(
            &config,
            &mut source,
            &mut RecordingUploader::default(),
            run_date(),
        )
        .await?;

        assert!(!outcomes[0].deleted);
        assert_eq!(files_in(dir.path())?, vec!["orders_2024-03-05.csv".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_failure_aborts_remaining_jobs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config_for(dir.path(), &[("first", "q1"), ("broken", "bad"), ("third", "q3")]);
        let mut source = FakeSource::new()
            .with("q1", vec!["id"], vec![vec!["1"]])
            .with("q3", vec!["id"], vec![vec!["3"]]);

        let err = perform_export_orchestration(
            &config,
            &mut source,
            &mut RecordingUploader::default(),
            run_date(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::Query { job, .. }) if job == "broken"
        ));
        assert_eq!(source.executed, vec!["q1", "bad"]);
        assert!(!dir.path().join("third_2024-03-05.csv").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_csv_write_failure_is_not_a_query_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config_for(dir.path(), &[("ragged", "q1")]);
        let mut source = FakeSource::new().with("q1", vec!["id", "name"], vec![vec!["1"]]);

        let err = perform_export_orchestration(
            &config,
            &mut source,
            &mut RecordingUploader::default(),
            run_date(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::Output { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_local_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config_for(dir.path(), &[("orders", "q1")]);
        config.upload_files = true;
        config.delete_files = true;

        let mut source = FakeSource::new().with("q1", vec!["id"], vec![]);
        let mut uploader = RecordingUploader {
            fail: true,
            ..Default::default()
        };

        let err = perform_export_orchestration(&config, &mut source, &mut uploader, run_date())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::Transfer(_))
        ));
        assert!(dir.path().join("orders_2024-03-05.csv").exists());
        Ok(())
    }
}
