// sqlexport/src/config/mod.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{self, ExportError};
use crate::utils::host::{has_explicit_port, parse_host_port};

pub const DEFAULT_CONFIG_PATH: &str = "./Config.json";
pub const DB_PASS_ENV: &str = "DB_PASS";
pub const FTP_PASS_ENV: &str = "FTP_PASS";
const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_POSTGRES_PORT: &str = "5432";

/// Database driver used to run the export queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbDriver {
    #[default]
    #[serde(alias = "mssql")]
    SqlServer,
    #[serde(alias = "postgresql")]
    Postgres,
}

/// One `(filename, query)` pair from the `files` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub filename: String,
    pub query: String,
}

// Missing keys deserialize to their zero value, so a partial Config.json
// still loads and is rejected later by `validate` only where it matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub ftp_host: String,
    pub ftp_port: String,
    pub ftp_user: String,
    pub ftp_pass: String,
    pub ftp_folder: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ftp_known_hosts: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ftp_host_fingerprint: Option<String>,
    pub localpath: String,
    pub db_driver: DbDriver,
    pub db_host: String,
    pub db_port: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    pub db_timeout: String,
    pub db_trust_server_certificate: bool,
    pub upload_files: bool,
    pub delete_files: bool,
    pub zip_files: bool,
    pub files: Vec<ExportJob>,
}

impl ClientConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let config: ClientConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Ok(config)
    }

    /// Fills empty passwords from `DB_PASS` / `FTP_PASS`.
    pub fn resolve_secrets(&mut self) -> errors::Result<()> {
        self.resolve_secrets_with(|key| env::var(key).ok())
    }

    /// Same as [`resolve_secrets`](Self::resolve_secrets) with a custom lookup.
    /// Both passwords are required whether or not uploads are enabled.
    pub fn resolve_secrets_with<F>(&mut self, lookup: F) -> errors::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.db_pass.is_empty() {
            self.db_pass = lookup(DB_PASS_ENV)
                .filter(|v| !v.is_empty())
                .ok_or(ExportError::MissingSecret {
                    what: "database password",
                    field: "db_pass",
                    env_var: DB_PASS_ENV,
                })?;
        }

        if self.ftp_pass.is_empty() {
            self.ftp_pass = lookup(FTP_PASS_ENV)
                .filter(|v| !v.is_empty())
                .ok_or(ExportError::MissingSecret {
                    what: "ftp password",
                    field: "ftp_pass",
                    env_var: FTP_PASS_ENV,
                })?;
        }
        Ok(())
    }

    /// Checks everything that can be checked before touching the network.
    pub fn validate(&self) -> errors::Result<()> {
        for (index, job) in self.files.iter().enumerate() {
            if job.filename.trim().is_empty() {
                return Err(ExportError::Config(format!(
                    "files[{}]: filename cannot be empty",
                    index
                )));
            }
            if job.filename.contains(['/', '\\']) {
                return Err(ExportError::Config(format!(
                    "files[{}]: filename '{}' must not contain path separators",
                    index, job.filename
                )));
            }
            if job.query.trim().is_empty() {
                return Err(ExportError::Config(format!(
                    "files[{}] ('{}'): query cannot be empty",
                    index, job.filename
                )));
            }
        }

        if self.upload_files {
            if self.ftp_host.trim().is_empty() {
                return Err(ExportError::Config(
                    "ftp_host must be set when upload_files is enabled".to_string(),
                ));
            }
            if self.ftp_user.trim().is_empty() {
                return Err(ExportError::Config(
                    "ftp_user must be set when upload_files is enabled".to_string(),
                ));
            }
        }

        self.sftp_port()?;
        self.db_endpoint()?;
        self.query_timeout()?;
        Ok(())
    }

    /// Resolves the database host and port.
    ///
    /// A port embedded in `db_host` wins over `db_port`; with neither the
    /// driver's default applies.
    pub fn db_endpoint(&self) -> errors::Result<(String, u16)> {
        let (host, parsed_port) = parse_host_port(self.db_host.trim());
        let port = if has_explicit_port(&self.db_host) {
            parsed_port
        } else if !self.db_port.trim().is_empty() {
            self.db_port.trim().to_string()
        } else {
            match self.db_driver {
                DbDriver::SqlServer => parsed_port,
                DbDriver::Postgres => DEFAULT_POSTGRES_PORT.to_string(),
            }
        };
        let port = parse_port(&port, "db_port")?;
        Ok((host, port))
    }

    pub fn sftp_port(&self) -> errors::Result<u16> {
        if self.ftp_port.trim().is_empty() {
            return Ok(DEFAULT_SFTP_PORT);
        }
        parse_port(&self.ftp_port, "ftp_port")
    }

    /// `db_timeout` in seconds; empty or `0` means unbounded.
    pub fn query_timeout(&self) -> errors::Result<Option<Duration>> {
        let raw = self.db_timeout.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<u64>()
            .map(|secs| (secs > 0).then(|| Duration::from_secs(secs)))
            .map_err(|_| {
                ExportError::Config(format!(
                    "db_timeout must be a whole number of seconds, got '{}'",
                    raw
                ))
            })
    }

    /// Directory the export files are written to.
    pub fn local_dir(&self) -> PathBuf {
        if self.localpath.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.localpath)
        }
    }
}

fn parse_port(raw: &str, field: &str) -> errors::Result<u16> {
    raw.trim().parse::<u16>().map_err(|_| {
        ExportError::Config(format!("{} must be a valid port number, got '{}'", field, raw))
    })
}
