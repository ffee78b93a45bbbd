// sqlexport/src/transfer/sftp_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ssh2::{CheckResult, HashType, KnownHostFileKind, Session};
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::FileUploader;
use crate::config::ClientConfig;
use crate::errors::ExportError;
use crate::utils::naming::remote_file_path;

/// Connection details for the SFTP destination, detached from the rest of
/// the config so they can move onto a blocking worker.
#[derive(Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub folder: String,
    pub known_hosts: Option<PathBuf>,
    pub host_fingerprint: Option<String>,
}

impl SftpSettings {
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            host: config.ftp_host.trim().to_string(),
            port: config.sftp_port()?,
            user: config.ftp_user.clone(),
            password: config.ftp_pass.clone(),
            folder: config.ftp_folder.clone(),
            known_hosts: config.ftp_known_hosts.clone(),
            host_fingerprint: config
                .ftp_host_fingerprint
                .clone()
                .filter(|f| !f.trim().is_empty()),
        })
    }
}

pub struct SftpUploader {
    settings: SftpSettings,
}

impl SftpUploader {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl FileUploader for SftpUploader {
    async fn upload(&mut self, local_path: &Path, file_name: &str) -> Result<u64> {
        let settings = self.settings.clone();
        let local_path = local_path.to_path_buf();
        let remote_path = remote_file_path(&settings.folder, file_name);

        // libssh2 is blocking; keep it off the runtime thread.
        tokio::task::spawn_blocking(move || upload_file_to_sftp(&settings, &local_path, &remote_path))
            .await
            .context("SFTP upload task did not complete")?
    }
}

/// Uploads a local file to `remote_path` on the SFTP server in one write.
pub fn upload_file_to_sftp(settings: &SftpSettings, local_path: &Path, remote_path: &str) -> Result<u64> {
    let content = fs::read(local_path)
        .with_context(|| format!("Failed to read file for upload: {}", local_path.display()))?;

    let addr = format!("{}:{}", settings.host, settings.port);
    info!(
        "📤 Uploading {} to {}",
        local_path.display(),
        upload_target(settings, remote_path)
    );

    let tcp = TcpStream::connect(&addr).map_err(|e| transfer_error(format!("Failed to dial {}", addr), e))?;
    let mut session = Session::new().map_err(|e| transfer_error("Failed to create SSH session", e))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| transfer_error(format!("SSH handshake with {} failed", addr), e))?;

    verify_host_key(&session, settings)?;

    session
        .userauth_password(&settings.user, &settings.password)
        .map_err(|e| transfer_error(format!("Authentication as {} failed", settings.user), e))?;
    if !session.authenticated() {
        return Err(ExportError::Transfer(format!(
            "Server {} did not accept credentials for {}",
            addr, settings.user
        ))
        .into());
    }

    let sftp = session
        .sftp()
        .map_err(|e| transfer_error("Failed to open SFTP subsystem", e))?;
    let mut remote_file = sftp
        .create(Path::new(remote_path))
        .map_err(|e| transfer_error(format!("Failed to create remote file {}", remote_path), e))?;
    let transferred = write_and_close(&mut remote_file, &content, remote_path, |f| f.close())?;
    info!("Bytes transferred: {}", transferred);

    if let Ok(cwd) = sftp.realpath(Path::new(".")) {
        debug!("Remote working directory: {}", cwd.display());
    }

    drop(remote_file);
    drop(sftp);
    if let Err(e) = session.disconnect(None, "upload complete", None) {
        warn!("SSH disconnect from {} was not clean: {}", addr, e);
    }

    Ok(transferred)
}

/// Writes the whole payload and closes the remote handle. The server may only
/// report quota or flush failures on close, so its result is not ignored.
fn write_and_close<W, E>(
    remote: &mut W,
    content: &[u8],
    remote_path: &str,
    close: impl FnOnce(&mut W) -> std::result::Result<(), E>,
) -> Result<u64>
where
    W: Write,
    E: Display,
{
    remote
        .write_all(content)
        .map_err(|e| transfer_error(format!("Failed to write remote file {}", remote_path), e))?;
    close(remote).map_err(|e| transfer_error(format!("Failed to close remote file {}", remote_path), e))?;
    Ok(content.len() as u64)
}

fn upload_target(settings: &SftpSettings, remote_path: &str) -> String {
    format!(
        "{} on {}@{}:{}",
        remote_path, settings.user, settings.host, settings.port
    )
}

fn transfer_error(context: impl Into<String>, err: impl Display) -> ExportError {
    ExportError::Transfer(format!("{}: {}", context.into(), err))
}

/// Checks the server's host key against a pinned fingerprint when one is
/// configured, otherwise against the known_hosts file.
fn verify_host_key(session: &Session, settings: &SftpSettings) -> Result<()> {
    let host_key_error = |reason: String| ExportError::HostKey {
        host: settings.host.clone(),
        reason,
    };

    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| host_key_error("server did not present a host key".to_string()))?;

    if let Some(expected) = &settings.host_fingerprint {
        let hash = session
            .host_key_hash(HashType::Sha256)
            .ok_or_else(|| host_key_error("SHA256 host key hash unavailable".to_string()))?;
        let actual = sha256_fingerprint(hash);
        if !fingerprints_match(expected, &actual) {
            return Err(host_key_error(format!(
                "fingerprint {} does not match configured {}",
                actual, expected
            ))
            .into());
        }
        debug!("Host key fingerprint {} matches", actual);
        return Ok(());
    }

    let known_hosts_path = match &settings.known_hosts {
        Some(path) => path.clone(),
        None => default_known_hosts()
            .ok_or_else(|| host_key_error("cannot locate home directory for known_hosts".to_string()))?,
    };

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| host_key_error(format!("cannot initialise known_hosts: {}", e)))?;
    known_hosts
        .read_file(&known_hosts_path, KnownHostFileKind::OpenSSH)
        .map_err(|e| {
            host_key_error(format!(
                "cannot read {}: {}",
                known_hosts_path.display(),
                e
            ))
        })?;

    match known_hosts.check_port(&settings.host, settings.port, key) {
        CheckResult::Match => {
            debug!("Host key for {} found in {}", settings.host, known_hosts_path.display());
            Ok(())
        }
        CheckResult::Mismatch => Err(host_key_error(format!(
            "host key does not match the entry in {}",
            known_hosts_path.display()
        ))
        .into()),
        CheckResult::NotFound => Err(host_key_error(format!(
            "host is not listed in {}; add it or set ftp_host_fingerprint",
            known_hosts_path.display()
        ))
        .into()),
        CheckResult::Failure => Err(host_key_error("known_hosts check failed".to_string()).into()),
    }
}

fn default_known_hosts() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// OpenSSH style `SHA256:<base64>` rendering of a host key hash.
fn sha256_fingerprint(hash: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash))
}

fn fingerprints_match(expected: &str, actual: &str) -> bool {
    fn normalize(fp: &str) -> &str {
        let fp = fp.trim();
        let fp = fp.strip_prefix("SHA256:").unwrap_or(fp);
        fp.trim_end_matches('=')
    }
    normalize(expected) == normalize(actual)
}
