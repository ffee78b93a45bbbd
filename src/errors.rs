use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing {what}: `{field}` is empty in the config and {env_var} is not set")]
    MissingSecret {
        what: &'static str,
        field: &'static str,
        env_var: &'static str,
    },

    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Query for '{job}' failed: {message}")]
    Query { job: String, message: String },

    #[error("Failed to write {what} to {}", .path.display())]
    Output {
        what: String,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Archive operation failed: {0}")]
    Archive(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Host key verification failed for {host}: {reason}")]
    HostKey { host: String, reason: String },

    #[error("Operation timed out after {secs} seconds: {operation}")]
    Timeout { operation: String, secs: u64 },
}

pub type Result<T> = std::result::Result<T, ExportError>;
