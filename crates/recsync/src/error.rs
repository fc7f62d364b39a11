use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecsyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mail provider error: {0}")]
    Mail(#[from] crate::mail::MailError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Preview error: {0}")]
    Preview(#[from] PreviewError),

    #[error("File store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to parse MIME message")]
    MalformedMessage,

    #[error("Failed to extract PDF text: {0}")]
    PdfText(String),
}

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Renderer '{renderer}' failed: {reason}")]
    RendererFailed { renderer: String, reason: String },

    #[error("All {attempted} snapshot renderers failed, last error: {last_error}")]
    AllRenderersFailed { attempted: usize, last_error: String },

    #[error("Render timed out after {seconds}s in '{renderer}'")]
    Timeout { renderer: String, seconds: u64 },

    #[error("Thumbnail rendering failed: {0}")]
    Thumbnail(String),

    #[error("Render permit unavailable: semaphore closed")]
    PermitUnavailable,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write object '{key}': {source}")]
    WriteObject {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read object '{key}': {source}")]
    ReadObject {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock backend error for key '{key}': {reason}")]
    Backend { key: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync run not found: {0}")]
    RunNotFound(String),

    #[error("No mailbox connection for business '{0}'")]
    NoConnection(String),

    #[error("Mailbox for business '{0}' is disconnected")]
    Disconnected(String),

    #[error("Sync lock for business '{business_id}' is held elsewhere")]
    LockHeld { business_id: String },

    #[error("Run {run_id} is {status}, expected {expected}")]
    InvalidState {
        run_id: String,
        status: String,
        expected: String,
    },

    #[error("Invalid date range: from {from} is after to {to}")]
    InvalidDateRange { from: String, to: String },

    #[error("Invalid stored timestamp '{value}': {source}")]
    BadTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

pub type Result<T> = std::result::Result<T, RecsyncError>;
