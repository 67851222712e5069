//! Typed error enums for the boundaries this crate owns. Orchestration code
//! (loops, `main`) converts these into `anyhow::Result` with `.context(...)`;
//! only `BootError` is allowed to end the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    BadStatus(reqwest::StatusCode),
    #[error("upstream payload was not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("failed to write {path}: {source}")]
    FileWrite { path: String, source: std::io::Error },
    #[error("failed to serialize history for {path}: {source}")]
    Serialize { path: String, source: serde_json::Error },
}

/// Carries no detail distinguishing "wrong secret" from "no secret
/// configured" — both are `Forbidden`, so a probe can't learn which.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("forbidden")]
    Forbidden,
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Error)]
pub enum BootError {
    #[error("{field} is required but was not set")]
    MissingRequired { field: &'static str },
    #[error("{field} could not be parsed from '{value}'")]
    Unparseable { field: &'static str, value: String },
    #[error("geo directory is unreadable: {0}")]
    GeoDirectory(#[from] vncrcc_core::GeoError),
    #[error("database initialization failed: {0}")]
    Database(#[from] sqlx::Error),
}
