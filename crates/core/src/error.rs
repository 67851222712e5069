//! Error taxonomy for the geometry/detection layer: geometry repair
//! failure and malformed per-field observation parsing. Neither is fatal;
//! both are logged and handled by the caller (the geo registry loader and
//! the ingest parsing routine, respectively).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("failed to read geo directory {path}: {source}")]
    DirectoryUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: malformed GeoJSON: {source}")]
    MalformedFile {
        file: String,
        #[source]
        source: geojson::Error,
    },

    #[error("{file}: geometry invalid and repair failed: {reason}")]
    RepairFailed { file: String, reason: String },
}

/// A single malformed field in an upstream observation. Parse failures here
/// degrade only the offending field; they never abort ingest of the rest of
/// the snapshot.
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` could not be parsed from {raw:?}")]
    UnparseableField { field: &'static str, raw: String },
}
