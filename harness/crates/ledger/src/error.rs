use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Results file not found at {0}. Ensure the producing stage ran and saved its output")]
    NotFound(PathBuf),

    #[error("Results file {0} is empty. The producing stage might have failed to write its results")]
    Empty(PathBuf),

    #[error("Failed to parse results file {path}: {source}. Content preview: \"{preview}\"")]
    Malformed {
        path: PathBuf,
        preview: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Results file {0} does not contain a JSON array")]
    NotAList(PathBuf),

    #[error("No successful record for '{0}' found in the results file")]
    NoSuccessfulRecord(&'static str),

    #[error("Record for '{stage}' found, but '{field}' is missing or null")]
    MissingField { stage: String, field: &'static str },

    #[error("Record for '{stage}' holds an unusable contract ABI: {reason}")]
    InvalidAbi { stage: String, reason: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
