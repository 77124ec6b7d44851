use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaDiffError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record at line {line}: expected {expected} fields, found {found}")]
    MalformedRecord {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Invalid path at line {line}: {path} ({reason})")]
    InvalidPath {
        line: u64,
        path: String,
        reason: String,
    },

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Column not found in load file header: {0}")]
    MissingColumn(String),

    #[error("Empty value for {field} at line {line}")]
    MissingField { line: u64, field: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Delimited text error: {0}")]
    Csv(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl MediaDiffError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MediaDiffError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaDiffError>;
