//! Crate-wide error type.

use std::io;
use thiserror::Error;

/// Errors that can occur while parsing annotation data or working with a
/// feature database.
#[derive(Error, Debug)]
pub enum GffError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("internally inconsistent attribute formatting: {0}")]
    AttributeString(String),

    #[error("duplicate ID: {0}")]
    DuplicateId(String),

    #[error("feature not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("inconsistent input: {0}")]
    InconsistentInput(String),

    #[error("no lines parsed -- was an empty file provided?")]
    EmptyInput,
}

impl GffError {
    /// Attach a line number to a parse error that was raised without one.
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            GffError::Parse { line: 0, message } => GffError::Parse { line, message },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, GffError>;
