use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::submitter::SubmissionResult;

#[derive(Debug, Error, Diagnostic)]
pub enum Gen3Error {
    #[error("invalid project id (expected <program>-<project>): {0}")]
    InvalidProjectId(String),

    #[error("unsupported table format: {0}")]
    #[diagnostic(help("upload a file in CSV, TSV, TXT or XLSX format"))]
    UnsupportedFormat(String),

    #[error("file contains duplicate submitter_ids: {}", .0.join(", "))]
    #[diagnostic(help("submitter_ids must be unique within a node"))]
    DuplicateSubmitterIds(Vec<String>),

    #[error("missing column `{column}` in {table}")]
    MissingColumn { column: String, table: String },

    #[error("failed to parse table {path}: {message}")]
    TableParse { path: PathBuf, message: String },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("submission is timing out at chunk size 1 (row offset {offset})")]
    #[diagnostic(help("retry later with a smaller initial chunk size or contact the commons helpdesk"))]
    SubmissionTimeout {
        offset: usize,
        partial: Box<SubmissionResult>,
    },

    #[error("{count} valid entities failed without any invalid entity in the chunk at row offset {offset}")]
    #[diagnostic(help(
        "check the data for file encoding problems, special characters, or duplicate submitter_ids or ids"
    ))]
    AmbiguousFailure {
        offset: usize,
        count: usize,
        partial: Box<SubmissionResult>,
    },

    #[error("unable to resolve submission order for node `{node}`: {reason}")]
    OrderResolution { node: String, reason: String },

    #[error("submission request failed: {0}")]
    SubmissionHttp(String),

    #[error("submission API returned status {status}: {message}")]
    SubmissionStatus { status: u16, message: String },

    #[error("index request failed: {0}")]
    IndexHttp(String),

    #[error("index API returned status {status}: {message}")]
    IndexStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse data dictionary: {0}")]
    DictionaryParse(String),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("no index record found for object location: {0}")]
    MissingIndexRecord(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl Gen3Error {
    /// What a submission or deletion had settled before a fatal stop.
    pub fn partial_result(&self) -> Option<&SubmissionResult> {
        match self {
            Gen3Error::SubmissionTimeout { partial, .. }
            | Gen3Error::AmbiguousFailure { partial, .. } => Some(&**partial),
            _ => None,
        }
    }
}
