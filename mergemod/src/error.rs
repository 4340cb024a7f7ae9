use std::fmt;
use std::io;
use std::num;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MergeError>;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("int conversion error: {0}")]
    TryFromIntError(#[from] num::TryFromIntError),
    #[error("manifest is invalid: {}", SchemaViolation::join(.0))]
    SchemaViolation(Vec<SchemaViolation>),
    #[error("referenced file '{0}' does not exist in the source directory")]
    MissingSourceAsset(String),
    #[error("asset '{0}' is not present in the merge mod")]
    AssetNotFound(String),
    #[error("asset record has an invalid magic (expected 'MMV1', found {0:?})")]
    BadAssetMagic([u8; 4]),
    #[error("serial size mismatch: stream position {position} != stream length {length}")]
    SerialSizeMismatch { position: u64, length: u64 },
    #[error("asset '{name}' is truncated: {available} bytes available, {expected} expected")]
    TruncatedStream {
        name: String,
        expected: u64,
        available: u64,
    },
    #[error("asset '{0}' cannot be read: its backing stream has been released")]
    StreamClosed(String),
    #[error("not a merge mod (bad header magic)")]
    BadMagic,
    #[error("unsupported merge mod version: {0}")]
    UnsupportedVersion(u8),
    #[error("malformed string: {0}")]
    MalformedString(String),
    #[error("target file '{0}' is not loaded by the game")]
    TargetNotFound(String),
    #[error("'{first}' and '{second}' would both be extracted as '{file_name}'")]
    FlattenCollision {
        file_name: String,
        first: String,
        second: String,
    },
    #[error("failed to edit '{}': {message}", .path.display())]
    EditError { path: PathBuf, message: String },
    #[error("failed to apply merge mod '{mod_name}': {}", ChangeFailure::join(.failures))]
    PartialFailure {
        mod_name: String,
        failures: Vec<ChangeFailure>,
    },
}

impl MergeError {
    pub fn malformed_string(msg: impl Into<String>) -> Self {
        Self::MalformedString(msg.into())
    }

    pub fn edit_error(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::EditError {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Single-violation shorthand, used where parsing stops at the first problem.
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaViolation(vec![SchemaViolation::new(field, reason)])
    }
}

/// A manifest field that breaks the merge mod schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub field: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    fn join(violations: &[SchemaViolation]) -> String {
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Failure of a single change group during installation.
#[derive(Debug)]
pub struct ChangeFailure {
    pub file_name: String,
    /// Index of the failing change inside its file, `None` when the file
    /// itself could not be resolved.
    pub change_index: Option<usize>,
    pub error: Box<MergeError>,
}

impl ChangeFailure {
    fn join(failures: &[ChangeFailure]) -> String {
        failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ChangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.change_index {
            Some(index) => write!(f, "{} (change #{}): {}", self.file_name, index, self.error),
            None => write!(f, "{}: {}", self.file_name, self.error),
        }
    }
}
