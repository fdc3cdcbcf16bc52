//! Error types for the catalog service.

use std::result;
use thiserror::Error;

/// A specialized Result type for catalog operations.
pub type Result<T> = result::Result<T, Error>;

/// Why a catalog entry could not be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// The entry exists but we are not allowed to read it (private dataset).
    Forbidden,
    /// Anything else: missing file, broken mirror, network failure.
    Unreachable,
}

/// The error type for catalog operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown id, path or column
    #[error("{0} not found")]
    NotFound(String),

    /// A key that should be unique resolved to more than one row
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// Variables of one dataset live in both storage backends
    #[error("dataset `{dataset}` mixes fact-table and columnar-file variables")]
    MixedDataSource { dataset: String },

    /// Table lacks dimensions required by its channel
    #[error("table `{table}` is missing dimensions: {}", .missing.join(", "))]
    MissingDimension { table: String, missing: Vec<String> },

    /// Catalog entry could not be read
    #[error("failed to fetch `{path}` ({kind:?}): {message}")]
    RemoteFetch {
        path: String,
        kind: FetchFailure,
        message: String,
    },

    /// Unknown wire format requested
    #[error("unsupported format `{0}`")]
    UnsupportedFormat(String),

    /// Path fragment or column name rejected by the identifier sanitizer
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    /// Include pattern is not a valid regular expression
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("storage error: {0}")]
    Storage(#[from] duckdb::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Worker pool shut down or a worker panicked
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Stable machine-readable tag for this error, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::InternalConsistency(_) => "internal_consistency",
            Error::MixedDataSource { .. } => "mixed_data_source",
            Error::MissingDimension { .. } => "missing_dimension",
            Error::RemoteFetch { .. } => "remote_fetch",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::InvalidPattern(_) => "invalid_pattern",
            Error::NotImplemented(_) => "not_implemented",
            Error::Storage(_) => "storage",
            Error::Arrow(_) => "arrow",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::Runtime(_) => "runtime",
        }
    }

    /// Whether a sync pass must stop on this error instead of skipping the dataset.
    pub fn is_fatal_for_sync(&self) -> bool {
        matches!(
            self,
            Error::RemoteFetch {
                kind: FetchFailure::Unreachable,
                ..
            }
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }
}
