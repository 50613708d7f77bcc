//! Error types for pkgfetch
//!
//! This module provides the error taxonomy for the fetch-and-cache engine:
//! - Transport errors (network, HTTP status)
//! - Payload validation errors with the origin URI attached
//! - Timeout and file-locking errors
//! - The orchestrator's fatal wrapper for non-transient failures

use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// Result type alias for pkgfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pkgfetch
///
/// Each variant carries enough context to diagnose the failure without access
/// to the call site: URIs, paths, configured limits.
#[derive(Debug, Error)]
pub enum Error {
    /// Network-level error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error (cache files, temp files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-success HTTP status that is not handled by the negotiation layer
    #[error("HTTP {status} returned for {url}")]
    Http {
        /// The response status code
        status: u16,
        /// The request URL
        url: Url,
    },

    /// Payload failed shape validation
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A byte-copy operation exceeded its configured deadline
    #[error("The download of '{operation}' took more than {seconds} second(s) and therefore timed out.")]
    Timeout {
        /// Human-readable name of the operation that timed out
        operation: String,
        /// The configured limit in whole seconds
        seconds: u64,
    },

    /// Failed to acquire or release a cross-process file lock
    #[error("file lock error for {path}: {source}")]
    Lock {
        /// Path the lock is keyed by
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// Lock acquisition gave up after the configured bound
    #[error("timed out waiting for file lock on {path}")]
    LockTimeout {
        /// Path the lock is keyed by
        path: PathBuf,
    },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Non-transient failure wrapped by the download orchestrator
    #[error("fatal protocol error: {0}")]
    Fatal(#[source] Box<Error>),

    /// A state the control flow is designed never to reach
    #[error("invariant violation: {0}")]
    Invariant(&'static str),
}

/// Payload-shape validation errors
///
/// Every variant names the validator that ran and carries the origin URI, so
/// raw parser errors never surface without context.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The payload did not parse as a single JSON object
    #[error("the JSON document from '{uri}' is not a valid JSON object")]
    InvalidJsonObject {
        /// Origin of the payload
        uri: Url,
        /// Underlying parse or structural-check failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An index field that must be an array held something else
    #[error("the index document from '{uri}' has a '{field}' property that is not an array")]
    IndexFieldNotArray {
        /// Origin of the payload
        uri: Url,
        /// The offending field name
        field: &'static str,
    },

    /// The payload could not be opened as a package archive with a descriptor
    #[error("the package archive from '{uri}' is not valid or is missing its descriptor")]
    InvalidArchive {
        /// Origin of the payload
        uri: Url,
        /// Underlying archive failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The payload did not parse as a well-formed XML document
    #[error("the XML document from '{uri}' is not well-formed")]
    InvalidXml {
        /// Origin of the payload
        uri: Url,
        /// Underlying parse failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ValidationError {
    /// The URI the rejected payload was fetched from
    pub fn uri(&self) -> &Url {
        match self {
            ValidationError::InvalidJsonObject { uri, .. }
            | ValidationError::IndexFieldNotArray { uri, .. }
            | ValidationError::InvalidArchive { uri, .. }
            | ValidationError::InvalidXml { uri, .. } => uri,
        }
    }
}
