//! Core types for pkgfetch

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identity of a package: logical id plus version string
///
/// Opaque to this crate; the download orchestrator only uses it to key the
/// local package store and to label log messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    /// Package id (e.g. "serde")
    pub id: String,
    /// Package version string (e.g. "1.0.219")
    pub version: String,
}

impl PackageIdentity {
    /// Create a new package identity
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.id, self.version)
    }
}

/// Credentials accepted by a remote source
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password or token
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    // Never log the password.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-request cache policy: how stale a cached response may be, and where
/// zero-TTL responses land instead of the shared cache tree
#[derive(Clone, Debug)]
pub struct CacheContext {
    /// Maximum acceptable age of a cached response; zero means "always fetch
    /// fresh and bypass the shared cache entirely"
    pub max_age: Duration,
    /// Root directory for temp files used by the zero-TTL bypass path
    pub temp_root: PathBuf,
}

impl CacheContext {
    /// Create a cache context with the given TTL
    pub fn new(max_age: Duration, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            max_age,
            temp_root: temp_root.into(),
        }
    }

    /// Context for the always-fetch-fresh path
    pub fn no_cache(temp_root: impl Into<PathBuf>) -> Self {
        Self::new(Duration::ZERO, temp_root)
    }
}

/// Result of a [`crate::source::HttpSource::fetch`] call
#[derive(Debug)]
pub enum SourceResult {
    /// The response is available: an open shared-read handle over the cached
    /// bytes, plus the path it was cached at
    Available {
        /// Open read handle over the cached response body
        stream: tokio::fs::File,
        /// Where the body lives on disk
        cache_path: PathBuf,
    },
    /// The server returned 404 and the caller opted in to treating that as
    /// "absent" rather than an error
    NotFound,
}

impl SourceResult {
    /// True if this result is the opted-in 404 case
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceResult::NotFound)
    }

    /// The cache path, if the response is available
    pub fn cache_path(&self) -> Option<&Path> {
        match self {
            SourceResult::Available { cache_path, .. } => Some(cache_path),
            SourceResult::NotFound => None,
        }
    }

    /// Consume the result, returning the backing stream if available
    pub fn into_stream(self) -> Option<tokio::fs::File> {
        match self {
            SourceResult::Available { stream, .. } => Some(stream),
            SourceResult::NotFound => None,
        }
    }
}

/// Result of a package download: owns the backing stream, which is released
/// when the value is dropped
#[derive(Debug)]
pub enum DownloadResult {
    /// The package content is available for reading
    Available {
        /// Open read handle over the package bytes
        stream: tokio::fs::File,
    },
    /// The package does not exist at the source
    NotFound,
}

impl DownloadResult {
    /// True if the package was not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, DownloadResult::NotFound)
    }
}
