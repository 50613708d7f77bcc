//! # pkgfetch
//!
//! HTTP fetch-and-cache engine for package management clients.
//!
//! ## Design Philosophy
//!
//! pkgfetch is designed to be:
//! - **Cache-first** - Every fetch consults an on-disk response cache shared
//!   across processes before touching the network
//! - **Crash-safe** - Cache replacement is atomic; readers never observe a
//!   torn or truncated entry
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use pkgfetch::{
//!     ClientFactory, Config, Credentials, HttpSourceBuilder, RequestThrottle, Result,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! struct PlainFactory;
//!
//! #[async_trait::async_trait]
//! impl ClientFactory for PlainFactory {
//!     async fn create(&self, _credentials: Option<&Credentials>) -> Result<reqwest::Client> {
//!         Ok(reqwest::Client::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // One throttle per process, shared by every source.
//!     let throttle = RequestThrottle::with_default_capacity();
//!
//!     let source = HttpSourceBuilder::new(
//!         "https://feed.example/v3/index.json".parse().unwrap(),
//!         Config::default(),
//!         Arc::new(PlainFactory),
//!     )
//!     .throttle(throttle)
//!     .build()
//!     .await?;
//!
//!     let ctx = pkgfetch::CacheContext::new(Duration::from_secs(30 * 60), "/tmp");
//!     let token = CancellationToken::new();
//!     let result = source
//!         .fetch(
//!             &"https://feed.example/v3/index.json".parse().unwrap(),
//!             "service_index",
//!             &ctx,
//!             false,
//!             &token,
//!         )
//!         .await?;
//!     println!("cached at {:?}", result.cache_path());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Credential negotiation on authentication challenges
pub mod auth;
/// Cross-process disk cache with TTL and atomic replacement
pub mod cache;
/// Configuration types
pub mod config;
/// Package download orchestration
pub mod download;
/// Error types
pub mod error;
/// Cross-process file locking
pub mod file_lock;
/// Retry logic with exponential backoff
pub mod retry;
/// HTTP source fetch entry point
pub mod source;
/// Process-wide outbound request throttle
pub mod throttle;
/// Deadline enforcement for byte-copy operations
pub mod timeout;
/// Core types
pub mod types;
/// Payload-shape validation
pub mod validation;

// Re-export commonly used types
pub use auth::{
    ClientFactory, CredentialNegotiator, CredentialProvider, CredentialsAcceptedCallback,
    PromptLock,
};
pub use cache::{CacheLookup, DiskCache};
pub use config::{Config, RetryConfig};
pub use download::{PackageStore, download_package};
pub use error::{Error, Result, ValidationError};
pub use source::{HttpSource, HttpSourceBuilder};
pub use throttle::{RequestPermit, RequestThrottle};
pub use types::{CacheContext, Credentials, DownloadResult, PackageIdentity, SourceResult};
