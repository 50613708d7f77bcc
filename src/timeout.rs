//! Deadline enforcement for byte-copy operations
//!
//! The only stage of the fetch pipeline with an explicit deadline is the copy
//! of a response body to disk; every other stage relies solely on the
//! caller's cancellation token. The deadline comes from a single environment
//! variable in whole seconds, defaulting to five minutes.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// Environment variable holding the download-copy timeout in whole seconds
pub const DOWNLOAD_TIMEOUT_ENV: &str = "PKGFETCH_DOWNLOAD_TIMEOUT";

/// Timeout used when the environment variable is absent or unusable
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Resolve the download-copy timeout from an environment variable value
///
/// Absent or non-numeric values fall back to the five-minute default. A
/// configured zero is rejected with a warning rather than treated as "fire
/// immediately" or "wait forever".
pub fn download_timeout_from(value: Option<&str>) -> Duration {
    match value.and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(0) => {
            tracing::warn!(
                env = DOWNLOAD_TIMEOUT_ENV,
                "Configured download timeout of 0 seconds rejected, using default"
            );
            DEFAULT_DOWNLOAD_TIMEOUT
        }
        Some(seconds) => Duration::from_secs(seconds),
        None => DEFAULT_DOWNLOAD_TIMEOUT,
    }
}

/// Resolve the download-copy timeout from the process environment
pub fn download_timeout() -> Duration {
    download_timeout_from(std::env::var(DOWNLOAD_TIMEOUT_ENV).ok().as_deref())
}

/// Copy `reader` into `writer`, failing with [`Error::Timeout`] if the copy
/// does not complete within `duration`
///
/// `operation` names the transfer in the timeout message (typically the URI
/// or package being downloaded). Returns the number of bytes copied.
pub async fn copy_with_timeout<R, W>(
    reader: &mut R,
    writer: &mut W,
    operation: &str,
    duration: Duration,
    token: &CancellationToken,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    tokio::select! {
        copied = tokio::io::copy(reader, writer) => Ok(copied?),
        _ = tokio::time::sleep(duration) => Err(Error::Timeout {
            operation: operation.to_string(),
            seconds: duration.as_secs(),
        }),
        _ = token.cancelled() => Err(Error::Cancelled),
    }
}
