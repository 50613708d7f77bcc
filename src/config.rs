//! Configuration types for pkgfetch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for an HTTP source
///
/// Works out of the box with `Config::default()`; every field can be
/// overridden individually when deserialized from a config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the shared HTTP cache tree (default: "./http-cache")
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Maximum concurrent outbound requests, process-wide
    ///
    /// The default is deliberately lower on macOS (16 vs 128) because the
    /// default open-file limit there is easy to exhaust with one request per
    /// open connection plus one cache file each.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Retry behavior for transient download failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Override for the download-copy timeout
    ///
    /// `None` reads the `PKGFETCH_DOWNLOAD_TIMEOUT` environment variable
    /// (whole seconds), falling back to five minutes.
    #[serde(default, with = "optional_duration_serde")]
    pub download_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            max_concurrent_requests: default_max_concurrent_requests(),
            retry: RetryConfig::default(),
            download_timeout: None,
        }
    }
}

/// Retry behavior configuration for the download orchestrator
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 2,
    /// i.e. three total attempts)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./http-cache")
}

fn default_max_concurrent_requests() -> usize {
    if cfg!(target_os = "macos") { 16 } else { 128 }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache_root, PathBuf::from("./http-cache"));
        assert!(config.download_timeout.is_none());
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_platform_concurrency_default() {
        let expected = if cfg!(target_os = "macos") { 16 } else { 128 };
        assert_eq!(Config::default().max_concurrent_requests, expected);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"cache_root": "/var/cache/pkgfetch"}"#).unwrap();
        assert_eq!(config.cache_root, PathBuf::from("/var/cache/pkgfetch"));
        assert_eq!(config.retry.max_attempts, 2);
        assert!(config.retry.jitter);
    }

    #[test]
    fn test_duration_roundtrip_as_seconds() {
        let config = Config {
            download_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.download_timeout, Some(Duration::from_secs(30)));
    }
}
