//! Cross-process disk cache with TTL and atomic replacement
//!
//! Cached responses live at
//! `<cache-root>/<hash-of-source-address>/<sanitized-cache-key>.dat`. The
//! cache file is a resource shared across processes; its consistency is
//! protected entirely by [`crate::file_lock`], never by in-memory locks.
//!
//! Replacement correctness is "at most one winner replaces the file, and
//! anyone fetching concurrently converges on some valid fresh copy", not
//! "exactly one fetch occurs". Duplicate fetches across processes are
//! acceptable; a torn or truncated cache file is not.

use crate::error::{Error, Result};
use crate::file_lock::with_file_lock;
use crate::timeout::copy_with_timeout;
use crate::types::CacheContext;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Result of a cache lookup: an open handle to a fresh entry, or the path a
/// subsequent [`DiskCache::store`] should target
#[derive(Debug)]
pub enum CacheLookup {
    /// The entry exists and is younger than the caller's max age
    Hit {
        /// Open shared-read handle to the cached file
        stream: tokio::fs::File,
        /// Path of the cached file
        path: PathBuf,
    },
    /// No usable entry; `path` is where fresh content belongs
    Miss {
        /// Target path for the entry
        path: PathBuf,
    },
}

impl CacheLookup {
    /// True if the lookup found a fresh entry
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }

    /// The cache path regardless of hit or miss
    pub fn path(&self) -> &Path {
        match self {
            CacheLookup::Hit { path, .. } | CacheLookup::Miss { path } => path,
        }
    }
}

/// Disk cache for one remote source
///
/// The source address determines the cache folder; the caller's cache key
/// determines the file within it.
#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
    source_folder: String,
}

impl DiskCache {
    /// Create a cache view for `source_address` rooted at `root`
    pub fn new(root: impl Into<PathBuf>, source_address: &str) -> Self {
        Self {
            root: root.into(),
            source_folder: sanitize_file_name(&compute_source_hash(source_address)),
        }
    }

    /// Deterministic on-disk path for a cache key
    pub fn entry_path(&self, cache_key: &str) -> PathBuf {
        self.root
            .join(&self.source_folder)
            .join(sanitize_file_name(cache_key) + ".dat")
    }

    /// Look up a cached response
    ///
    /// Returns a hit with an open shared-read handle when the entry exists
    /// and is younger than `max_age`; readers never block other readers. A
    /// `max_age` of zero always misses and does not create the cache
    /// directory: it signals "always fetch fresh".
    pub async fn lookup(
        &self,
        cache_key: &str,
        max_age: Duration,
        token: &CancellationToken,
    ) -> Result<CacheLookup> {
        let path = self.entry_path(cache_key);

        if max_age.is_zero() {
            return Ok(CacheLookup::Miss { path });
        }

        if let Some(folder) = path.parent() {
            tokio::fs::create_dir_all(folder).await?;
        }

        // The lock is taken before probing so this process cannot open a
        // file mid-replacement by another process.
        with_file_lock(&path, token, || async {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) => {
                    let age = entry_age(&metadata)?;
                    if is_fresh(age, max_age) {
                        let stream = tokio::fs::File::open(&path).await?;
                        Ok(CacheLookup::Hit {
                            stream,
                            path: path.clone(),
                        })
                    } else {
                        Ok(CacheLookup::Miss { path: path.clone() })
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(CacheLookup::Miss { path: path.clone() })
                }
                Err(e) => Err(Error::Io(e)),
            }
        })
        .await
    }

    /// Copy a response body into the cache and return an open read handle
    ///
    /// The body is first written to a uniquely named sibling temp file in the
    /// target directory (so the final rename stays on one volume), with the
    /// copy bounded by `copy_timeout`. The replacement sequence then runs
    /// under the file lock for the final path: delete the old entry unless
    /// another process still holds it open, rename the temp file in unless
    /// another writer already produced fresh content, and reopen the final
    /// path for shared read.
    ///
    /// When `ctx.max_age` is zero both the temp file and the "final" path are
    /// randomly named files inside `ctx.temp_root`; the shared cache
    /// namespace is never touched.
    ///
    /// Returns the read handle and the path it refers to (which differs from
    /// `path` on the zero-TTL bypass).
    pub async fn store<R>(
        &self,
        path: &Path,
        body: &mut R,
        ctx: &CacheContext,
        operation: &str,
        copy_timeout: Duration,
        token: &CancellationToken,
    ) -> Result<(tokio::fs::File, PathBuf)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let final_path = if ctx.max_age.is_zero() {
            random_temp_target(&ctx.temp_root)?
        } else {
            path.to_path_buf()
        };

        let temp_dir = final_path
            .parent()
            .ok_or(Error::Invariant("cache entry path has no parent directory"))?;
        let temp = tempfile::Builder::new()
            .prefix("pkgfetch-")
            .suffix("-new")
            .tempfile_in(temp_dir)?;

        // The temp write happens outside the lock; only the replacement
        // sequence below needs mutual exclusion.
        let mut writer = tokio::fs::OpenOptions::new()
            .write(true)
            .open(temp.path())
            .await?;
        copy_with_timeout(body, &mut writer, operation, copy_timeout, token).await?;
        writer.sync_all().await?;
        drop(writer);

        let target = final_path.clone();
        with_file_lock(&final_path, token, move || async move {
            let exists = tokio::fs::try_exists(&target).await?;
            if exists && !is_file_open_elsewhere(&target) {
                // Another process may complete a scheduled deletion between
                // the probe and this call; that outcome is expected.
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::Io(e)),
                }
            }

            if tokio::fs::try_exists(&target).await? {
                // A concurrent writer already replaced the entry, or a reader
                // still pins the old one. Either way the existing file is
                // acceptable fresh content; dropping the temp file discards
                // our copy.
                drop(temp);
            } else {
                temp.persist(&target).map_err(|e| Error::Io(e.error))?;
            }

            let stream = tokio::fs::File::open(&target).await?;
            Ok((stream, target))
        })
        .await
    }
}

/// Age of a cache entry based on its last write time
fn entry_age(metadata: &std::fs::Metadata) -> Result<Duration> {
    let modified = metadata.modified()?;
    // A clock adjustment can put the write time in the future; treat that as
    // a brand-new entry rather than failing.
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

/// Freshness predicate: an entry aged exactly `max_age` is already stale
fn is_fresh(age: Duration, max_age: Duration) -> bool {
    age < max_age
}

/// Random entry path for the zero-TTL bypass
fn random_temp_target(temp_root: &Path) -> Result<PathBuf> {
    use rand::Rng;
    let name: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    Ok(temp_root.join(format!("pkgfetch-{name}.dat")))
}

/// Whether another process holds the file open in a way that forbids deletion
///
/// On POSIX systems deleting an open file is always safe: existing readers
/// keep their handle while the name disappears, so the probe reports "not
/// open". On Windows the probe attempts a fully exclusive open.
fn is_file_open_elsewhere(path: &Path) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .share_mode(0)
            .open(path)
            .is_err()
    }
    #[cfg(not(windows))]
    {
        let _ = path;
        false
    }
}

/// Folder name for a source address
///
/// SHA-1 of the full address, hex-encoded in reversed byte order, followed by
/// `$` and the address's final 32 characters so a human can tell which source
/// a folder belongs to. Deterministic and collision-resistant for cache use,
/// not cryptographically collision-proof.
fn compute_source_hash(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let start = chars.len().saturating_sub(32);
    let trailing: String = chars[start..].iter().collect();

    let digest = Sha1::digest(value.as_bytes());

    let mut out = String::with_capacity(digest.len() * 2 + 1 + trailing.len());
    for byte in digest.iter().rev() {
        out.push_str(&format!("{byte:02x}"));
    }
    out.push('$');
    out.push_str(&trailing);
    out
}

/// Replace filesystem-illegal characters with `_` and collapse doubled
/// underscores
fn sanitize_file_name(value: &str) -> String {
    const ILLEGAL: &[char] = &['"', '<', '>', '|', ':', '*', '?', '\\', '/'];

    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_control() || ILLEGAL.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    // Two passes collapse runs of up to four underscores, matching the
    // established on-disk layout.
    sanitized.replace("__", "_").replace("__", "_")
}
