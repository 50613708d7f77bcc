//! Cross-process file locking keyed by a logical path
//!
//! Writers and readers of a shared cache file may live in different
//! processes, so mutual exclusion is provided by an OS-level advisory lock on
//! a sibling `<path>.lock` file rather than by in-memory locks. The lock is
//! keyed by the logical path: it serializes access even before the target
//! file exists.
//!
//! Acquisition polls `try_lock_exclusive` on an async sleep so a waiting task
//! never parks a runtime thread, and cancellation is observed between polls.
//!
//! The lock is re-entrant per holder: a task already inside the lock for a
//! key may acquire it again without deadlocking (flock-style locks contend
//! between descriptors, so a naive nested acquisition would wait on itself
//! forever). Distinct tasks in the same process still exclude each other.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Delay between lock acquisition attempts
const POLL_INTERVAL: Duration = Duration::from_millis(50);

tokio::task_local! {
    /// Keys whose cross-process lock the current task already holds
    static HELD_KEYS: RefCell<HashSet<PathBuf>>;
}

/// Held lock; released on drop (success, failure, or cancellation)
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Path of the lock file associated with a logical path
fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Run `action` while holding the exclusive cross-process lock for `path`,
/// waiting as long as it takes to acquire it
///
/// The lock is guaranteed released on every exit path. Re-entry from the
/// task that already holds the lock for `path` succeeds immediately.
pub async fn with_file_lock<T, F, Fut>(
    path: &Path,
    token: &CancellationToken,
    action: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_locked(path, None, token, action).await
}

/// Like [`with_file_lock`], but give up with [`Error::LockTimeout`] if the
/// lock cannot be acquired within `timeout`
///
/// The in-crate cache composition waits unbounded; this bounded variant
/// exists for callers that cannot afford to.
pub async fn with_file_lock_timeout<T, F, Fut>(
    path: &Path,
    timeout: Duration,
    token: &CancellationToken,
    action: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_locked(path, Some(timeout), token, action).await
}

async fn run_locked<T, F, Fut>(
    path: &Path,
    timeout: Option<Duration>,
    token: &CancellationToken,
    action: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let key = path.to_path_buf();

    let already_held = HELD_KEYS
        .try_with(|held| held.borrow().contains(&key))
        .unwrap_or(false);
    if already_held {
        // This task is inside the lock for this key already; the outer
        // holder provides the exclusion.
        return action().await;
    }

    let guard = acquire(path, timeout, token).await?;

    let result = match HELD_KEYS.try_with(|held| {
        held.borrow_mut().insert(key.clone());
    }) {
        Ok(()) => {
            let result = action().await;
            let _ = HELD_KEYS.try_with(|held| {
                held.borrow_mut().remove(&key);
            });
            result
        }
        // No tracking scope yet for this task; establish one around the
        // action so nested acquisitions can see the held key.
        Err(_) => {
            HELD_KEYS
                .scope(RefCell::new(HashSet::from([key])), action())
                .await
        }
    };

    drop(guard);
    result
}

/// Poll for the exclusive lock on `path`'s lock file
async fn acquire(
    path: &Path,
    timeout: Option<Duration>,
    token: &CancellationToken,
) -> Result<LockGuard> {
    let lock_path = lock_path_for(path);
    let started = Instant::now();
    let contended_kind = fs2::lock_contended_error().kind();

    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // The lock file is opened fresh on each attempt; flock-style locks
        // belong to the open file description, so a stale handle must not be
        // reused across attempts.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::Lock {
                path: path.to_path_buf(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => return Ok(LockGuard { file }),
            Err(e) if e.kind() == contended_kind => {
                if let Some(limit) = timeout
                    && started.elapsed() >= limit
                {
                    return Err(Error::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
            }
            Err(e) => {
                return Err(Error::Lock {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = token.cancelled() => return Err(Error::Cancelled),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lock_executes_action() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.dat");
        let token = CancellationToken::new();

        let value = with_file_lock(&path, &token, || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_lock_released_on_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.dat");
        let token = CancellationToken::new();

        let failed: crate::error::Result<()> = with_file_lock(&path, &token, || async {
            Err(Error::Invariant("boom"))
        })
        .await;
        assert!(failed.is_err());

        // A failed action must not leave the lock held.
        let value = with_file_lock(&path, &token, || async { Ok(1) })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_same_task_reentry_succeeds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.dat");
        let token = CancellationToken::new();

        // The inner acquisition is bounded so a self-deadlock would surface
        // as LockTimeout instead of hanging the test.
        let value = with_file_lock(&path, &token, || async {
            with_file_lock_timeout(&path, Duration::from_millis(300), &token, || async {
                Ok(7)
            })
            .await
        })
        .await
        .unwrap();
        assert_eq!(value, 7);

        // The nested exit must not have released the lock state prematurely.
        let value = with_file_lock(&path, &token, || async { Ok(8) })
            .await
            .unwrap();
        assert_eq!(value, 8);
    }

    #[tokio::test]
    async fn test_concurrent_holders_are_serialized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.dat");
        let in_section = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let path = path.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let token = CancellationToken::new();
                with_file_lock(&path, &token, || async {
                    let current = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_section.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "lock must be exclusive");
    }

    #[tokio::test]
    async fn test_acquisition_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.dat");
        let hold_token = CancellationToken::new();
        let release = CancellationToken::new();

        let holder = {
            let path = path.clone();
            let hold_token = hold_token.clone();
            let release = release.clone();
            tokio::spawn(async move {
                with_file_lock(&path, &hold_token, || async {
                    release.cancelled().await;
                    Ok(())
                })
                .await
            })
        };

        // Give the holder time to take the lock.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let token = CancellationToken::new();
        let result =
            with_file_lock_timeout(&path, Duration::from_millis(200), &token, || async {
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::LockTimeout { .. })));

        release.cancel();
        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_while_waiting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.dat");
        let hold_token = CancellationToken::new();
        let release = CancellationToken::new();

        let holder = {
            let path = path.clone();
            let hold_token = hold_token.clone();
            let release = release.clone();
            tokio::spawn(async move {
                with_file_lock(&path, &hold_token, || async {
                    release.cancelled().await;
                    Ok(())
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;

        let waiter_token = CancellationToken::new();
        let waiter = {
            let path = path.clone();
            let waiter_token = waiter_token.clone();
            tokio::spawn(
                async move { with_file_lock(&path, &waiter_token, || async { Ok(()) }).await },
            )
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        waiter_token.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));

        release.cancel();
        holder.await.unwrap().unwrap();
    }
}
