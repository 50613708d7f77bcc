//! Package download orchestration
//!
//! Ties a remote source to a local package store: check the store, fetch the
//! package bytes with transient-failure retry, and hand the stream to the
//! store. The fetch bypasses the shared HTTP cache; package archives are
//! large and the store is their long-term home.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::download_with_retry;
use crate::source::HttpSource;
use crate::types::{DownloadResult, PackageIdentity, SourceResult};
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Local destination for downloaded packages
///
/// `add` consumes the fetched stream and owns persistence; the orchestrator
/// never touches the store's layout.
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Look up an already-downloaded package
    async fn get(&self, identity: &PackageIdentity) -> Result<Option<DownloadResult>>;

    /// Persist a downloaded package from `stream` and return a result reading
    /// from the store's own copy
    async fn add(
        &self,
        identity: &PackageIdentity,
        stream: tokio::fs::File,
    ) -> Result<DownloadResult>;
}

/// Download a package into `store`, short-circuiting if it is already there
///
/// Transient network failures are retried per `retry`; any other failure, and
/// a transient one that survives the whole budget, is wrapped as
/// [`Error::Fatal`] so callers can distinguish "this source is broken" from
/// "try again later". Cancellation passes through unwrapped. A `404` from the
/// source becomes [`DownloadResult::NotFound`].
///
/// Fetched bytes land in a randomly named file under `temp_root` before the
/// store takes them over.
pub async fn download_package(
    source: &HttpSource,
    store: &dyn PackageStore,
    identity: &PackageIdentity,
    uri: &Url,
    retry: &RetryConfig,
    temp_root: &Path,
    token: &CancellationToken,
) -> Result<DownloadResult> {
    if let Some(existing) = store.get(identity).await? {
        tracing::debug!(%identity, "Package already in local store");
        return Ok(existing);
    }

    tracing::info!(%identity, %uri, "Downloading package");

    let result = download_with_retry(retry, || async move {
        match source.get_stream(uri, temp_root, token).await? {
            SourceResult::NotFound => Ok(DownloadResult::NotFound),
            SourceResult::Available { stream, .. } => store.add(identity, stream).await,
        }
    })
    .await;

    match result {
        Ok(download) => Ok(download),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            tracing::error!(%identity, %uri, error = %e, "Package download failed");
            Err(Error::Fatal(Box::new(e)))
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ClientFactory;
    use crate::config::Config;
    use crate::source::HttpSourceBuilder;
    use crate::throttle::RequestThrottle;
    use crate::types::Credentials;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct PlainFactory;

    #[async_trait]
    impl ClientFactory for PlainFactory {
        async fn create(&self, _credentials: Option<&Credentials>) -> Result<reqwest::Client> {
            Ok(reqwest::Client::new())
        }
    }

    /// Store backed by a directory, one file per package identity
    struct DirStore {
        dir: PathBuf,
    }

    impl DirStore {
        fn package_path(&self, identity: &PackageIdentity) -> PathBuf {
            self.dir.join(format!("{identity}.pkg"))
        }
    }

    #[async_trait]
    impl PackageStore for DirStore {
        async fn get(&self, identity: &PackageIdentity) -> Result<Option<DownloadResult>> {
            match tokio::fs::File::open(self.package_path(identity)).await {
                Ok(stream) => Ok(Some(DownloadResult::Available { stream })),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Error::Io(e)),
            }
        }

        async fn add(
            &self,
            identity: &PackageIdentity,
            mut stream: tokio::fs::File,
        ) -> Result<DownloadResult> {
            let path = self.package_path(identity);
            let mut file = tokio::fs::File::create(&path).await?;
            tokio::io::copy(&mut stream, &mut file).await?;
            file.sync_all().await?;
            let stream = tokio::fs::File::open(&path).await?;
            Ok(DownloadResult::Available { stream })
        }
    }

    async fn source_for(address: &str, cache_root: &Path) -> HttpSource {
        let config = Config {
            cache_root: cache_root.to_path_buf(),
            download_timeout: Some(Duration::from_secs(10)),
            ..Config::default()
        };
        HttpSourceBuilder::new(address.parse().unwrap(), config, Arc::new(PlainFactory))
            .throttle(RequestThrottle::new(8))
            .build()
            .await
            .unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    async fn read_all(mut file: tokio::fs::File) -> Vec<u8> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_download_fetches_and_adds_to_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/packages/pkg.1.0.0.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"package bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let cache_root = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let source = source_for(&server.uri(), cache_root.path()).await;
        let store = DirStore {
            dir: store_dir.path().to_path_buf(),
        };
        let identity = PackageIdentity::new("pkg", "1.0.0");
        let uri: Url = format!("{}/packages/pkg.1.0.0.zip", server.uri())
            .parse()
            .unwrap();
        let token = CancellationToken::new();

        let result = download_package(
            &source,
            &store,
            &identity,
            &uri,
            &fast_retry(),
            temp.path(),
            &token,
        )
        .await
        .unwrap();

        let DownloadResult::Available { stream } = result else {
            panic!("available package must download");
        };
        assert_eq!(read_all(stream).await, b"package bytes");
        assert!(store.package_path(&identity).exists());

        // A second download is served from the store; expect(1) above would
        // fail on a second network hit.
        let again = download_package(
            &source,
            &store,
            &identity,
            &uri,
            &fast_retry(),
            temp.path(),
            &token,
        )
        .await
        .unwrap();
        assert!(!again.is_not_found());
    }

    #[tokio::test]
    async fn test_store_hit_short_circuits_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let cache_root = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let source = source_for(&server.uri(), cache_root.path()).await;
        let store = DirStore {
            dir: store_dir.path().to_path_buf(),
        };
        let identity = PackageIdentity::new("pkg", "1.0.0");
        tokio::fs::write(store.package_path(&identity), b"already here")
            .await
            .unwrap();
        let uri: Url = format!("{}/packages/pkg.1.0.0.zip", server.uri())
            .parse()
            .unwrap();
        let token = CancellationToken::new();

        let result = download_package(
            &source,
            &store,
            &identity,
            &uri,
            &fast_retry(),
            temp.path(),
            &token,
        )
        .await
        .unwrap();

        let DownloadResult::Available { stream } = result else {
            panic!("stored package must be returned");
        };
        assert_eq!(read_all(stream).await, b"already here");
    }

    #[tokio::test]
    async fn test_missing_package_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let cache_root = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let source = source_for(&server.uri(), cache_root.path()).await;
        let store = DirStore {
            dir: store_dir.path().to_path_buf(),
        };
        let identity = PackageIdentity::new("ghost", "0.1.0");
        let uri: Url = format!("{}/packages/ghost.0.1.0.zip", server.uri())
            .parse()
            .unwrap();
        let token = CancellationToken::new();

        let result = download_package(
            &source,
            &store,
            &identity,
            &uri,
            &fast_retry(),
            temp.path(),
            &token,
        )
        .await
        .unwrap();

        assert!(result.is_not_found());
        assert!(!store.package_path(&identity).exists());
    }

    #[tokio::test]
    async fn test_server_error_is_fatal_without_retry() {
        let server = MockServer::start().await;
        // expect(1) proves a 5xx is not retried.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let cache_root = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let source = source_for(&server.uri(), cache_root.path()).await;
        let store = DirStore {
            dir: store_dir.path().to_path_buf(),
        };
        let identity = PackageIdentity::new("pkg", "1.0.0");
        let uri: Url = format!("{}/packages/pkg.1.0.0.zip", server.uri())
            .parse()
            .unwrap();
        let token = CancellationToken::new();

        let err = download_package(
            &source,
            &store,
            &identity,
            &uri,
            &fast_retry(),
            temp.path(),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Fatal(_)));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_fatal_after_retries() {
        let cache_root = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let temp = tempdir().unwrap();
        // Nothing listens on the discard port; every attempt fails to connect.
        let source = source_for("http://127.0.0.1:9", cache_root.path()).await;
        let store = DirStore {
            dir: store_dir.path().to_path_buf(),
        };
        let identity = PackageIdentity::new("pkg", "1.0.0");
        let uri: Url = "http://127.0.0.1:9/packages/pkg.1.0.0.zip".parse().unwrap();
        let token = CancellationToken::new();

        let err = download_package(
            &source,
            &store,
            &identity,
            &uri,
            &fast_retry(),
            temp.path(),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Fatal(_)));
    }
}
