//! HTTP source fetch entry point
//!
//! [`HttpSource`] ties the subsystem together for one remote feed: consult
//! the disk cache, admit the request through the process-wide throttle, send
//! it with credential support, and stream the response body into the cache
//! before handing back a shared-read handle.


use crate::auth::{
    ClientFactory, CredentialNegotiator, CredentialProvider, CredentialsAcceptedCallback,
    PromptLock,
};
use crate::cache::{CacheLookup, DiskCache};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::throttle::RequestThrottle;
use crate::timeout;
use crate::types::{CacheContext, SourceResult};
use futures::TryStreamExt;
use reqwest::StatusCode;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Builder for [`HttpSource`]
pub struct HttpSourceBuilder {
    source_address: Url,
    config: Config,
    throttle: Option<RequestThrottle>,
    factory: Arc<dyn ClientFactory>,
    provider: Option<Arc<dyn CredentialProvider>>,
    on_accepted: Option<CredentialsAcceptedCallback>,
    prompt_lock: PromptLock,
}

impl HttpSourceBuilder {
    /// Start building a source for `source_address`
    pub fn new(source_address: Url, config: Config, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            source_address,
            config,
            throttle: None,
            factory,
            provider: None,
            on_accepted: None,
            prompt_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Use a shared throttle instead of one sized from the config
    ///
    /// The request bound is intended to be process-wide: with several sources
    /// in play, construct one throttle and hand a clone to each builder.
    pub fn throttle(mut self, throttle: RequestThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Supply a credential provider for `401` negotiation
    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Notify this callback when prompted credentials are accepted
    pub fn on_credentials_accepted(mut self, callback: CredentialsAcceptedCallback) -> Self {
        self.on_accepted = Some(callback);
        self
    }

    /// Share a prompt lock across sources so only one interactive prompt is
    /// visible at a time process-wide
    pub fn prompt_lock(mut self, lock: PromptLock) -> Self {
        self.prompt_lock = lock;
        self
    }

    /// Build the source, creating its initial transport client
    pub async fn build(self) -> Result<HttpSource> {
        let cache = DiskCache::new(&self.config.cache_root, self.source_address.as_str());
        let throttle = self
            .throttle
            .unwrap_or_else(|| RequestThrottle::new(self.config.max_concurrent_requests));
        let download_timeout = self
            .config
            .download_timeout
            .unwrap_or_else(timeout::download_timeout);
        let negotiator = CredentialNegotiator::new(
            self.source_address.clone(),
            self.factory,
            self.provider,
            self.on_accepted,
            self.prompt_lock,
        )
        .await?;

        Ok(HttpSource {
            source_address: self.source_address,
            cache,
            throttle,
            negotiator,
            download_timeout,
        })
    }
}

/// Fetch-and-cache engine for one remote package feed
pub struct HttpSource {
    source_address: Url,
    cache: DiskCache,
    throttle: RequestThrottle,
    negotiator: CredentialNegotiator,
    download_timeout: Duration,
}

impl HttpSource {
    /// Base address of the feed this source serves
    pub fn source_address(&self) -> &Url {
        &self.source_address
    }

    /// Fetch `uri`, serving from the disk cache when a fresh entry exists
    ///
    /// `cache_key` names the entry within this source's cache folder and
    /// `ctx.max_age` bounds how stale a cached response may be. With
    /// `ignore_not_found` a `404` becomes [`SourceResult::NotFound`] instead
    /// of an error. A `401` that survives the negotiation budget surfaces as
    /// [`Error::Http`] with status 401.
    pub async fn fetch(
        &self,
        uri: &Url,
        cache_key: &str,
        ctx: &CacheContext,
        ignore_not_found: bool,
        token: &CancellationToken,
    ) -> Result<SourceResult> {
        let started = Instant::now();

        let lookup = self.cache.lookup(cache_key, ctx.max_age, token).await?;
        let path = match lookup {
            CacheLookup::Hit { stream, path } => {
                tracing::debug!(%uri, cache_key, "CACHE");
                return Ok(SourceResult::Available {
                    stream,
                    cache_path: path,
                });
            }
            CacheLookup::Miss { path } => path,
        };

        // The permit covers the send and the body copy: both hold an open
        // connection.
        let _permit = self.throttle.acquire().await;
        tracing::debug!(
            available = self.throttle.available(),
            capacity = self.throttle.capacity(),
            "Acquired outbound request slot"
        );
        tracing::info!(%uri, "GET");

        // The negotiator resolves once response headers arrive; the body is
        // streamed afterwards so large payloads cannot stall the send.
        let response = self
            .negotiator
            .send(|client| client.get(uri.clone()), token)
            .await?;
        let status = response.status();

        if ignore_not_found && status == StatusCode::NOT_FOUND {
            tracing::info!(
                %uri,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "GET completed, resource absent"
            );
            return Ok(SourceResult::NotFound);
        }

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                url: uri.clone(),
            });
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = StreamReader::new(body);
        let (stream, cache_path) = self
            .cache
            .store(
                &path,
                &mut reader,
                ctx,
                uri.as_str(),
                self.download_timeout,
                token,
            )
            .await?;

        tracing::info!(
            %uri,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "GET completed"
        );

        Ok(SourceResult::Available { stream, cache_path })
    }

    /// Fetch `uri` bypassing the shared cache entirely
    ///
    /// The download path's entry point: the response lands in a randomly
    /// named file under `temp_root` and the returned handle is the only
    /// reference to it. A `404` is reported as [`SourceResult::NotFound`]
    /// so the caller can treat an absent package as a result, not a failure.
    pub async fn get_stream(
        &self,
        uri: &Url,
        temp_root: &Path,
        token: &CancellationToken,
    ) -> Result<SourceResult> {
        let ctx = CacheContext::no_cache(temp_root);
        self.fetch(uri, uri.as_str(), &ctx, true, token).await
    }
}
