//! Credential negotiation on authentication challenges
//!
//! A `401 Unauthorized` response is handled inside this module: the current
//! transport client is invalidated, new credentials are acquired (first
//! through a promptless token path, then through an injected interactive
//! prompt), and the request is retried with a fresh client. Reauthentication
//! is serialized per source; the interactive prompt is serialized globally so
//! only one prompt is ever visible at a time.
//!
//! Network-level send failures propagate unchanged: transient-failure retry
//! belongs to the download orchestrator, not here.

use crate::error::{Error, Result};
use crate::types::Credentials;
use async_trait::async_trait;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Give up and hand the `401` back to the caller after this many
/// reauthentication attempts per source
pub const MAX_AUTH_RETRIES: u32 = 10;

/// Builds transport clients carrying the given credentials
///
/// Invoked once at construction (no credentials) and again after every
/// successful credential acquisition.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Create a client; `credentials` is `None` for the initial,
    /// unauthenticated client
    async fn create(&self, credentials: Option<&Credentials>) -> Result<Client>;
}

/// Supplies credentials for a source when the server challenges
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Promptless token retrieval from the challenge (e.g. protocol-specific
    /// authentication-header negotiation); `Ok(None)` means this path does
    /// not apply and the interactive prompt should run
    async fn acquire_silently(
        &self,
        source: &Url,
        challenge: Option<&str>,
    ) -> Result<Option<Credentials>>;

    /// Interactive credential prompt; `Ok(None)` means the user declined
    async fn prompt(
        &self,
        source: &Url,
        token: &CancellationToken,
    ) -> Result<Option<Credentials>>;
}

/// Callback invoked when prompted credentials were accepted by the server,
/// so a credential store can persist them
pub type CredentialsAcceptedCallback = Arc<dyn Fn(&Url, &Credentials) + Send + Sync>;

/// Lock shared across all sources so only one interactive prompt is visible
/// at a time
///
/// Construct one per process and hand a clone to every negotiator.
pub type PromptLock = Arc<Mutex<()>>;

/// Mutable per-source transport state, guarded by the negotiation lock
struct ClientState {
    client: Client,
    /// Monotonically increasing marker, bumped whenever the client is
    /// replaced; compared by value to detect "someone else already
    /// reauthenticated"
    generation: u64,
    auth_retries: u32,
}

/// Per-source credential negotiation state machine
///
/// Lives as long as its source; the retry counter is never reset.
pub struct CredentialNegotiator {
    source: Url,
    factory: Arc<dyn ClientFactory>,
    provider: Option<Arc<dyn CredentialProvider>>,
    on_accepted: Option<CredentialsAcceptedCallback>,
    prompt_lock: PromptLock,
    state: Mutex<ClientState>,
}

impl CredentialNegotiator {
    /// Create a negotiator for `source` with an initial unauthenticated
    /// client
    pub async fn new(
        source: Url,
        factory: Arc<dyn ClientFactory>,
        provider: Option<Arc<dyn CredentialProvider>>,
        on_accepted: Option<CredentialsAcceptedCallback>,
        prompt_lock: PromptLock,
    ) -> Result<Self> {
        let client = factory.create(None).await?;
        Ok(Self {
            source,
            factory,
            provider,
            on_accepted,
            prompt_lock,
            state: Mutex::new(ClientState {
                client,
                generation: 0,
                auth_retries: 0,
            }),
        })
    }

    /// Current client generation (diagnostics and tests)
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Send a request, handling `401` challenges internally
    ///
    /// `build_request` is called with the current client for every attempt.
    /// Once the per-source retry budget is exhausted the last `401` response
    /// is returned as-is rather than as an error; callers inspect the status.
    pub async fn send<B>(&self, build_request: B, token: &CancellationToken) -> Result<Response>
    where
        B: Fn(&Client) -> reqwest::RequestBuilder,
    {
        // Local snapshot: lets this task detect whether another task has
        // already installed new credentials while it was waiting.
        let (mut client, mut generation) = {
            let state = self.state.lock().await;
            (state.client.clone(), state.generation)
        };
        let mut prompted: Option<Credentials> = None;

        loop {
            let response = tokio::select! {
                r = build_request(&client).send() => r?,
                _ = token.cancelled() => return Err(Error::Cancelled),
            };

            if response.status() == StatusCode::UNAUTHORIZED {
                // Only one task may reauthenticate a source at a time.
                let mut state = self.state.lock().await;

                if state.generation != generation {
                    // Another task already reauthenticated; just retry with
                    // the new client, no prompt.
                    client = state.client.clone();
                    generation = state.generation;
                    continue;
                }

                state.auth_retries += 1;
                if state.auth_retries >= MAX_AUTH_RETRIES {
                    tracing::warn!(
                        source = %self.source,
                        retries = state.auth_retries,
                        "Authentication retry budget exhausted, returning 401 to caller"
                    );
                    return Ok(response);
                }

                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);

                let acquired = self
                    .acquire_credentials(challenge.as_deref(), token)
                    .await?;

                match acquired {
                    Some((credentials, was_prompted)) => {
                        state.client = self.factory.create(Some(&credentials)).await?;
                        state.generation += 1;
                        tracing::debug!(
                            source = %self.source,
                            generation = state.generation,
                            "Installed new transport client after reauthentication"
                        );
                        if was_prompted {
                            prompted = Some(credentials);
                        }
                        client = state.client.clone();
                        generation = state.generation;
                        continue;
                    }
                    None => {
                        // No credentials to offer; the 401 is the result.
                        return Ok(response);
                    }
                }
            }

            if let (Some(credentials), Some(callback)) = (&prompted, &self.on_accepted) {
                callback(&self.source, credentials);
            }

            return Ok(response);
        }
    }

    /// Try the promptless path, then the interactive prompt
    ///
    /// Returns the credentials and whether they came from the prompt.
    async fn acquire_credentials(
        &self,
        challenge: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Option<(Credentials, bool)>> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };

        if let Some(credentials) = provider.acquire_silently(&self.source, challenge).await? {
            return Ok(Some((credentials, false)));
        }

        // Only one prompt may display at a time, across all sources.
        let _prompt_guard = self.prompt_lock.lock().await;
        let prompted = tokio::select! {
            r = provider.prompt(&self.source, token) => r?,
            _ = token.cancelled() => return Err(Error::Cancelled),
        };
        Ok(prompted.map(|credentials| (credentials, true)))
    }
}
