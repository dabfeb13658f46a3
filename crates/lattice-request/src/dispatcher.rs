//! The request dispatcher.
//!
//! [`RequestClient`] is the entry point applications use: it runs every call
//! through the interceptor pipeline, enforces one in-flight call per request
//! identity, drives the refresh-and-retry protocol on authentication failures
//! and surfaces errors to the user.
//!
//! # Example
//!
//! ```ignore
//! use lattice_request::{ClientConfig, RequestClient, RequestOptions};
//!
//! let client = RequestClient::builder(ClientConfig::new("https://api.example.com"))
//!     .build()?;
//!
//! let info = client
//!     .get("/api/user/info", None, RequestOptions::new().no_loading())
//!     .await?;
//!
//! // Abort everything still talking to the user endpoints
//! client.cancel_requests_by_url_fragment("/api/user");
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::descriptor::{HttpMethod, RequestDescriptor, RequestOptions};
use crate::error::{RequestError, Result};
use crate::feedback::{ErrorThrottle, Feedback, LoadingCounter, Navigator, NoopNavigator, TracingFeedback};
use crate::identity::RequestIdentity;
use crate::pipeline::{InboundOutcome, InterceptorPipeline, RequestInterceptor};
use crate::registry::RequestRegistry;
use crate::token::{HttpTokenRefresher, MemoryTokenStore, TokenManager, TokenRefresher, TokenStore};
use crate::transport::{ReqwestTransport, Transport, TransportHandle, TransportRequest, run_cancellable};

const TARGET: &str = "lattice_request::dispatcher";

/// Rejection for a 401 when no refresh can be attempted.
pub(crate) const UNAUTHORIZED_MESSAGE: &str = "Unauthorized, please sign in again";

/// Rejection for a 401 whose refresh failed.
pub(crate) const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please sign in again";

/// Builder for a [`RequestClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn TokenStore>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    feedback: Option<Arc<dyn Feedback>>,
    navigator: Option<Arc<dyn Navigator>>,
    interceptors: Vec<RequestInterceptor>,
}

impl ClientBuilder {
    /// Create a builder with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            refresher: None,
            feedback: None,
            navigator: None,
            interceptors: Vec::new(),
        }
    }

    /// Use a custom transport instead of [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a token store. Defaults to [`MemoryTokenStore`].
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom refresher instead of [`HttpTokenRefresher`].
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Set the loading and error surface. Defaults to [`TracingFeedback`].
    pub fn feedback(mut self, feedback: Arc<dyn Feedback>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Set the login navigator. Defaults to [`NoopNavigator`].
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Add a request interceptor.
    ///
    /// Request interceptors are called in order after the built-in outbound
    /// transform, on every attempt.
    pub fn add_request_interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(&mut TransportRequest) + Send + Sync + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<RequestClient> {
        let config = self.config;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::builder()
                    .timeout(config.request_timeout)
                    .build()?,
            ),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let refresher = self.refresher.unwrap_or_else(|| {
            Arc::new(HttpTokenRefresher::new(transport.clone(), config.clone()))
        });
        let feedback = self.feedback.unwrap_or_else(|| Arc::new(TracingFeedback));
        let navigator = self.navigator.unwrap_or_else(|| Arc::new(NoopNavigator));

        let tokens = TokenManager::new(config.token.clone(), store, refresher, navigator);
        let pipeline = self.interceptors.into_iter().fold(
            InterceptorPipeline::new(config.clone(), tokens.clone()),
            InterceptorPipeline::with_interceptor,
        );

        Ok(RequestClient {
            inner: Arc::new(ClientInner {
                loading: LoadingCounter::new(feedback.clone()),
                throttle: ErrorThrottle::new(config.error_throttle),
                registry: RequestRegistry::new(),
                config,
                transport,
                tokens,
                pipeline,
                feedback,
            }),
        })
    }
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tokens: Arc<TokenManager>,
    pub(crate) pipeline: InterceptorPipeline,
    pub(crate) registry: RequestRegistry,
    pub(crate) loading: LoadingCounter,
    pub(crate) throttle: ErrorThrottle,
    pub(crate) feedback: Arc<dyn Feedback>,
}

/// Orchestrates requests against one backend.
///
/// Cheaply cloneable; clones share the registry, the token manager and the
/// loading counter.
///
/// Every call settles exactly once:
/// - an identical call already in flight rejects the new one with
///   [`RequestError::Suppressed`] unless `cancel_previous` is set
/// - a 401 refreshes the token once (joining a refresh already in flight) and
///   replays the call; a second 401 rejects with [`RequestError::RetryExhausted`]
/// - an aborted call rejects with [`RequestError::Cancelled`]
#[derive(Clone)]
pub struct RequestClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl RequestClient {
    /// Create a builder.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Create a client with default collaborators.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    /// The client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The token manager.
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.inner.tokens
    }

    /// The loading indicator counter.
    pub fn loading(&self) -> &LoadingCounter {
        &self.inner.loading
    }

    /// The identity a descriptor is tracked under.
    pub fn identity_of(&self, descriptor: &RequestDescriptor) -> RequestIdentity {
        RequestIdentity::of(
            descriptor.method,
            &self.inner.pipeline.resolve_url(&descriptor.url),
            descriptor.data.as_ref(),
        )
    }

    /// Issue a request and resolve with the response body.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Value> {
        let show_error = descriptor.options.show_error;
        let _loading = descriptor.options.loading.then(|| {
            let text = descriptor
                .options
                .loading_text
                .as_deref()
                .unwrap_or(&self.inner.config.default_loading_text);
            self.inner.loading.acquire(text)
        });

        let result = self.execute(descriptor, 0).await;

        if let Err(err) = &result
            && show_error
            && !err.is_silent()
        {
            self.surface_error(err);
        }
        result
    }

    /// Issue a GET request.
    pub async fn get(&self, url: &str, data: Option<Value>, options: RequestOptions) -> Result<Value> {
        self.verb(HttpMethod::Get, url, data, options).await
    }

    /// Issue a POST request.
    pub async fn post(&self, url: &str, data: Option<Value>, options: RequestOptions) -> Result<Value> {
        self.verb(HttpMethod::Post, url, data, options).await
    }

    /// Issue a PUT request.
    pub async fn put(&self, url: &str, data: Option<Value>, options: RequestOptions) -> Result<Value> {
        self.verb(HttpMethod::Put, url, data, options).await
    }

    /// Issue a DELETE request.
    pub async fn delete(&self, url: &str, data: Option<Value>, options: RequestOptions) -> Result<Value> {
        self.verb(HttpMethod::Delete, url, data, options).await
    }

    async fn verb(
        &self,
        method: HttpMethod,
        url: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let mut descriptor = RequestDescriptor::new(method, url).options(options);
        descriptor.data = data;
        self.request(descriptor).await
    }

    /// Abort the in-flight call registered under `identity`.
    pub fn cancel_request(&self, identity: &RequestIdentity) -> bool {
        self.inner.registry.cancel(identity)
    }

    /// Abort every in-flight call.
    pub fn cancel_all_requests(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    /// Abort every in-flight call whose identity contains `fragment`.
    pub fn cancel_requests_by_url_fragment(&self, fragment: &str) -> usize {
        self.inner.registry.cancel_by_url_fragment(fragment)
    }

    /// Check if a call is in flight under `identity`.
    pub fn is_pending(&self, identity: &RequestIdentity) -> bool {
        self.inner.registry.is_pending(identity)
    }

    /// Number of calls in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.in_flight_count()
    }

    pub(crate) fn surface_error(&self, err: &RequestError) {
        let message = err.user_message();
        if self.inner.throttle.should_show(&message) {
            self.inner.feedback.show_error(&message);
        }
    }

    fn execute(&self, descriptor: RequestDescriptor, retry_count: u32) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let inner = &self.inner;

            let request = inner.pipeline.outbound(&descriptor).await?;
            let identity = RequestIdentity::of(request.method, &request.url, request.data.as_ref());

            if descriptor.options.cancel_previous && inner.registry.cancel(&identity) {
                tracing::debug!(target: TARGET, "Replaced in-flight {}", identity);
            }

            let (handle, cancel_rx) = TransportHandle::new();
            let Some(ticket) =
                inner
                    .registry
                    .begin(&identity, handle.clone(), descriptor.token_refreshed())
            else {
                tracing::debug!(target: TARGET, "Suppressed duplicate {}", identity);
                return Err(RequestError::Suppressed {
                    identity: identity.to_string(),
                });
            };

            tracing::trace!(target: TARGET, "Dispatching {} (attempt {})", identity, retry_count + 1);
            let call = inner.transport.send(request);
            let outcome = run_cancellable(&handle, cancel_rx, call).await;
            inner.registry.finish(&identity, ticket);

            let response = match outcome {
                Ok(response) => response,
                Err(err) if err.is_aborted() => {
                    tracing::debug!(target: TARGET, "Request cancelled: {}", identity);
                    return Err(RequestError::Cancelled);
                }
                Err(err) => {
                    tracing::warn!(target: TARGET, "Request {} failed: {}", identity, err);
                    return Err(err.into());
                }
            };

            match inner.pipeline.inbound(response) {
                InboundOutcome::Success(body) => Ok(body),
                InboundOutcome::Failure(err) => {
                    tracing::debug!(target: TARGET, "Request {} rejected: {}", identity, err);
                    Err(err)
                }
                InboundOutcome::Refresh => self.refresh_and_retry(descriptor, retry_count).await,
            }
        })
    }

    async fn refresh_and_retry(&self, descriptor: RequestDescriptor, retry_count: u32) -> Result<Value> {
        let inner = &self.inner;
        let tokens = &inner.tokens;

        if retry_count >= inner.config.max_retries {
            tracing::warn!(target: TARGET, "Still unauthorized after replay: {}", descriptor.url);
            return Err(RequestError::RetryExhausted);
        }

        if tokens.refresh_token_value().is_none() || !tokens.config().enable_auto_refresh {
            tokens.redirect_to_login();
            return Err(RequestError::Auth(UNAUTHORIZED_MESSAGE.to_string()));
        }

        let url = descriptor.url.clone();
        let replay = match tokens.add_to_queue(descriptor.clone()) {
            Some(queued) => queued.wait().await,
            None => tokens
                .refresh_token()
                .await
                .map(|()| descriptor.into_refreshed()),
        };

        // A failed refresh has already cleared the session and redirected.
        let replay = match replay {
            Ok(replay) => replay,
            Err(err) => {
                tracing::debug!(target: TARGET, "Refresh failed, giving up on {}: {}", url, err);
                return Err(RequestError::Auth(SESSION_EXPIRED_MESSAGE.to_string()));
            }
        };

        tokio::time::sleep(inner.config.retry_delay).await;
        self.execute(replay, retry_count + 1).await
    }
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("base_url", &self.inner.config.base_url)
            .field("registry", &self.inner.registry)
            .field("tokens", &self.inner.tokens)
            .finish()
    }
}
