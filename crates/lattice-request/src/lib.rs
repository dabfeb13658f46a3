//! Request orchestration for Horizon Lattice clients.
//!
//! This crate sits between application code and the network:
//!
//! - **Deduplication**: at most one in-flight call per request identity
//! - **Cancellation**: abort by identity, by URL fragment, or everything
//! - **Token refresh**: an expiring token is refreshed exactly once no matter
//!   how many requests notice it, and requests that raced the expiry are
//!   replayed once the refresh lands
//! - **Feedback**: a reference-counted loading indicator and throttled error
//!   notifications
//!
//! # Making Requests
//!
//! ```ignore
//! use lattice_request::{ClientConfig, RequestClient, RequestDescriptor, RequestOptions};
//!
//! let client = RequestClient::builder(ClientConfig::new("https://api.example.com"))
//!     .token_store(Arc::new(FileTokenStore::in_data_dir("my-app")?))
//!     .build()?;
//!
//! // Convenience verbs
//! let info = client.get("/api/user/info", None, RequestOptions::new()).await?;
//!
//! // Full descriptor
//! let saved = client
//!     .request(
//!         RequestDescriptor::post("/api/user/update")
//!             .json(serde_json::json!({"nickname": "lattice"}))
//!             .options(RequestOptions::new().loading_text("Saving...")),
//!     )
//!     .await?;
//! ```
//!
//! ## Duplicates and Cancellation
//!
//! Two identical calls (same method, URL and body, regardless of key order)
//! never reach the network together. The second one is rejected with
//! [`RequestError::Suppressed`], unless it sets `cancel_previous`, in which
//! case the first one is aborted and rejects with [`RequestError::Cancelled`].
//!
//! ```ignore
//! let search = RequestOptions::new().cancel_previous().no_loading();
//! client.get("/api/search", Some(json!({"q": "lat"})), search).await?;
//!
//! client.cancel_requests_by_url_fragment("/api/search");
//! ```
//!
//! ## Tokens
//!
//! A 401 (either the HTTP status or envelope `code` 401) refreshes the token
//! through the [`TokenManager`] and replays the call once. A failed refresh
//! clears the stored token and asks the [`Navigator`] to show the login
//! surface, at most once per redirect window.
//!
//! ## Configuration
//!
//! ```ignore
//! let mut config = ClientConfig::load("request.toml")?;
//! config.resolve_environment(std::env::var("APP_ENV").ok().as_deref())?;
//! let client = RequestClient::new(config)?;
//! ```

mod config;
mod descriptor;
mod dispatcher;
mod error;
mod feedback;
mod identity;
mod pipeline;
mod registry;
mod upload;
mod user_api;

pub mod token;
pub mod transport;

pub use config::{ClientConfig, Environment, TokenConfig};
pub use descriptor::{HttpMethod, RequestDescriptor, RequestOptions};
pub use dispatcher::{ClientBuilder, RequestClient};
pub use error::{RequestError, Result, TransportError, TransportErrorKind};
pub use feedback::{
    ErrorThrottle, Feedback, LoadingCounter, LoadingGuard, Navigator, NoopFeedback,
    NoopNavigator, TracingFeedback,
};
pub use identity::RequestIdentity;
pub use pipeline::{
    CODE_SUCCESS, CODE_UNAUTHORIZED, InboundOutcome, InterceptorPipeline, RequestInterceptor,
    http_status_message,
};
pub use registry::{RequestRegistry, Ticket};
pub use token::{
    FileTokenStore, HttpTokenRefresher, MemoryTokenStore, TokenManager, TokenRefresher,
    TokenState, TokenStatus, TokenStore,
};
pub use transport::{
    ProgressCallback, RawResponse, ReqwestTransport, ReqwestTransportBuilder, RequestId,
    Transport, TransportConfig, TransportHandle, TransportRequest, UploadProgress, UploadRequest,
};
pub use upload::{
    BatchFailure, BatchSuccess, BatchUploadOptions, BatchUploadReport, DEFAULT_UPLOAD_URL,
    FileCompleteCallback, FileProgressCallback, UploadOptions, UploadResult,
};
pub use user_api::UserApi;
