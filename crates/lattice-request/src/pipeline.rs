//! Outbound and inbound request transforms.
//!
//! The outbound side only fills in defaults: base URL, tenant headers and the
//! bearer token. It never fails because a token is missing; such requests go
//! out unauthenticated. The inbound side classifies a raw response into
//! success, a refresh escalation or a normalized failure.

use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::{RequestError, Result};
use crate::token::TokenManager;
use crate::transport::{RawResponse, TransportRequest};

const TARGET: &str = "lattice_request::pipeline";

/// Envelope code meaning success.
pub const CODE_SUCCESS: i64 = 0;

/// Envelope code meaning the token is invalid and the call may be replayed after a refresh.
pub const CODE_UNAUTHORIZED: i64 = 401;

/// Type alias for request interceptors.
///
/// Request interceptors run in order after the built-in outbound transform
/// and can modify the final request.
pub type RequestInterceptor = Arc<dyn Fn(&mut TransportRequest) + Send + Sync>;

/// Classification of a raw transport response.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundOutcome {
    /// The call succeeded; the body is returned as-is.
    Success(Value),
    /// The token was rejected; refresh and replay.
    Refresh,
    /// The call failed with an HTTP or business error.
    Failure(RequestError),
}

/// Canned message for a non-2xx HTTP status.
pub fn http_status_message(status: u16) -> &'static str {
    match status {
        401 => "Unauthorized, please sign in again",
        403 => "Access denied",
        404 => "The requested resource does not exist",
        500 => "Internal server error",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        _ => "Network request failed",
    }
}

/// Default headers for every outbound call, overridden by `user_headers`.
pub(crate) fn base_headers(config: &ClientConfig, user_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let defaults = [
        ("tenant-id", config.tenant_id.as_str()),
        ("login_user_type", config.login_user_type.as_str()),
    ];
    for (name, value) in defaults {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => {
                tracing::warn!(target: TARGET, "Skipping invalid value for header '{}'", name);
            }
        }
    }
    if let Ok(value) = HeaderValue::from_str(&config.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }

    for (name, value) in user_headers {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

/// Transforms descriptors into transport requests and raw responses into outcomes.
pub struct InterceptorPipeline {
    config: ClientConfig,
    tokens: Arc<TokenManager>,
    interceptors: Vec<RequestInterceptor>,
}

impl InterceptorPipeline {
    /// Create a pipeline.
    pub fn new(config: ClientConfig, tokens: Arc<TokenManager>) -> Self {
        Self {
            config,
            tokens,
            interceptors: Vec::new(),
        }
    }

    /// Add a request interceptor.
    pub fn with_interceptor(mut self, interceptor: RequestInterceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// The configuration this pipeline applies.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Prefix a relative URL with the base URL. URLs starting with `http` are kept.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http") {
            url.to_string()
        } else if url.starts_with('/') || self.config.base_url.is_empty() {
            format!("{}{}", self.config.base_url, url)
        } else {
            format!("{}/{}", self.config.base_url, url)
        }
    }

    /// Build the headers for a call to `url`, including the bearer token when one is available.
    pub async fn headers_for(&self, url: &str, user_headers: &HeaderMap) -> Result<HeaderMap> {
        let mut headers = base_headers(&self.config, user_headers);

        if self.config.skips_auth(url) {
            return Ok(headers);
        }

        if let Some(token) = self.tokens.get_valid_token().await {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                RequestError::Interceptor("access token is not a valid header value".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        } else {
            tracing::debug!(target: TARGET, "No valid token, sending {} unauthenticated", url);
        }

        Ok(headers)
    }

    /// Apply the outbound transform.
    pub async fn outbound(&self, descriptor: &RequestDescriptor) -> Result<TransportRequest> {
        let url = self.resolve_url(&descriptor.url);
        let headers = self.headers_for(&url, &descriptor.options.headers).await?;

        let mut request = TransportRequest {
            method: descriptor.method,
            url,
            headers,
            data: descriptor.data.clone(),
            timeout: Some(descriptor.options.timeout.unwrap_or(self.config.request_timeout)),
        };

        for interceptor in &self.interceptors {
            interceptor(&mut request);
        }

        Ok(request)
    }

    /// Classify a raw response.
    pub fn inbound(&self, response: RawResponse) -> InboundOutcome {
        classify(response)
    }
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("base_url", &self.config.base_url)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

fn classify(response: RawResponse) -> InboundOutcome {
    if !response.is_success() {
        if response.status == 401 {
            return InboundOutcome::Refresh;
        }
        return InboundOutcome::Failure(RequestError::Http {
            status: response.status,
            message: http_status_message(response.status).to_string(),
        });
    }

    let Some(code) = response.body.get("code").and_then(Value::as_i64) else {
        return InboundOutcome::Success(response.body);
    };

    match code {
        CODE_SUCCESS => InboundOutcome::Success(response.body),
        CODE_UNAUTHORIZED => InboundOutcome::Refresh,
        _ => {
            let message = envelope_message(&response.body).unwrap_or("Request failed");
            InboundOutcome::Failure(RequestError::business(code, message))
        }
    }
}

/// The `msg` or `message` field of an envelope.
pub(crate) fn envelope_message(body: &Value) -> Option<&str> {
    body.get("msg")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
}
