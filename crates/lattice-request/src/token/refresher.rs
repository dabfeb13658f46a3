//! Token refresh endpoint.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use super::store::TokenState;
use crate::config::ClientConfig;
use crate::descriptor::HttpMethod;
use crate::error::{RequestError, Result};
use crate::pipeline::{base_headers, envelope_message};
use crate::transport::{Transport, TransportRequest};

/// Exchanges a refresh token for a new token state.
pub trait TokenRefresher: Send + Sync {
    /// Perform one refresh call.
    fn refresh(&self, refresh_token: &str) -> BoxFuture<'static, Result<TokenState>>;
}

/// Calls the refresh endpoint directly through the transport.
///
/// The call does not go through the dispatcher, so a 401 from the refresh
/// endpoint fails the refresh instead of triggering another one.
pub struct HttpTokenRefresher {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl HttpTokenRefresher {
    /// Create a refresher posting to `config.refresh_path`.
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    fn endpoint(&self) -> String {
        if self.config.refresh_path.starts_with("http") {
            self.config.refresh_path.clone()
        } else {
            format!("{}{}", self.config.base_url, self.config.refresh_path)
        }
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(&self, refresh_token: &str) -> BoxFuture<'static, Result<TokenState>> {
        let request = TransportRequest {
            method: HttpMethod::Post,
            url: self.endpoint(),
            headers: base_headers(&self.config, &http::HeaderMap::new()),
            data: Some(json!({ "refreshToken": refresh_token })),
            timeout: Some(self.config.request_timeout),
        };
        let call = self.transport.send(request);

        Box::pin(async move {
            let response = call.await.map_err(RequestError::from)?;
            if !response.is_success() {
                return Err(RequestError::Http {
                    status: response.status,
                    message: format!("token refresh failed with HTTP {}", response.status),
                });
            }
            parse_refresh_envelope(response.body)
        })
    }
}

fn parse_refresh_envelope(body: Value) -> Result<TokenState> {
    let code = body.get("code").and_then(Value::as_i64).ok_or_else(|| {
        RequestError::InvalidResponse("refresh response has no code".to_string())
    })?;

    if code != 0 {
        let message = envelope_message(&body).unwrap_or("token refresh rejected");
        return Err(RequestError::business(code, message));
    }

    let data = body.get("data").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(data)?)
}
