//! Transport implementation backed by reqwest.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{
    ProgressCallback, RawResponse, Transport, TransportRequest, UploadProgress, UploadRequest,
};
use crate::error::{RequestError, TransportError};

/// Size of the chunks a progress-reporting upload is streamed in.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for the reqwest transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Default request timeout.
    pub timeout: Option<Duration>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Default user agent.
    pub user_agent: Option<String>,
    /// Proxy URL.
    pub proxy: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            user_agent: Some(format!("LatticeRequest/{} (Rust)", env!("CARGO_PKG_VERSION"))),
            proxy: None,
        }
    }
}

/// Builder for a [`ReqwestTransport`].
pub struct ReqwestTransportBuilder {
    config: TransportConfig,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransportBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Disable the default request timeout.
    pub fn no_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Set a proxy URL.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy_url.into());
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<ReqwestTransport, RequestError> {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(ref ua) = self.config.user_agent {
            builder = builder.user_agent(ua);
        }
        if let Some(ref proxy_url) = self.config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| RequestError::Config(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| RequestError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(ReqwestTransport {
            inner: Arc::new(ReqwestTransportInner {
                client,
                config: self.config,
            }),
        })
    }
}

struct ReqwestTransportInner {
    client: reqwest::Client,
    config: TransportConfig,
}

/// A [`Transport`] that performs real HTTP calls.
///
/// Cheaply cloneable; clones share the connection pool. Data of GET, HEAD and
/// DELETE requests is sent as query parameters, anything else as a JSON body.
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: Arc<ReqwestTransportInner>,
}

impl ReqwestTransport {
    /// Create a builder.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }

    /// Get the transport's configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    async fn execute(client: reqwest::Client, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let mut url = url::Url::parse(&request.url)?;
        let mut json_body = None;

        match request.data {
            Some(Value::Object(map)) if request.method.sends_data_as_query() => {
                let pairs: Vec<(String, String)> = map
                    .into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::Null => None,
                        Value::String(s) => Some((key, s)),
                        other => Some((key, other.to_string())),
                    })
                    .collect();
                if !pairs.is_empty() {
                    url.query_pairs_mut().extend_pairs(pairs);
                }
            }
            Some(Value::Null) | None => {}
            Some(value) => json_body = Some(value),
        }

        let mut req_builder = client
            .request(request.method.to_reqwest(), url)
            .headers(request.headers);

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }
        if let Some(body) = json_body {
            req_builder = req_builder.json(&body);
        }

        let response = req_builder.send().await?;
        read_response(response).await
    }

    async fn execute_upload(client: reqwest::Client, request: UploadRequest) -> Result<RawResponse, TransportError> {
        let bytes = tokio::fs::read(&request.file_path).await?;
        let file_name = request
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = match request.on_progress {
            Some(on_progress) => progress_part(bytes, on_progress),
            None => reqwest::multipart::Part::bytes(bytes),
        };

        let mut form = reqwest::multipart::Form::new();
        for (key, value) in request.form_data {
            form = form.text(key, value);
        }
        form = form.part(request.field_name, part.file_name(file_name));

        // The multipart body sets its own content type.
        let mut headers = request.headers;
        headers.remove(http::header::CONTENT_TYPE);

        let mut req_builder = client.post(&request.url).headers(headers).multipart(form);
        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await?;
        read_response(response).await
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let client = self.inner.client.clone();
        Box::pin(Self::execute(client, request))
    }

    fn upload(&self, request: UploadRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let client = self.inner.client.clone();
        Box::pin(Self::execute_upload(client, request))
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Stream the file in chunks, reporting each chunk as the client takes it.
fn progress_part(bytes: Vec<u8>, on_progress: ProgressCallback) -> reqwest::multipart::Part {
    let total_bytes = bytes.len() as u64;
    let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();

    let mut bytes_sent = 0u64;
    let stream = futures_util::stream::iter(chunks).map(move |chunk| {
        bytes_sent += chunk.len() as u64;
        on_progress(UploadProgress {
            bytes_sent,
            total_bytes,
        });
        Ok::<_, std::io::Error>(chunk)
    });

    reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), total_bytes)
}

async fn read_response(response: reqwest::Response) -> Result<RawResponse, TransportError> {
    let status = response.status().as_u16();
    let text = response.text().await?;

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(RawResponse { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let transport = ReqwestTransport::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("Test/1.0")
            .build()
            .expect("Failed to build transport");

        assert_eq!(transport.config().timeout, Some(Duration::from_secs(5)));
        assert_eq!(transport.config().user_agent.as_deref(), Some("Test/1.0"));
    }
}
