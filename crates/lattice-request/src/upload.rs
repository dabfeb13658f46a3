//! Multipart file uploads.
//!
//! Uploads go through the same outbound headers as regular requests (tenant
//! headers and bearer token) but bypass duplicate suppression and the
//! refresh-and-retry protocol.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;

use crate::dispatcher::RequestClient;
use crate::error::{RequestError, Result, TransportErrorKind};
use crate::pipeline::envelope_message;
use crate::transport::{ProgressCallback, RawResponse, UploadProgress, UploadRequest};

const TARGET: &str = "lattice_request::upload";

/// Default upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str = "/api/upload";

/// Options for a single upload.
#[derive(Clone)]
pub struct UploadOptions {
    /// Endpoint; relative URLs are resolved against the base URL.
    pub url: String,
    /// Multipart field name of the file.
    pub field_name: String,
    /// Extra text fields.
    pub form_data: BTreeMap<String, String>,
    /// Extra headers.
    pub headers: http::HeaderMap,
    /// Show the loading indicator.
    pub loading: bool,
    /// Loading indicator text.
    pub loading_text: Option<String>,
    /// Surface failures to the user.
    pub show_error: bool,
    /// Transport timeout.
    pub timeout: Duration,
    /// Called as the file is sent.
    pub on_progress: Option<ProgressCallback>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPLOAD_URL.to_string(),
            field_name: "file".to_string(),
            form_data: BTreeMap::new(),
            headers: http::HeaderMap::new(),
            loading: true,
            loading_text: None,
            show_error: true,
            timeout: Duration::from_secs(30),
            on_progress: None,
        }
    }
}

impl UploadOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the multipart field name of the file.
    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Add a text field.
    pub fn form_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_data.insert(key.into(), value.into());
        self
    }

    /// Do not show the loading indicator.
    pub fn no_loading(mut self) -> Self {
        self.loading = false;
        self
    }

    /// Set the loading indicator text.
    pub fn loading_text(mut self, text: impl Into<String>) -> Self {
        self.loading_text = Some(text.into());
        self
    }

    /// Do not surface failures to the user.
    pub fn silent(mut self) -> Self {
        self.show_error = false;
        self
    }

    /// Set the transport timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the progress callback.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("url", &self.url)
            .field("field_name", &self.field_name)
            .field("form_data", &self.form_data)
            .field("loading", &self.loading)
            .field("show_error", &self.show_error)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A successful upload.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadResult {
    /// The envelope's `data`, or its `url` when `data` is absent.
    pub data: Value,
    /// The full response envelope.
    pub raw: Value,
}

/// Callback invoked as each file of a batch completes.
pub type FileCompleteCallback = Arc<dyn Fn(usize, &Result<UploadResult>) + Send + Sync>;

/// Callback invoked with a file's index as its bytes are sent.
pub type FileProgressCallback = Arc<dyn Fn(usize, UploadProgress) + Send + Sync>;

/// Options for a batch upload.
#[derive(Clone)]
pub struct BatchUploadOptions {
    /// Files uploaded at the same time.
    pub concurrency: usize,
    /// Options applied to every file.
    pub upload: UploadOptions,
    /// Called with the file's index when it completes.
    pub on_file_complete: Option<FileCompleteCallback>,
    /// Called with the file's index as it is sent.
    pub on_file_progress: Option<FileProgressCallback>,
}

impl Default for BatchUploadOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            upload: UploadOptions::default(),
            on_file_complete: None,
            on_file_progress: None,
        }
    }
}

impl BatchUploadOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent uploads.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-file options.
    pub fn upload(mut self, options: UploadOptions) -> Self {
        self.upload = options;
        self
    }

    /// Set the completion callback.
    pub fn on_file_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &Result<UploadResult>) + Send + Sync + 'static,
    {
        self.on_file_complete = Some(Arc::new(callback));
        self
    }

    /// Set the per-file progress callback.
    pub fn on_file_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, UploadProgress) + Send + Sync + 'static,
    {
        self.on_file_progress = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for BatchUploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUploadOptions")
            .field("concurrency", &self.concurrency)
            .field("upload", &self.upload)
            .field("on_file_complete", &self.on_file_complete.is_some())
            .field("on_file_progress", &self.on_file_progress.is_some())
            .finish()
    }
}

/// A file of a batch that uploaded.
#[derive(Clone, Debug)]
pub struct BatchSuccess {
    /// Position in the input.
    pub index: usize,
    /// The file.
    pub file: PathBuf,
    /// The upload result.
    pub result: UploadResult,
}

/// A file of a batch that failed.
#[derive(Clone, Debug)]
pub struct BatchFailure {
    /// Position in the input.
    pub index: usize,
    /// The file.
    pub file: PathBuf,
    /// Why it failed.
    pub error: RequestError,
}

/// Outcome of a batch upload, ordered by input index.
#[derive(Clone, Debug, Default)]
pub struct BatchUploadReport {
    /// Files that uploaded.
    pub succeeded: Vec<BatchSuccess>,
    /// Files that failed.
    pub failed: Vec<BatchFailure>,
    /// Number of files in the batch.
    pub total: usize,
}

impl BatchUploadReport {
    /// Number of files that uploaded.
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    /// Number of files that failed.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

impl RequestClient {
    /// Upload one file.
    pub async fn upload(&self, file_path: impl Into<PathBuf>, options: UploadOptions) -> Result<UploadResult> {
        let file_path = file_path.into();
        let show_error = options.show_error;
        let _loading = options.loading.then(|| {
            self.loading()
                .acquire(options.loading_text.as_deref().unwrap_or("Uploading..."))
        });

        let result = self.send_upload(file_path, options).await;

        if let Err(err) = &result
            && show_error
            && !err.is_silent()
        {
            self.surface_error(err);
        }
        result
    }

    /// Upload files in consecutive groups of `options.concurrency`.
    ///
    /// A failed file does not stop the batch.
    pub async fn upload_batch(&self, files: Vec<PathBuf>, options: BatchUploadOptions) -> BatchUploadReport {
        let total = files.len();
        let concurrency = options.concurrency.max(1);
        let mut report = BatchUploadReport {
            total,
            ..BatchUploadReport::default()
        };

        let indexed: Vec<(usize, PathBuf)> = files.into_iter().enumerate().collect();
        for chunk in indexed.chunks(concurrency) {
            let uploads = chunk.iter().map(|(index, file)| {
                let mut file_options = options.upload.clone();
                if file_options.loading_text.is_none() {
                    file_options.loading_text = Some(format!("Uploading {}/{}", index + 1, total));
                }
                if let Some(on_file_progress) = options.on_file_progress.clone() {
                    let index = *index;
                    let per_upload = file_options.on_progress.take();
                    file_options.on_progress = Some(Arc::new(move |progress: UploadProgress| {
                        if let Some(per_upload) = &per_upload {
                            per_upload(progress);
                        }
                        on_file_progress(index, progress);
                    }));
                }
                let callback = options.on_file_complete.clone();
                async move {
                    let result = self.upload(file.clone(), file_options).await;
                    if let Some(callback) = callback {
                        callback(*index, &result);
                    }
                    (*index, file.clone(), result)
                }
            });

            for (index, file, result) in join_all(uploads).await {
                match result {
                    Ok(result) => report.succeeded.push(BatchSuccess { index, file, result }),
                    Err(error) => report.failed.push(BatchFailure { index, file, error }),
                }
            }
        }

        tracing::debug!(
            target: TARGET,
            "Batch upload finished: {}/{} succeeded",
            report.success_count(),
            total
        );
        report
    }

    async fn send_upload(&self, file_path: PathBuf, options: UploadOptions) -> Result<UploadResult> {
        let pipeline = &self.inner.pipeline;
        let url = pipeline.resolve_url(&options.url);
        let headers = pipeline.headers_for(&url, &options.headers).await?;

        let request = UploadRequest {
            url,
            headers,
            file_path,
            field_name: options.field_name,
            form_data: options.form_data,
            timeout: Some(options.timeout),
            on_progress: options.on_progress,
        };

        tracing::debug!(target: TARGET, "Uploading {} to {}", request.file_path.display(), request.url);
        let response = self
            .inner
            .transport
            .upload(request)
            .await
            .map_err(|err| match err.kind {
                TransportErrorKind::Aborted => RequestError::Cancelled,
                TransportErrorKind::Timeout => RequestError::Network {
                    message: "Upload timed out".to_string(),
                    timed_out: true,
                },
                TransportErrorKind::Network => {
                    tracing::warn!(target: TARGET, "Upload failed: {}", err);
                    RequestError::network("Network error")
                }
            })?;

        parse_upload_response(response)
    }
}

fn parse_upload_response(response: RawResponse) -> Result<UploadResult> {
    if response.status != 200 {
        return Err(RequestError::Http {
            status: response.status,
            message: format!("Unexpected HTTP status: {}", response.status),
        });
    }

    if !response.body.is_object() {
        return Err(RequestError::InvalidResponse(
            "Response is not valid JSON".to_string(),
        ));
    }

    match response.body.get("code").and_then(Value::as_i64) {
        Some(0 | 200) => {
            let data = match response.body.get("data") {
                Some(data) if is_truthy(data) => data.clone(),
                _ => response.body.get("url").cloned().unwrap_or(Value::Null),
            };
            Ok(UploadResult {
                data,
                raw: response.body,
            })
        }
        Some(code) => {
            let message = envelope_message(&response.body)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Business error: {code}"));
            Err(RequestError::business(code, message))
        }
        None => Err(RequestError::InvalidResponse(
            "upload response has no code".to_string(),
        )),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_success_codes() {
        let ok = parse_upload_response(RawResponse::new(
            200,
            json!({"code": 0, "data": "https://cdn.example.com/a.png"}),
        ))
        .unwrap();
        assert_eq!(ok.data, json!("https://cdn.example.com/a.png"));

        let legacy = parse_upload_response(RawResponse::new(
            200,
            json!({"code": 200, "url": "https://cdn.example.com/b.png"}),
        ))
        .unwrap();
        assert_eq!(legacy.data, json!("https://cdn.example.com/b.png"));
    }

    #[test]
    fn test_failures() {
        assert!(matches!(
            parse_upload_response(RawResponse::new(201, json!({"code": 0}))),
            Err(RequestError::Http { status: 201, .. })
        ));
        assert!(matches!(
            parse_upload_response(RawResponse::new(200, json!("<html>"))),
            Err(RequestError::InvalidResponse(_))
        ));
        assert_eq!(
            parse_upload_response(RawResponse::new(200, json!({"code": 13}))).unwrap_err(),
            RequestError::business(13, "Business error: 13")
        );
        assert_eq!(
            parse_upload_response(RawResponse::new(200, json!({"code": 7, "msg": "Too large"})))
                .unwrap_err(),
            RequestError::business(7, "Too large")
        );
    }
}
