//! The transport seam.
//!
//! A [`Transport`] performs the actual network I/O. The dispatcher wraps each
//! call in a [`TransportHandle`] so it can be aborted while outstanding.

mod reqwest_transport;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::descriptor::HttpMethod;
use crate::error::TransportError;

pub use self::reqwest_transport::{ReqwestTransport, ReqwestTransportBuilder, TransportConfig};

/// A fully prepared request, after the outbound pipeline ran.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// The HTTP method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Final headers.
    pub headers: http::HeaderMap,
    /// Query parameters or JSON body, depending on the method.
    pub data: Option<Value>,
    /// Transport timeout.
    pub timeout: Option<Duration>,
}

/// Bytes of an upload handed to the network so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadProgress {
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Size of the file.
    pub total_bytes: u64,
}

impl UploadProgress {
    /// Whole percentage sent, 0 to 100. An empty file counts as complete.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.bytes_sent.saturating_mul(100) / self.total_bytes).min(100) as u8
    }
}

/// Called as upload bytes are sent.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// A multipart file upload.
#[derive(Clone)]
pub struct UploadRequest {
    /// Absolute URL.
    pub url: String,
    /// Final headers.
    pub headers: http::HeaderMap,
    /// Path of the file to send.
    pub file_path: PathBuf,
    /// Multipart field name for the file.
    pub field_name: String,
    /// Extra text fields.
    pub form_data: BTreeMap<String, String>,
    /// Transport timeout.
    pub timeout: Option<Duration>,
    /// Progress reporting.
    pub on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("url", &self.url)
            .field("file_path", &self.file_path)
            .field("field_name", &self.field_name)
            .field("form_data", &self.form_data)
            .field("timeout", &self.timeout)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// What the transport delivered for a completed call.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, or the raw text as a JSON string when it is not JSON.
    pub body: Value,
}

impl RawResponse {
    /// Create a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Check if the status is in 200-299.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs network I/O for the dispatcher.
///
/// Every returned future completes exactly once with either a response or a
/// [`TransportError`]. Dropping the future must abort the underlying call.
pub trait Transport: Send + Sync {
    /// Issue a request.
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>>;

    /// Upload a file.
    fn upload(&self, request: UploadRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let _ = request;
        Box::pin(async { Err(TransportError::network("uploads are not supported by this transport")) })
    }
}

/// Unique identifier for one transport call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A handle to an outstanding transport call that can be aborted.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    /// The unique ID of this call.
    pub id: RequestId,
    cancel_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl TransportHandle {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = Self {
            id: RequestId::new(),
            cancel_tx: Arc::new(Mutex::new(Some(cancel_tx))),
        };
        (handle, cancel_rx)
    }

    /// Abort the call.
    ///
    /// Returns `true` if the abort signal was sent, `false` if the call has
    /// already completed or was already aborted.
    pub fn abort(&self) -> bool {
        if let Some(tx) = self.cancel_tx.lock().take() {
            tx.send(()).is_ok()
        } else {
            false
        }
    }

    /// Check if the call is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.cancel_tx.lock().is_some()
    }

    fn complete(&self) {
        self.cancel_tx.lock().take();
    }
}

/// Drive `call` until it completes or `handle` is aborted.
///
/// An abort that is observed before the call's own completion wins.
pub(crate) async fn run_cancellable<F>(
    handle: &TransportHandle,
    mut cancel_rx: oneshot::Receiver<()>,
    call: F,
) -> Result<RawResponse, TransportError>
where
    F: Future<Output = Result<RawResponse, TransportError>>,
{
    tokio::pin!(call);

    let result = tokio::select! {
        biased;
        signal = &mut cancel_rx => match signal {
            Ok(()) => Err(TransportError::aborted()),
            // Sender dropped without aborting; keep waiting on the call.
            Err(_) => call.await,
        },
        result = &mut call => result,
    };

    handle.complete();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_before_completion_wins() {
        let (handle, cancel_rx) = TransportHandle::new();
        assert!(handle.is_pending());
        assert!(handle.abort());

        let result = run_cancellable(&handle, cancel_rx, async {
            Ok(RawResponse::new(200, Value::Null))
        })
        .await;

        assert!(result.unwrap_err().is_aborted());
        assert!(!handle.is_pending());
    }

    #[tokio::test]
    async fn test_completion_clears_handle() {
        let (handle, cancel_rx) = TransportHandle::new();
        let result = run_cancellable(&handle, cancel_rx, async {
            Ok(RawResponse::new(204, Value::Null))
        })
        .await;

        assert_eq!(result.unwrap().status, 204);
        assert!(!handle.is_pending());
        assert!(!handle.abort());
    }

    #[tokio::test]
    async fn test_default_upload_unsupported() {
        struct NoUpload;
        impl Transport for NoUpload {
            fn send(&self, _: TransportRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
                Box::pin(async { Ok(RawResponse::new(200, Value::Null)) })
            }
        }

        let request = UploadRequest {
            url: "https://example.com/upload".into(),
            headers: http::HeaderMap::new(),
            file_path: "a.png".into(),
            field_name: "file".into(),
            form_data: BTreeMap::new(),
            timeout: None,
            on_progress: None,
        };
        assert!(NoUpload.upload(request).await.is_err());
    }

    #[test]
    fn test_progress_percent() {
        let progress = |bytes_sent, total_bytes| UploadProgress {
            bytes_sent,
            total_bytes,
        };
        assert_eq!(progress(0, 200).percent(), 0);
        assert_eq!(progress(99, 200).percent(), 49);
        assert_eq!(progress(200, 200).percent(), 100);
        assert_eq!(progress(0, 0).percent(), 100);
    }
}
