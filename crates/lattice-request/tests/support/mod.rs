//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use lattice_request::{
    ClientConfig, Feedback, MemoryTokenStore, Navigator, RawResponse, RequestClient,
    RequestError, TokenRefresher, TokenState, Transport, TransportError, TransportRequest,
    UploadProgress, UploadRequest,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;

type Outcome = Result<RawResponse, TransportError>;

/// Size the mock transport reports for every uploaded file.
pub const UPLOAD_SIZE: u64 = 1024;

/// What the mock transport does for one call.
pub enum Reply {
    Now(Outcome),
    Gated(oneshot::Receiver<Outcome>),
}

/// A transport that replays a script of replies and records every call.
///
/// Once the script runs out every call succeeds with `{"code": 0}`.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<TransportRequest>>,
    uploads: Mutex<Vec<UploadRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, status: u16, body: Value) {
        self.script
            .lock()
            .push_back(Reply::Now(Ok(RawResponse::new(status, body))));
    }

    pub fn fail(&self, error: TransportError) {
        self.script.lock().push_back(Reply::Now(Err(error)));
    }

    /// Queue a reply that stays outstanding until the returned sender fires.
    pub fn gate(&self) -> oneshot::Sender<Outcome> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().push_back(Reply::Gated(rx));
        tx
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    fn next(&self) -> BoxFuture<'static, Outcome> {
        let reply = self.script.lock().pop_front();
        match reply {
            Some(Reply::Now(outcome)) => Box::pin(async move { outcome }),
            Some(Reply::Gated(rx)) => Box::pin(async move {
                rx.await
                    .unwrap_or_else(|_| Err(TransportError::network("gate dropped")))
            }),
            None => Box::pin(async { Ok(RawResponse::new(200, json!({"code": 0}))) }),
        }
    }
}

impl Transport for MockTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'static, Outcome> {
        self.calls.lock().push(request);
        self.next()
    }

    /// Reports progress in two halves of an [`UPLOAD_SIZE`]-byte file.
    fn upload(&self, request: UploadRequest) -> BoxFuture<'static, Outcome> {
        if let Some(on_progress) = &request.on_progress {
            for bytes_sent in [UPLOAD_SIZE / 2, UPLOAD_SIZE] {
                on_progress(UploadProgress {
                    bytes_sent,
                    total_bytes: UPLOAD_SIZE,
                });
            }
        }
        self.uploads.lock().push(request);
        self.next()
    }
}

/// A refresher that counts calls and returns a fixed outcome after a delay.
pub struct MockRefresher {
    outcome: Result<TokenState, RequestError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockRefresher {
    pub fn succeeding(access_token: &str) -> Arc<Self> {
        Self::with_outcome(Ok(
            TokenState::new(access_token).expires_in(chrono::Duration::hours(2))
        ))
    }

    pub fn failing(error: RequestError) -> Arc<Self> {
        Self::with_outcome(Err(error))
    }

    pub fn with_outcome(outcome: Result<TokenState, RequestError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenRefresher for MockRefresher {
    fn refresh(&self, _refresh_token: &str) -> BoxFuture<'static, lattice_request::Result<TokenState>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.clone();
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            outcome
        })
    }
}

/// Feedback that records every call.
#[derive(Default)]
pub struct RecordingFeedback {
    events: Mutex<Vec<String>>,
}

impl RecordingFeedback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("error:").map(str::to_string))
            .collect()
    }
}

impl Feedback for RecordingFeedback {
    fn show_loading(&self, text: &str) {
        self.events.lock().push(format!("show:{text}"));
    }

    fn hide_loading(&self) {
        self.events.lock().push("hide".to_string());
    }

    fn show_error(&self, message: &str) {
        self.events.lock().push(format!("error:{message}"));
    }
}

/// Navigator that counts redirects.
#[derive(Default)]
pub struct RecordingNavigator {
    on_login_page: AtomicBool,
    fail_redirects: AtomicBool,
    redirects: AtomicUsize,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_on_login_page(&self, value: bool) {
        self.on_login_page.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_redirects(&self, value: bool) {
        self.fail_redirects.store(value, Ordering::SeqCst);
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn is_on_login_page(&self) -> bool {
        self.on_login_page.load(Ordering::SeqCst)
    }

    fn redirect_to_login(&self) -> Result<(), String> {
        self.redirects.fetch_add(1, Ordering::SeqCst);
        if self.fail_redirects.load(Ordering::SeqCst) {
            Err("navigation unavailable".to_string())
        } else {
            Ok(())
        }
    }
}

/// A client wired to mocks.
pub struct Harness {
    pub client: RequestClient,
    pub transport: Arc<MockTransport>,
    pub refresher: Arc<MockRefresher>,
    pub store: Arc<MemoryTokenStore>,
    pub feedback: Arc<RecordingFeedback>,
    pub navigator: Arc<RecordingNavigator>,
}

pub const BASE_URL: &str = "https://api.example.com";

/// A session token valid for an hour, refreshable.
pub fn session() -> TokenState {
    TokenState::new("abc")
        .with_refresh_token("r1")
        .expires_in(chrono::Duration::hours(1))
}

pub fn harness(token: Option<TokenState>, refresher: Arc<MockRefresher>) -> Harness {
    harness_with(ClientConfig::new(BASE_URL).with_auto_refresh(true), token, refresher)
}

pub fn harness_with(
    config: ClientConfig,
    token: Option<TokenState>,
    refresher: Arc<MockRefresher>,
) -> Harness {
    let transport = MockTransport::new();
    let store = Arc::new(match token {
        Some(state) => MemoryTokenStore::with_state(state),
        None => MemoryTokenStore::new(),
    });
    let feedback = RecordingFeedback::new();
    let navigator = RecordingNavigator::new();

    let client = RequestClient::builder(config)
        .transport(transport.clone())
        .token_store(store.clone())
        .token_refresher(refresher.clone())
        .feedback(feedback.clone())
        .navigator(navigator.clone())
        .build()
        .expect("Failed to build client");

    Harness {
        client,
        transport,
        refresher,
        store,
        feedback,
        navigator,
    }
}

/// Yield until `condition` holds, giving spawned tasks a chance to run.
pub async fn settle_until(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
