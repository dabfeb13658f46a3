//! UI collaborators and the bookkeeping around them.
//!
//! The host application supplies a [`Feedback`] for loading indicators and
//! error notifications, and a [`Navigator`] for sending the user to the login
//! surface. [`LoadingCounter`] and [`ErrorThrottle`] keep those calls sane
//! when many requests run at once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Loading indicator and error notification surface.
pub trait Feedback: Send + Sync {
    /// Show the loading indicator.
    fn show_loading(&self, text: &str);

    /// Hide the loading indicator.
    fn hide_loading(&self);

    /// Show an error notification.
    fn show_error(&self, message: &str);
}

/// Feedback that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFeedback;

impl Feedback for TracingFeedback {
    fn show_loading(&self, text: &str) {
        tracing::debug!(target: "lattice_request::feedback", "Loading: {}", text);
    }

    fn hide_loading(&self) {
        tracing::debug!(target: "lattice_request::feedback", "Loading finished");
    }

    fn show_error(&self, message: &str) {
        tracing::warn!(target: "lattice_request::feedback", "Request error: {}", message);
    }
}

/// Feedback that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFeedback;

impl Feedback for NoopFeedback {
    fn show_loading(&self, _text: &str) {}
    fn hide_loading(&self) {}
    fn show_error(&self, _message: &str) {}
}

/// Navigation to the authentication entry point.
pub trait Navigator: Send + Sync {
    /// Whether the user is currently on the login surface.
    fn is_on_login_page(&self) -> bool;

    /// Navigate to the login surface.
    fn redirect_to_login(&self) -> Result<(), String>;
}

/// Navigator for headless hosts.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn is_on_login_page(&self) -> bool {
        false
    }

    fn redirect_to_login(&self) -> Result<(), String> {
        tracing::info!(target: "lattice_request::feedback", "Login required");
        Ok(())
    }
}

struct LoadingInner {
    feedback: Arc<dyn Feedback>,
    count: Mutex<usize>,
}

/// Reference count of requests that asked for the loading indicator.
///
/// The indicator is shown when the count leaves zero and hidden when it
/// returns to zero.
#[derive(Clone)]
pub struct LoadingCounter {
    inner: Arc<LoadingInner>,
}

impl LoadingCounter {
    /// Create a counter driving `feedback`.
    pub fn new(feedback: Arc<dyn Feedback>) -> Self {
        Self {
            inner: Arc::new(LoadingInner {
                feedback,
                count: Mutex::new(0),
            }),
        }
    }

    /// Increment the count; the returned guard decrements it when dropped.
    pub fn acquire(&self, text: &str) -> LoadingGuard {
        let first = {
            let mut count = self.inner.count.lock();
            *count += 1;
            *count == 1
        };
        if first {
            self.inner.feedback.show_loading(text);
        }
        LoadingGuard {
            counter: self.clone(),
        }
    }

    /// Current number of outstanding guards.
    pub fn count(&self) -> usize {
        *self.inner.count.lock()
    }

    fn release(&self) {
        let last = {
            let mut count = self.inner.count.lock();
            if *count == 0 {
                return;
            }
            *count -= 1;
            *count == 0
        };
        if last {
            self.inner.feedback.hide_loading();
        }
    }
}

impl std::fmt::Debug for LoadingCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingCounter")
            .field("count", &self.count())
            .finish()
    }
}

/// Keeps one loading reference alive.
#[must_use = "dropping the guard releases the loading indicator"]
pub struct LoadingGuard {
    counter: LoadingCounter,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.counter.release();
    }
}

/// Collapses repeated identical error messages.
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    last: Mutex<Option<(String, Instant)>>,
}

impl ErrorThrottle {
    /// Create a throttle with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Record `message` and report whether it should be shown.
    ///
    /// The same message within the window is suppressed; a different message
    /// is always shown.
    pub fn should_show(&self, message: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();

        if let Some((previous, at)) = last.as_ref()
            && previous == message
            && now.duration_since(*at) <= self.window
        {
            return false;
        }

        *last = Some((message.to_string(), now));
        true
    }
}
