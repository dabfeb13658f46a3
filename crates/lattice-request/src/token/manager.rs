//! Token validity and single-flight refresh coordination.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::refresher::TokenRefresher;
use super::store::{TokenState, TokenStore};
use crate::config::TokenConfig;
use crate::descriptor::RequestDescriptor;
use crate::error::{RequestError, Result};
use crate::feedback::Navigator;

const TARGET: &str = "lattice_request::token";

/// Where the stored token currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// A token is present and outside the buffer window.
    Valid,
    /// A token is present but within the buffer window of its expiry.
    ExpiringSoon,
    /// A refresh is in flight.
    Refreshing,
    /// No usable token.
    Expired,
}

enum Waiter {
    Caller(oneshot::Sender<Result<()>>),
    Request {
        descriptor: RequestDescriptor,
        tx: oneshot::Sender<Result<RequestDescriptor>>,
    },
}

impl Waiter {
    fn settle(self, outcome: &Result<()>) {
        // A dropped receiver means the waiting request went away; nothing to do.
        match self {
            Self::Caller(tx) => {
                let _ = tx.send(outcome.clone());
            }
            Self::Request { descriptor, tx } => {
                let _ = tx.send(outcome.clone().map(|()| descriptor.into_refreshed()));
            }
        }
    }
}

enum RefreshFlight {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// A request parked until the in-flight refresh settles.
#[must_use = "a queued retry does nothing unless awaited"]
pub struct QueuedRetry {
    rx: oneshot::Receiver<Result<RequestDescriptor>>,
}

impl QueuedRetry {
    /// Wait for the refresh; yields the descriptor marked for replay.
    pub async fn wait(self) -> Result<RequestDescriptor> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(RequestError::Auth(REFRESH_ABANDONED.to_string())))
    }
}

const REFRESH_ABANDONED: &str = "Token refresh was abandoned";

/// Single authority over token validity and refresh.
///
/// At most one refresh runs at a time. Callers arriving while it runs share
/// its outcome, and queued requests are settled in the order they were
/// queued. The refresh runs on its own task, so dropping the caller that
/// started it does not affect the others.
pub struct TokenManager {
    this: Weak<TokenManager>,
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    navigator: Arc<dyn Navigator>,
    config: Mutex<TokenConfig>,
    flight: Mutex<RefreshFlight>,
    redirect_blocked_until: Mutex<Option<Instant>>,
}

impl TokenManager {
    /// Create a manager.
    pub fn new(
        config: TokenConfig,
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn Navigator>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store,
            refresher,
            navigator,
            config: Mutex::new(config),
            flight: Mutex::new(RefreshFlight::Idle),
            redirect_blocked_until: Mutex::new(None),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> TokenConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration.
    pub fn configure(&self, config: TokenConfig) {
        *self.config.lock() = config;
    }

    /// Enable or disable automatic refresh.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.config.lock().enable_auto_refresh = enabled;
    }

    fn current(&self) -> Option<TokenState> {
        match self.store.load() {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(target: TARGET, "Failed to read token state: {}", err);
                None
            }
        }
    }

    /// The stored access token, regardless of expiry.
    pub fn access_token(&self) -> Option<String> {
        self.current().map(|state| state.access_token)
    }

    /// The stored refresh token.
    pub fn refresh_token_value(&self) -> Option<String> {
        self.current().and_then(|state| state.refresh_token)
    }

    /// Persist a new token state, e.g. after login.
    ///
    /// A state whose expiry has already passed is rejected.
    pub fn save_token(&self, state: &TokenState) -> Result<()> {
        if let Some(expires_at) = state.expires_at
            && expires_at <= Utc::now()
        {
            tracing::warn!(target: TARGET, "Refusing to save token that expired at {}", expires_at);
            return Err(RequestError::Storage(format!(
                "Token already expired at {expires_at}"
            )));
        }
        self.store.save(state)
    }

    /// Remove the stored token state.
    pub fn clear_token(&self) -> Result<()> {
        self.store.clear()
    }

    /// Check if the token is past its expiry. A missing expiry counts as expired.
    pub fn is_token_expired(&self) -> bool {
        self.is_expiring_within(Duration::ZERO)
    }

    /// Check if the token expires within the configured buffer window.
    pub fn is_token_expiring_soon(&self) -> bool {
        self.is_expiring_within(self.config().buffer_time)
    }

    /// Check if the token expires within `buffer`. A missing expiry counts as expired.
    pub fn is_expiring_within(&self, buffer: Duration) -> bool {
        match self.current() {
            Some(state) => state_expires_within(&state, buffer),
            None => true,
        }
    }

    /// Whether a refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.flight.lock(), RefreshFlight::Refreshing { .. })
    }

    /// Where the stored token stands.
    pub fn status(&self) -> TokenStatus {
        if self.is_refreshing() {
            return TokenStatus::Refreshing;
        }
        match self.current() {
            None => TokenStatus::Expired,
            Some(state) if state_expires_within(&state, Duration::ZERO) => TokenStatus::Expired,
            Some(state) if state_expires_within(&state, self.config().buffer_time) => {
                TokenStatus::ExpiringSoon
            }
            Some(_) => TokenStatus::Valid,
        }
    }

    /// Check if a non-expired token is stored.
    pub fn is_logged_in(&self) -> bool {
        self.current()
            .is_some_and(|state| !state_expires_within(&state, Duration::ZERO))
    }

    /// Return a token suitable for a request, refreshing first if it is about to expire.
    ///
    /// On the login surface, or with automatic refresh disabled, no refresh is
    /// attempted and the token is returned only while unexpired. `None` means
    /// the request should go out unauthenticated.
    pub async fn get_valid_token(&self) -> Option<String> {
        let state = self.current()?;
        let config = self.config();

        if self.navigator.is_on_login_page() || !config.enable_auto_refresh {
            return (!state_expires_within(&state, Duration::ZERO)).then_some(state.access_token);
        }

        if !state_expires_within(&state, config.buffer_time) {
            return Some(state.access_token);
        }

        match self.refresh_token().await {
            Ok(()) => self.access_token(),
            Err(err) => {
                tracing::debug!(target: TARGET, "Proceeding without token after failed refresh: {}", err);
                None
            }
        }
    }

    /// Refresh the token, joining the in-flight refresh if there is one.
    ///
    /// Every concurrent caller receives the outcome of the same refresh call.
    /// On success the new state is persisted and queued requests are released
    /// for replay; on failure the state is cleared, a redirect to login is
    /// requested and every queued request is rejected with the same error.
    pub async fn refresh_token(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let start = {
            let mut flight = self.flight.lock();
            match &mut *flight {
                RefreshFlight::Refreshing { waiters } => {
                    waiters.push(Waiter::Caller(tx));
                    false
                }
                RefreshFlight::Idle => {
                    *flight = RefreshFlight::Refreshing {
                        waiters: vec![Waiter::Caller(tx)],
                    };
                    true
                }
            }
        };

        if start {
            self.spawn_refresh();
        }

        rx.await
            .unwrap_or_else(|_| Err(RequestError::Auth(REFRESH_ABANDONED.to_string())))
    }

    fn spawn_refresh(&self) {
        let Some(manager) = self.this.upgrade() else {
            self.settle_flight(&Err(RequestError::Auth(REFRESH_ABANDONED.to_string())));
            return;
        };

        tokio::spawn(async move {
            let mut leader = FlightLeader {
                manager,
                settled: false,
            };
            let outcome = leader.manager.perform_refresh().await;
            leader.settle(&outcome);
        });
    }

    /// Park `descriptor` until the in-flight refresh settles.
    ///
    /// Returns `None` when no refresh is in flight; the caller then starts one
    /// with [`refresh_token`](Self::refresh_token).
    pub fn add_to_queue(&self, descriptor: RequestDescriptor) -> Option<QueuedRetry> {
        let mut flight = self.flight.lock();
        match &mut *flight {
            RefreshFlight::Refreshing { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(Waiter::Request { descriptor, tx });
                Some(QueuedRetry { rx })
            }
            RefreshFlight::Idle => None,
        }
    }

    async fn perform_refresh(&self) -> Result<()> {
        let Some(refresh_token) = self.refresh_token_value() else {
            return Err(RequestError::Auth("No refresh token available".to_string()));
        };

        tracing::debug!(target: TARGET, "Refreshing access token");

        let refreshed = match self.refresher.refresh(&refresh_token).await {
            Ok(mut state) => {
                if state.refresh_token.is_none() {
                    state.refresh_token = Some(refresh_token);
                }
                self.save_token(&state)
            }
            Err(err) => Err(err),
        };

        match refreshed {
            Ok(()) => {
                tracing::info!(target: TARGET, "Access token refreshed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(target: TARGET, "Token refresh failed: {}", err);
                if let Err(clear_err) = self.store.clear() {
                    tracing::warn!(target: TARGET, "Failed to clear token state: {}", clear_err);
                }
                self.redirect_to_login();
                Err(err)
            }
        }
    }

    fn settle_flight(&self, outcome: &Result<()>) {
        let waiters = {
            let mut flight = self.flight.lock();
            match std::mem::replace(&mut *flight, RefreshFlight::Idle) {
                RefreshFlight::Refreshing { waiters } => waiters,
                RefreshFlight::Idle => Vec::new(),
            }
        };

        tracing::debug!(target: TARGET, "Settling {} refresh waiter(s)", waiters.len());
        for waiter in waiters {
            waiter.settle(outcome);
        }
    }

    /// Send the user to the login surface, at most once per redirect window.
    ///
    /// Returns `true` if a redirect was issued.
    pub fn redirect_to_login(&self) -> bool {
        let now = Instant::now();
        {
            let mut blocked = self.redirect_blocked_until.lock();
            if let Some(until) = *blocked
                && now < until
            {
                return false;
            }
            *blocked = Some(now + self.config().redirect_delay);
        }

        if self.navigator.is_on_login_page() {
            return false;
        }

        tracing::info!(target: TARGET, "Redirecting to login");
        if let Err(err) = self.navigator.redirect_to_login() {
            tracing::error!(target: TARGET, "Redirect to login failed: {}", err);
            *self.redirect_blocked_until.lock() = None;
            return false;
        }
        true
    }

    /// Re-validate the session when the app returns to the foreground.
    ///
    /// Returns `false` only when a needed refresh failed.
    pub async fn check_on_app_resume(&self) -> bool {
        if self.navigator.is_on_login_page() || self.access_token().is_none() {
            return true;
        }

        let config = self.config();
        if config.enable_auto_refresh && self.is_expiring_within(config.buffer_time) {
            return self.refresh_token().await.is_ok();
        }

        true
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &*self.config.lock())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

fn state_expires_within(state: &TokenState, buffer: Duration) -> bool {
    let Some(expires_at) = state.expires_at else {
        return true;
    };
    let Ok(buffer) = chrono::Duration::from_std(buffer) else {
        return true;
    };
    match expires_at.checked_sub_signed(buffer) {
        Some(threshold) => Utc::now() >= threshold,
        None => true,
    }
}

/// Settles the flight even if the refresh task is dropped mid-way, as happens
/// when the runtime shuts down.
struct FlightLeader {
    manager: Arc<TokenManager>,
    settled: bool,
}

impl FlightLeader {
    fn settle(&mut self, outcome: &Result<()>) {
        self.settled = true;
        self.manager.settle_flight(outcome);
    }
}

impl Drop for FlightLeader {
    fn drop(&mut self) {
        if !self.settled {
            self.manager
                .settle_flight(&Err(RequestError::Auth(REFRESH_ABANDONED.to_string())));
        }
    }
}
