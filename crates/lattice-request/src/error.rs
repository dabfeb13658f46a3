//! Error types for request orchestration.

use std::fmt;

/// A specialized Result type for request operations.
pub type Result<T> = std::result::Result<T, RequestError>;

/// Message shown when the transport fails without a response.
pub(crate) const NETWORK_FAILURE_MESSAGE: &str =
    "Network connection failed, please check your network settings";

/// Errors produced while dispatching a request.
///
/// The type is `Clone` so that one refresh outcome can be handed to every
/// request waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The transport failed before any response arrived.
    #[error("{message}")]
    Network {
        /// Human-readable message.
        message: String,
        /// Whether the transport reported a timeout.
        timed_out: bool,
    },

    /// The transport returned a status outside 200-299.
    #[error("HTTP {status}: {message}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// Canned message for the status.
        message: String,
    },

    /// The response envelope carried a non-zero `code`.
    #[error("{message} (code {code})")]
    Business {
        /// The envelope code.
        code: i64,
        /// The envelope `msg`/`message`.
        message: String,
    },

    /// The session is no longer authenticated; a redirect to login was requested.
    #[error("{0}")]
    Auth(String),

    /// The request was aborted by cancellation.
    #[error("Request was cancelled")]
    Cancelled,

    /// The request kept failing authentication after a refresh.
    #[error("Retry limit exceeded")]
    RetryExhausted,

    /// An identical request is already in flight.
    #[error("Duplicate request suppressed: {identity}")]
    Suppressed {
        /// The identity of the request already in flight.
        identity: String,
    },

    /// The outbound pipeline could not prepare the request.
    #[error("Request interceptor error: {0}")]
    Interceptor(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The token store failed to read or write.
    #[error("Token storage error: {0}")]
    Storage(String),

    /// The response body could not be interpreted.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RequestError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Create a business error.
    pub fn business(code: i64, message: impl Into<String>) -> Self {
        Self::Business {
            code,
            message: message.into(),
        }
    }

    /// Whether this error must never be surfaced to the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Auth(_) | Self::Suppressed { .. }
        )
    }

    /// Whether this error came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The text shown to the user for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { message, .. } => message.clone(),
            Self::Http { message, .. } => message.clone(),
            Self::Business { message, .. } => message.clone(),
            Self::Auth(message) => message.clone(),
            Self::Interceptor(_) => "Request interceptor error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

impl From<toml::de::Error> for RequestError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Why a transport call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The call was aborted through its handle.
    Aborted,
    /// The call exceeded its timeout.
    Timeout,
    /// Any other network-level failure.
    Network,
}

/// A failure reported by the transport instead of a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    /// The failure category.
    pub kind: TransportErrorKind,
    /// Transport-specific detail.
    pub message: String,
}

impl TransportError {
    /// An aborted call.
    pub fn aborted() -> Self {
        Self {
            kind: TransportErrorKind::Aborted,
            message: "request aborted".to_string(),
        }
    }

    /// A timed-out call.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// A generic network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Network,
            message: message.into(),
        }
    }

    /// Check if the call was aborted.
    pub fn is_aborted(&self) -> bool {
        self.kind == TransportErrorKind::Aborted
    }

    /// Check if the call timed out.
    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportErrorKind::Aborted => write!(f, "Aborted: {}", self.message),
            TransportErrorKind::Timeout => write!(f, "Timed out: {}", self.message),
            TransportErrorKind::Network => write!(f, "Network error: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::network(format!("invalid URL: {err}"))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::network(format!("I/O error: {err}"))
    }
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Aborted => Self::Cancelled,
            TransportErrorKind::Timeout => Self::Network {
                message: NETWORK_FAILURE_MESSAGE.to_string(),
                timed_out: true,
            },
            TransportErrorKind::Network => Self::network(NETWORK_FAILURE_MESSAGE),
        }
    }
}
