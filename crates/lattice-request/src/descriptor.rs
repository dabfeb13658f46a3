//! Request descriptors.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// HTTP request methods.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    #[default]
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PATCH method.
    Patch,
    /// HTTP HEAD method.
    Head,
    /// HTTP OPTIONS method.
    Options,
}

impl HttpMethod {
    /// Convert to reqwest method.
    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
            Self::Head => reqwest::Method::HEAD,
            Self::Options => reqwest::Method::OPTIONS,
        }
    }

    /// Methods whose data travels in the query string.
    pub(crate) fn sends_data_as_query(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
        }
    }
}

/// Per-call options.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Extra headers; these override the pipeline defaults.
    pub headers: http::HeaderMap,
    /// Show the loading indicator while the call is outstanding.
    pub loading: bool,
    /// Text for the loading indicator.
    pub loading_text: Option<String>,
    /// Surface failures to the user automatically.
    pub show_error: bool,
    /// Abort an identical call that is still in flight before issuing.
    pub cancel_previous: bool,
    /// Transport timeout for this call.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: http::HeaderMap::new(),
            loading: true,
            loading_text: None,
            show_error: true,
            cancel_previous: false,
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn header(
        mut self,
        name: impl TryInto<http::HeaderName>,
        value: impl TryInto<http::HeaderValue>,
    ) -> Self {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.headers.insert(name, value);
        }
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

    /// Abort an identical in-flight call before issuing this one.
    pub fn cancel_previous(mut self) -> Self {
        self.cancel_previous = true;
        self
    }

    /// Set the transport timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A logical request as handed to the dispatcher.
///
/// Immutable once dispatched, except that a replay after a token refresh is
/// marked with [`token_refreshed`](Self::token_refreshed) so it bypasses the
/// duplicate check.
#[derive(Clone, Debug, Default)]
pub struct RequestDescriptor {
    /// Absolute URL or a path relative to the configured base URL.
    pub url: String,
    /// The HTTP method.
    pub method: HttpMethod,
    /// Request data: query parameters for GET-like methods, a JSON body otherwise.
    pub data: Option<Value>,
    /// Per-call options.
    pub options: RequestOptions,
    token_refreshed: bool,
}

impl RequestDescriptor {
    /// Create a descriptor with default options.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            data: None,
            options: RequestOptions::default(),
            token_refreshed: false,
        }
    }

    /// Create a GET descriptor.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Create a POST descriptor.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    /// Set the request data from a serializable value.
    pub fn data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(e) => {
                tracing::error!(target: "lattice_request::descriptor", "Failed to serialize request data: {}", e);
            }
        }
        self
    }

    /// Set the request data from a JSON value.
    pub fn json(mut self, value: Value) -> Self {
        self.data = Some(value);
        self
    }

    /// Replace the options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether this descriptor is a replay after a token refresh.
    pub fn token_refreshed(&self) -> bool {
        self.token_refreshed
    }

    /// Mark this descriptor as a replay after a token refresh.
    pub(crate) fn into_refreshed(mut self) -> Self {
        self.token_refreshed = true;
        self
    }
}
