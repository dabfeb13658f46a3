//! Authentication token handling.
//!
//! - [`TokenStore`]: where the token state lives
//! - [`TokenRefresher`]: how a refresh token is exchanged
//! - [`TokenManager`]: validity checks, single-flight refresh and the
//!   debounced redirect to login

mod manager;
mod refresher;
mod store;

pub use manager::{QueuedRetry, TokenManager, TokenStatus};
pub use refresher::{HttpTokenRefresher, TokenRefresher};
pub use store::{FileTokenStore, MemoryTokenStore, TokenState, TokenStore};
