//! Durable token storage.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RequestError, Result};

/// The persisted authentication state.
///
/// Serialized with the field names used by the login and refresh endpoints;
/// `expiresTime` is epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenState {
    /// Bearer token attached to requests.
    pub access_token: String,
    /// Token exchanged for a new access token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry instant; absent means already expired.
    #[serde(
        rename = "expiresTime",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    /// The signed-in user's id.
    #[serde(default, deserialize_with = "user_id_from_any")]
    pub user_id: Option<String>,
}

impl TokenState {
    /// Create a state with an access token and no expiry.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            user_id: None,
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Set the expiry instant.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Set the expiry relative to now.
    pub fn expires_in(self, lifetime: chrono::Duration) -> Self {
        self.with_expires_at(Utc::now() + lifetime)
    }

    /// Set the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

// Backends send the user id as a number or a string.
fn user_id_from_any<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Key/value holder for the token state. Pure storage, no logic.
pub trait TokenStore: Send + Sync {
    /// Read the stored state.
    fn load(&self) -> Result<Option<TokenState>>;

    /// Replace the stored state.
    fn save(&self, state: &TokenState) -> Result<()>;

    /// Remove the stored state.
    fn clear(&self) -> Result<()>;
}

/// In-memory token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: Mutex<Option<TokenState>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `state`.
    pub fn with_state(state: TokenState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<TokenState>> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &TokenState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.state.lock().take();
        Ok(())
    }
}

/// Token store persisted as a JSON file.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Create a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Create a store in the platform data directory for `app_name`.
    pub fn in_data_dir(app_name: &str) -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", app_name).ok_or_else(|| {
            RequestError::Storage("no home directory available".to_string())
        })?;
        Ok(Self::new(dirs.data_dir().join("token.json")))
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<TokenState>> {
        let _guard = self.lock.lock();
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RequestError::Storage(format!("corrupt token file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RequestError::Storage(e.to_string())),
        }
    }

    fn save(&self, state: &TokenState) -> Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RequestError::Storage(e.to_string()))?;
        }
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| RequestError::Storage(e.to_string()))?;
        std::fs::write(&self.path, bytes).map_err(|e| RequestError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RequestError::Storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);

        let state = TokenState::new("abc").with_refresh_token("def");
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_wire_format() {
        let state: TokenState = serde_json::from_str(
            r#"{"accessToken":"a","refreshToken":"r","expiresTime":1700000000000,"userId":42}"#,
        )
        .unwrap();

        assert_eq!(state.access_token, "a");
        assert_eq!(state.refresh_token.as_deref(), Some("r"));
        assert_eq!(state.expires_at.unwrap().timestamp_millis(), 1_700_000_000_000);
        assert_eq!(state.user_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_missing_optional_fields() {
        let state: TokenState = serde_json::from_str(r#"{"accessToken":"a"}"#).unwrap();
        assert_eq!(state.refresh_token, None);
        assert_eq!(state.expires_at, None);
        assert_eq!(state.user_id, None);
    }
}
