//! User account endpoints.

use serde_json::Value;

use crate::descriptor::RequestOptions;
use crate::dispatcher::RequestClient;
use crate::error::Result;

/// Thin wrappers over the user endpoints.
#[derive(Clone, Debug)]
pub struct UserApi {
    client: RequestClient,
}

impl UserApi {
    /// Create the API over `client`.
    pub fn new(client: RequestClient) -> Self {
        Self { client }
    }

    /// `GET /api/user/info`
    pub async fn get_user_info(&self, params: Option<Value>) -> Result<Value> {
        self.client
            .get("/api/user/info", params, RequestOptions::default())
            .await
    }

    /// `POST /api/user/update`
    pub async fn update_user_info(&self, data: Value) -> Result<Value> {
        self.client
            .post("/api/user/update", Some(data), RequestOptions::default())
            .await
    }

    /// `POST /api/user/login`
    pub async fn login(&self, data: Value) -> Result<Value> {
        self.client
            .post("/api/user/login", Some(data), RequestOptions::default())
            .await
    }

    /// `POST /api/user/logout`
    pub async fn logout(&self) -> Result<Value> {
        self.client
            .post("/api/user/logout", None, RequestOptions::default())
            .await
    }
}
