//! Reqwest transport and HTTP refresher tests.

use std::time::Duration;

use lattice_request::{ReqwestTransport, TransportConfig};

#[test]
fn test_default_config() {
    let config = TransportConfig::default();
    assert_eq!(config.timeout, Some(Duration::from_secs(30)));
    assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
    assert!(config.user_agent.unwrap().starts_with("LatticeRequest/"));
    assert!(config.proxy.is_none());
}

#[test]
fn test_builder_no_timeout() {
    let transport = ReqwestTransport::builder()
        .no_timeout()
        .connect_timeout(Duration::from_secs(3))
        .build()
        .expect("Failed to build transport");

    assert_eq!(transport.config().timeout, None);
    assert_eq!(transport.config().connect_timeout, Some(Duration::from_secs(3)));
}

// Integration tests with wiremock
#[cfg(feature = "integration-tests")]
mod integration_tests {
    use std::io::Write;
    use std::sync::Arc;

    use lattice_request::{
        ClientConfig, HttpMethod, HttpTokenRefresher, MemoryTokenStore, NoopFeedback,
        RequestClient, RequestError, RequestOptions, TokenRefresher, TokenState, Transport,
        TransportRequest, UploadOptions, UploadProgress,
    };
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn transport() -> ReqwestTransport {
        ReqwestTransport::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build transport")
    }

    fn request(method: HttpMethod, url: String, data: Option<Value>) -> TransportRequest {
        TransportRequest {
            method,
            url,
            headers: http::HeaderMap::new(),
            data,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn test_get_sends_data_as_query() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/orders"))
            .and(query_param("page", "2"))
            .and(query_param("status", "paid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": []})))
            .mount(&mock_server)
            .await;

        let response = transport()
            .send(request(
                HttpMethod::Get,
                format!("{}/api/orders", mock_server.uri()),
                Some(json!({"page": 2, "status": "paid", "cursor": null})),
            ))
            .await
            .expect("request failed");

        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"code": 0, "data": []}));
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/user/update"))
            .and(body_json(json!({"nickname": "lattice"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .mount(&mock_server)
            .await;

        let response = transport()
            .send(request(
                HttpMethod::Post,
                format!("{}/api/user/update", mock_server.uri()),
                Some(json!({"nickname": "lattice"})),
            ))
            .await
            .unwrap();

        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_non_json_and_empty_bodies() {
        let mock_server = MockServer::start().await;

        Mock::given(path("/text"))
            .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
            .mount(&mock_server)
            .await;
        Mock::given(path("/empty"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let text = transport()
            .send(request(HttpMethod::Get, format!("{}/text", mock_server.uri()), None))
            .await
            .unwrap();
        assert_eq!(text.status, 502);
        assert_eq!(text.body, json!("Bad Gateway"));

        let empty = transport()
            .send(request(HttpMethod::Get, format!("{}/empty", mock_server.uri()), None))
            .await
            .unwrap();
        assert_eq!(empty.body, Value::Null);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let mock_server = MockServer::start().await;

        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let mut slow = request(HttpMethod::Get, format!("{}/slow", mock_server.uri()), None);
        slow.timeout = Some(Duration::from_millis(100));

        let err = transport().send(slow).await.unwrap_err();
        assert!(err.is_timeout(), "expected timeout, got {err}");
    }

    #[tokio::test]
    async fn test_client_sends_session_headers() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/user/info"))
            .and(header("authorization", "Bearer abc"))
            .and(header("tenant-id", "7"))
            .and(header("login_user_type", "3"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"id": 1}})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = RequestClient::builder(
            ClientConfig::new(mock_server.uri()).with_tenant_id("7"),
        )
        .token_store(Arc::new(MemoryTokenStore::with_state(
            TokenState::new("abc").expires_in(chrono::Duration::hours(1)),
        )))
        .feedback(Arc::new(NoopFeedback))
        .build()
        .unwrap();

        let body = client
            .get("/api/user/info", None, RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(body["data"]["id"], 1);
    }

    #[tokio::test]
    async fn test_end_to_end_refresh() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/refresh-token"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"accessToken": "fresh", "refreshToken": "r2", "expiresTime": 4102444800000i64}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(path("/api/profile"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": "ok"})))
            .mount(&mock_server)
            .await;
        Mock::given(path("/api/profile"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 401})))
            .mount(&mock_server)
            .await;

        let client = RequestClient::builder(
            ClientConfig::new(mock_server.uri()).with_auto_refresh(true),
        )
        .token_store(Arc::new(MemoryTokenStore::with_state(
            TokenState::new("stale")
                .with_refresh_token("r1")
                .expires_in(chrono::Duration::hours(1)),
        )))
        .feedback(Arc::new(NoopFeedback))
        .build()
        .unwrap();

        let body = client
            .get("/api/profile", None, RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(body["data"], "ok");
        assert_eq!(client.tokens().refresh_token_value().as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_refresher_http_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(path("/refresh-token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let refresher = HttpTokenRefresher::new(
            Arc::new(transport()),
            ClientConfig::new(mock_server.uri()),
        );
        let err = refresher.refresh("r1").await.unwrap_err();
        assert!(matches!(err, RequestError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_upload_multipart() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .and(header("tenant-id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": "https://cdn.example.com/avatar.png"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(b"not really a png").unwrap();

        let client = RequestClient::builder(ClientConfig::new(mock_server.uri()))
            .feedback(Arc::new(NoopFeedback))
            .build()
            .unwrap();

        let result = client
            .upload(file.path(), UploadOptions::new().form_field("scene", "avatar"))
            .await
            .unwrap();

        assert_eq!(result.data, json!("https://cdn.example.com/avatar.png"));
    }

    #[tokio::test]
    async fn test_upload_streams_progress() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "url": "u"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(&vec![7u8; 200 * 1024]).unwrap();

        let client = RequestClient::builder(ClientConfig::new(mock_server.uri()))
            .feedback(Arc::new(NoopFeedback))
            .build()
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let options = UploadOptions::new().on_progress({
            let seen = seen.clone();
            move |progress: UploadProgress| seen.lock().push(progress)
        });

        let result = client.upload(file.path(), options).await.unwrap();
        assert_eq!(result.data, json!("u"));

        let seen = seen.lock().clone();
        assert!(seen.len() >= 2, "expected chunked progress, got {seen:?}");
        assert!(seen.windows(2).all(|w| w[0].bytes_sent < w[1].bytes_sent));
        let last = seen.last().unwrap();
        assert_eq!(last.bytes_sent, 200 * 1024);
        assert_eq!(last.total_bytes, 200 * 1024);
        assert_eq!(last.percent(), 100);
    }
}
