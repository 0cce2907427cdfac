//! Integration test harness for authgate
//! Provides a mock backend server and a client wired to it

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mockito::{Mock, ServerGuard};
use serde_json::json;

use authgate_lib::auth::RecordingNavigator;
use authgate_lib::{AuthClient, ClientConfig};

/// Path prefix every backend route lives under
pub const API_PREFIX: &str = "/api";

/// Unsigned token expiring `secs_from_now` seconds from now
pub fn jwt(tag: &str, secs_from_now: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = chrono::Utc::now().timestamp() + secs_from_now;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "jti": tag }).to_string());
    format!("{}.{}.sig", header, payload)
}

pub fn user_json() -> serde_json::Value {
    json!({ "id": "1", "name": "A", "email": "a@b.com" })
}

/// A mock backend plus a client pointed at it
pub struct TestEnvironment {
    pub server: ServerGuard,
    pub client: AuthClient,
    pub navigator: Arc<RecordingNavigator>,
}

impl TestEnvironment {
    pub async fn new() -> Self {
        let server = mockito::Server::new_async().await;
        let config = ClientConfig {
            api_base_url: format!("{}{}", server.url(), API_PREFIX),
            request_timeout_secs: 5,
            login_path: "/login".to_string(),
            landing_path: "/dashboard".to_string(),
            ..ClientConfig::default()
        };
        let navigator = Arc::new(RecordingNavigator::new());
        let client = AuthClient::new(config, navigator.clone()).expect("client should build");

        Self {
            server,
            client,
            navigator,
        }
    }

    /// Refresh endpoint that refuses, as for a visitor without a session
    pub async fn mock_refresh_refused(&mut self) -> Mock {
        self.server
            .mock("POST", "/api/auth/refresh")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"No session"}"#)
            .create_async()
            .await
    }

    /// Login endpoint that issues `token` and sets the session cookie
    pub async fn mock_login(&mut self, token: &str) -> Mock {
        self.server
            .mock("POST", "/api/auth/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("set-cookie", "refresh_token=r1; Path=/; HttpOnly")
            .with_body(json!({ "user": user_json(), "accessToken": token }).to_string())
            .create_async()
            .await
    }
}
