//! Shared fixtures: token builders and a scripted backend that behaves like
//! the real auth API closely enough to drive the gateway and session manager.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::json;

use crate::adapters::{HttpClient, HttpGateway, HttpMethod, SimpleHttpResponse};
use crate::auth::{AuthSessionManager, RecordingNavigator, TokenStore, User};
use crate::config::{ClientConfig, PROFILE_ENDPOINT, REFRESH_ENDPOINT};
use crate::core::EventBus;

pub const BASE_URL: &str = "http://backend.test/api";

/// Unsigned JWT-shaped token carrying only an `exp` claim
pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp }).to_string());
    format!("{}.{}.sig", header, payload)
}

/// Token valid for an hour; `tag` keeps tokens minted in the same second distinct
pub fn fresh_jwt(tag: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD
        .encode(json!({ "exp": Utc::now().timestamp() + 3600, "jti": tag }).to_string());
    format!("{}.{}.sig", header, payload)
}

pub fn sample_user() -> User {
    User {
        id: "1".to_string(),
        name: "A".to_string(),
        email: "a@b.com".to_string(),
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        api_base_url: BASE_URL.to_string(),
        login_path: "/login".to_string(),
        landing_path: "/dashboard".to_string(),
        ..ClientConfig::default()
    }
}

pub fn url(path: &str) -> String {
    format!("{}{}", BASE_URL, path)
}

/// A request observed by the scripted backend
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn authorization(&self) -> Option<&str> {
        self.headers.get("Authorization").map(String::as_str)
    }
}

/// What the refresh endpoint does next
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Issue this token and accept it on protected routes
    Issue(String),
    /// Issue this token but keep rejecting it on protected routes
    IssueRejected(String),
    /// Refuse with a status and message
    Refuse(u16, &'static str),
    TransportError,
}

/// In-memory backend.
///
/// Protected paths answer 200 only for bearers in the accepted set and 401
/// otherwise. Paths given a fixed response always answer with it.
pub struct ScriptedBackend {
    accepted: Mutex<HashSet<String>>,
    refresh: Mutex<RefreshOutcome>,
    refresh_delay: Mutex<Duration>,
    refresh_calls: AtomicUsize,
    delays: Mutex<HashMap<String, Duration>>,
    fixed: Mutex<HashMap<String, std::result::Result<SimpleHttpResponse, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(HashSet::new()),
            refresh: Mutex::new(RefreshOutcome::Refuse(401, "No session")),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_calls: AtomicUsize::new(0),
            delays: Mutex::new(HashMap::new()),
            fixed: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn accept(&self, token: &str) {
        self.accepted.lock().unwrap().insert(token.to_string());
    }

    /// Invalidate every access token issued so far
    pub fn revoke_all(&self) {
        self.accepted.lock().unwrap().clear();
    }

    pub fn set_refresh(&self, outcome: RefreshOutcome) {
        *self.refresh.lock().unwrap() = outcome;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Hold every answer on `path` for `delay`
    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    /// Always answer `path` with `status` and a JSON `body`
    pub fn respond(&self, path: &str, status: u16, body: serde_json::Value) {
        let response = SimpleHttpResponse::new(status, body.to_string())
            .with_header("content-type", "application/json");
        self.fixed
            .lock()
            .unwrap()
            .insert(path.to_string(), Ok(response));
    }

    pub fn fail_transport(&self, path: &str) {
        self.fixed
            .lock()
            .unwrap()
            .insert(path.to_string(), Err("connection reset by peer".to_string()));
    }

    /// Successful login or registration returning `user` and `token`
    pub fn sign_in_with(&self, path: &str, user: &User, token: &str) {
        self.accept(token);
        self.respond(path, 200, json!({ "user": user, "accessToken": token }));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        let target = url(path);
        self.requests()
            .into_iter()
            .filter(|request| request.url == target)
            .collect()
    }

    async fn handle(&self, request: RecordedRequest) -> Result<SimpleHttpResponse> {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        let bearer = request
            .authorization()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        self.requests.lock().unwrap().push(request);

        if path == REFRESH_ENDPOINT {
            return self.handle_refresh().await;
        }

        let delay = self.delays.lock().unwrap().get(&path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fixed = self.fixed.lock().unwrap().get(&path).cloned();
        if let Some(fixed) = fixed {
            return fixed.map_err(|reason| anyhow::anyhow!(reason));
        }

        let authorized = bearer.map_or(false, |token| self.accepted.lock().unwrap().contains(&token));
        if !authorized {
            return Ok(SimpleHttpResponse::new(401, r#"{"message":"Token expired"}"#));
        }
        let body = if path == PROFILE_ENDPOINT {
            serde_json::to_string(&sample_user())?
        } else {
            json!({ "path": path }).to_string()
        };
        Ok(SimpleHttpResponse::new(200, body))
    }

    async fn handle_refresh(&self) -> Result<SimpleHttpResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.refresh.lock().unwrap().clone();
        match outcome {
            RefreshOutcome::Issue(token) => {
                self.accept(&token);
                Ok(SimpleHttpResponse::new(200, json!({ "accessToken": token }).to_string()))
            }
            RefreshOutcome::IssueRejected(token) => {
                Ok(SimpleHttpResponse::new(200, json!({ "accessToken": token }).to_string()))
            }
            RefreshOutcome::Refuse(status, message) => Ok(SimpleHttpResponse::new(
                status,
                json!({ "message": message }).to_string(),
            )),
            RefreshOutcome::TransportError => Err(anyhow::anyhow!("connection refused")),
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedBackend {
    async fn get(&self, url: &str, headers: HashMap<String, String>) -> Result<SimpleHttpResponse> {
        self.handle(RecordedRequest {
            url: url.to_string(),
            method: HttpMethod::GET,
            headers,
            body: String::new(),
        })
        .await
    }

    async fn post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: String,
    ) -> Result<SimpleHttpResponse> {
        self.handle(RecordedRequest {
            url: url.to_string(),
            method: HttpMethod::POST,
            headers,
            body,
        })
        .await
    }
}

/// Gateway and session manager wired to a scripted backend
pub struct Harness {
    pub backend: Arc<ScriptedBackend>,
    pub tokens: Arc<TokenStore>,
    pub events: Arc<EventBus>,
    pub gateway: Arc<HttpGateway>,
    pub session: Arc<AuthSessionManager>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(ScriptedBackend::new())
    }

    pub fn with_backend(backend: Arc<ScriptedBackend>) -> Self {
        let config = Arc::new(test_config());
        let tokens = Arc::new(TokenStore::new());
        let events = Arc::new(EventBus::new(config.event_bus_capacity));
        let gateway = Arc::new(HttpGateway::new(
            backend.clone(),
            config,
            Arc::clone(&tokens),
            Arc::clone(&events),
        ));
        let navigator = Arc::new(RecordingNavigator::new());
        let session = Arc::new(AuthSessionManager::new(
            Arc::clone(&gateway),
            navigator.clone(),
        ));

        Self {
            backend,
            tokens,
            events,
            gateway,
            session,
            navigator,
        }
    }
}
