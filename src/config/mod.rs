use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{config_invalid, AuthResult};

// Default configuration values
const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_LANDING_PATH: &str = "/dashboard";
const DEFAULT_EVENT_BUS_CAPACITY: usize = 64;

/// Backend endpoints consumed by the gateway and session manager
pub const LOGIN_ENDPOINT: &str = "/auth/login";
pub const REGISTER_ENDPOINT: &str = "/auth/register";
pub const REFRESH_ENDPOINT: &str = "/auth/refresh";
pub const LOGOUT_ENDPOINT: &str = "/auth/logout";
pub const PROFILE_ENDPOINT: &str = "/auth/me";

/// Client configuration for the auth session layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every backend path is resolved against
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Where unauthenticated users and forced logouts are sent
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Where a successful login or registration lands
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Capacity of the auth signal channel
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
    /// Endpoints that never carry a bearer token and never trigger a refresh
    #[serde(default = "default_public_endpoints")]
    pub public_endpoints: Vec<String>,
}

// Default functions
fn default_api_base_url() -> String {
    std::env::var("AUTHGATE_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
}

fn default_request_timeout() -> u64 {
    std::env::var("AUTHGATE_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_login_path() -> String {
    std::env::var("AUTHGATE_LOGIN_PATH").unwrap_or_else(|_| DEFAULT_LOGIN_PATH.to_string())
}

fn default_landing_path() -> String {
    std::env::var("AUTHGATE_LANDING_PATH").unwrap_or_else(|_| DEFAULT_LANDING_PATH.to_string())
}

fn default_event_bus_capacity() -> usize {
    std::env::var("AUTHGATE_EVENT_BUS_CAPACITY")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_EVENT_BUS_CAPACITY)
}

fn default_public_endpoints() -> Vec<String> {
    vec![
        LOGIN_ENDPOINT.to_string(),
        REGISTER_ENDPOINT.to_string(),
        REFRESH_ENDPOINT.to_string(),
    ]
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
            login_path: default_login_path(),
            landing_path: default_landing_path(),
            event_bus_capacity: default_event_bus_capacity(),
            public_endpoints: default_public_endpoints(),
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at a specific backend, everything else default
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether `path` is exempt from bearer attachment and refresh handling
    pub fn is_public_endpoint(&self, path: &str) -> bool {
        let path = strip_query(path);
        self.public_endpoints.iter().any(|endpoint| endpoint == path)
    }

    /// Resolve a backend path against the configured base URL
    pub fn endpoint_url(&self, path: &str) -> String {
        let base = self.api_base_url.trim().trim_end_matches('/');
        let path = path.trim();

        if base.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        }
    }

    /// Reject configurations the client cannot work with
    pub fn validate(&self) -> AuthResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(config_invalid("api_base_url", "must not be empty"));
        }
        if !self.login_path.starts_with('/') {
            return Err(config_invalid("login_path", "must be an absolute path"));
        }
        if !self.landing_path.starts_with('/') {
            return Err(config_invalid("landing_path", "must be an absolute path"));
        }
        if self.event_bus_capacity == 0 {
            return Err(config_invalid("event_bus_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Load the client configuration.
///
/// Reads JSON from `path` (or `AUTHGATE_CONFIG_PATH`) when one is given,
/// otherwise falls back to environment-derived defaults.
pub async fn load_config(path: Option<&Path>) -> AuthResult<ClientConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("AUTHGATE_CONFIG_PATH").ok().map(PathBuf::from));

    let config = match path {
        Some(path) => load_config_file(&path).await?,
        None => {
            debug!("No configuration file given, using defaults");
            ClientConfig::default()
        }
    };

    config.validate()?;
    Ok(config)
}

async fn load_config_file(path: &Path) -> AuthResult<ClientConfig> {
    let config_str = fs::read_to_string(path)
        .await
        .map_err(|e| config_invalid("config_path", &format!("{}: {}", path.display(), e)))?;
    let config: ClientConfig = serde_json::from_str(&config_str)
        .map_err(|e| config_invalid("config_path", &format!("{}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());

    Ok(config)
}
