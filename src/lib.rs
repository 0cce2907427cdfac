pub mod adapters;
pub mod auth;
pub mod config;
pub mod core;
pub mod error;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::error::transport_failed;

// Re-export core components
pub use crate::adapters::{ApiRequest, HttpClient, HttpGateway, ReqwestHttpClient};
pub use crate::auth::{
    AuthSessionManager, GuardDecision, LoginCredentials, Navigator, RegisterData, RouteGuard,
    RouteTable, SessionState, TokenStore, TracingNavigator, User,
};
pub use crate::config::{load_config, ClientConfig};
pub use crate::core::{AuthSignal, EventBus, SignalEvent};
pub use crate::error::{AuthError, AuthResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fully wired auth client: transport, token store, signal bus, session
/// manager and route table sharing one configuration.
pub struct AuthClient {
    config: Arc<ClientConfig>,
    tokens: Arc<TokenStore>,
    events: Arc<EventBus>,
    gateway: Arc<HttpGateway>,
    session: Arc<AuthSessionManager>,
    routes: RouteTable,
    listener: Option<JoinHandle<()>>,
}

impl AuthClient {
    /// Build a client backed by a cookie-aware reqwest transport
    pub fn new(config: ClientConfig, navigator: Arc<dyn Navigator>) -> AuthResult<Self> {
        config.validate()?;
        let client = ReqwestHttpClient::new(config.request_timeout())
            .map_err(transport_failed)?;
        Ok(Self::with_http_client(config, Arc::new(client), navigator))
    }

    /// Build a client on top of any transport
    pub fn with_http_client(
        config: ClientConfig,
        client: Arc<dyn HttpClient>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let config = Arc::new(config);
        let tokens = Arc::new(TokenStore::new());
        let events = Arc::new(EventBus::new(config.event_bus_capacity));
        let gateway = Arc::new(HttpGateway::new(
            client,
            Arc::clone(&config),
            Arc::clone(&tokens),
            Arc::clone(&events),
        ));
        let session = Arc::new(AuthSessionManager::new(Arc::clone(&gateway), navigator));
        let routes = RouteTable::standard(&config);

        Self {
            config,
            tokens,
            events,
            gateway,
            session,
            routes,
            listener: None,
        }
    }

    /// Start listening for auth signals and restore any existing session.
    ///
    /// Safe to call again; the listener is spawned once and bootstrap runs once.
    pub async fn start(&mut self) {
        if self.listener.is_none() {
            self.listener = Some(self.session.spawn_signal_listener());
        }
        self.session.bootstrap().await;
        info!(
            authenticated = self.session.is_authenticated(),
            "Auth client started"
        );
    }

    /// Decide a navigation to `path` against the current session
    pub fn check_route(&self, path: &str) -> GuardDecision {
        self.routes.resolve(path, &self.session.snapshot())
    }

    pub fn session(&self) -> &Arc<AuthSessionManager> {
        &self.session
    }

    pub fn gateway(&self) -> &Arc<HttpGateway> {
        &self.gateway
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Replace the route table built from the configuration
    pub fn set_routes(&mut self, routes: RouteTable) {
        self.routes = routes;
    }
}

impl Drop for AuthClient {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
