//! Single choke point for backend calls.
//!
//! Attaches the current bearer token to protected requests and heals one
//! failure class: a 401 on a protected request triggers one refresh and one
//! retry. Concurrent refreshes are coalesced into a single shared future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::adapters::http_client::{HttpClient, HttpMethod, SimpleHttpResponse};
use crate::auth::store::TokenStore;
use crate::auth::token::mask_token;
use crate::auth::RefreshResponse;
use crate::config::{ClientConfig, REFRESH_ENDPOINT};
use crate::core::{AuthSignal, EventBus, SignalEvent};
use crate::error::{
    invalid_response, session_expired, transport_failed, AuthError, AuthResult,
};

const UNAUTHORIZED: u16 = 401;

type RefreshFuture = Shared<BoxFuture<'static, AuthResult<String>>>;

/// The refresh currently being awaited, if any
struct InFlightRefresh {
    id: u64,
    epoch: u64,
    future: RefreshFuture,
}

/// Outgoing request description
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: HttpMethod,
    path: String,
    body: Option<String>,
    bearer: Option<String>,
    refresh_on_unauthorized: bool,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::GET, path.into())
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::POST, path.into())
    }

    fn new(method: HttpMethod, path: String) -> Self {
        Self {
            method,
            path,
            body: None,
            bearer: None,
            refresh_on_unauthorized: true,
        }
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> AuthResult<Self> {
        let body = serde_json::to_string(body)
            .map_err(|e| invalid_response(format!("failed to encode request: {}", e)))?;
        self.body = Some(body);
        Ok(self)
    }

    /// Use this token instead of the one in the store
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// Let a 401 propagate without attempting a refresh
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }
}

/// Where a request is in its response-phase lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    Retried,
}

/// Transport-layer gateway. Knows nothing about application session state;
/// it talks to the rest of the system only through the token store and
/// the event bus.
pub struct HttpGateway {
    client: Arc<dyn HttpClient>,
    config: Arc<ClientConfig>,
    tokens: Arc<TokenStore>,
    events: Arc<EventBus>,
    in_flight: Arc<Mutex<Option<InFlightRefresh>>>,
    refresh_ids: AtomicU64,
}

impl HttpGateway {
    pub fn new(
        client: Arc<dyn HttpClient>,
        config: Arc<ClientConfig>,
        tokens: Arc<TokenStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            client,
            config,
            tokens,
            events,
            in_flight: Arc::new(Mutex::new(None)),
            refresh_ids: AtomicU64::new(0),
        }
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

    /// Whether a refresh call is currently pending
    pub fn in_flight_refresh(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Send a request through the interception pipeline.
    ///
    /// Non-2xx responses become `AuthError::Http`. A 401 on a protected
    /// request is retried once after a refresh; if the refresh fails the
    /// refresh error is returned instead of the original 401. A 401 that
    /// arrives after the identity changed is never refreshed.
    #[instrument(skip(self, request), fields(path = %request.path), level = "debug")]
    pub async fn send(&self, request: ApiRequest) -> AuthResult<SimpleHttpResponse> {
        let protected = !self.config.is_public_endpoint(&request.path);
        let epoch = self.tokens.epoch();
        let sent_token = match &request.bearer {
            Some(token) => Some(token.clone()),
            None if protected => self.tokens.get(),
            None => None,
        };

        let response = self
            .dispatch(&request, sent_token.as_deref(), Attempt::Initial)
            .await?;

        if response.status() != UNAUTHORIZED || !protected || !request.refresh_on_unauthorized {
            return Self::finish(response);
        }

        if self.tokens.epoch() != epoch {
            debug!(epoch, "Session changed while request was in flight, not refreshing");
            return Err(session_expired(
                UNAUTHORIZED,
                Some("Session changed during request".to_string()),
            ));
        }

        debug!("Received 401 on protected request, refreshing session");
        let token = match self.tokens.get() {
            // another request already rotated the token since this one was sent
            Some(current) if sent_token.as_deref() != Some(current.as_str()) => {
                debug!("Token rotated since dispatch, retrying without refresh");
                current
            }
            _ => self.refresh_in_epoch(epoch).await?,
        };

        let retried = self
            .dispatch(&request, Some(token.as_str()), Attempt::Retried)
            .await?;
        if retried.status() == UNAUTHORIZED {
            warn!("Retried request was still unauthorized");
        }
        Self::finish(retried)
    }

    /// Obtain a fresh access token, joining any refresh already in flight.
    ///
    /// Exactly one call reaches the refresh endpoint per in-flight window;
    /// every caller observes the same outcome.
    pub async fn refresh_session(&self) -> AuthResult<String> {
        self.refresh_in_epoch(self.tokens.epoch()).await
    }

    /// Start or join a refresh on behalf of a caller bound to `epoch`.
    ///
    /// A refresh in flight for another epoch is never joined, and no refresh
    /// is started once the store has moved past `epoch`.
    async fn refresh_in_epoch(&self, epoch: u64) -> AuthResult<String> {
        let future = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if self.tokens.epoch() != epoch {
                debug!(epoch, "Session changed before refresh, not starting one");
                return Err(session_expired(
                    UNAUTHORIZED,
                    Some("Session changed during refresh".to_string()),
                ));
            }
            match slot.as_ref() {
                Some(in_flight) if in_flight.epoch == epoch => {
                    debug!(refresh_id = in_flight.id, "Joining in-flight refresh");
                    in_flight.future.clone()
                }
                _ => {
                    let id = self.refresh_ids.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(refresh_id = id, epoch, "Starting refresh");
                    let future = self.refresh_future(id, epoch).shared();
                    *slot = Some(InFlightRefresh {
                        id,
                        epoch,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    fn refresh_future(&self, id: u64, epoch: u64) -> BoxFuture<'static, AuthResult<String>> {
        let client = Arc::clone(&self.client);
        let url = self.config.endpoint_url(REFRESH_ENDPOINT);
        let tokens = Arc::clone(&self.tokens);
        let events = Arc::clone(&self.events);
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let outcome = request_new_token(client.as_ref(), &url).await;
            let result = settle_refresh(outcome, epoch, &tokens, &events).await;

            {
                let mut slot = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().map(|in_flight| in_flight.id) == Some(id) {
                    *slot = None;
                }
            }
            result
        }
        .boxed()
    }

    /// GET a protected resource and decode its JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AuthResult<T> {
        let response = self.send(ApiRequest::get(path)).await?;
        response.json().map_err(invalid_response)
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> AuthResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        response.json().map_err(invalid_response)
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
        attempt: Attempt,
    ) -> AuthResult<SimpleHttpResponse> {
        let url = self.config.endpoint_url(&request.path);
        let mut headers = HashMap::new();
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        if request.body.is_some() {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }

        let bearer = token.map(mask_token).unwrap_or_else(|| "none".to_string());
        trace!(url = %url, ?attempt, bearer = %bearer, "Dispatching request");

        let response = match request.method {
            HttpMethod::GET => self.client.get(&url, headers).await,
            HttpMethod::POST => {
                self.client
                    .post(&url, headers, request.body.clone().unwrap_or_default())
                    .await
            }
        }
        .map_err(|e| {
            debug!(url = %url, error = %e, "Transport failure");
            transport_failed(e)
        })?;

        trace!(status = response.status(), ?attempt, "Response received");
        Ok(response)
    }

    fn finish(response: SimpleHttpResponse) -> AuthResult<SimpleHttpResponse> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(AuthError::Http {
                status: response.status(),
                message: response.message(),
            })
        }
    }
}

/// One call to the refresh endpoint. The session cookie rides along in the
/// transport's cookie store; no bearer is sent.
async fn request_new_token(client: &dyn HttpClient, url: &str) -> AuthResult<String> {
    let response = client
        .post(url, HashMap::new(), String::new())
        .await
        .map_err(transport_failed)?;

    if !response.is_success() {
        return Err(session_expired(response.status(), response.message()));
    }

    let body: RefreshResponse = response.json().map_err(invalid_response)?;
    Ok(body.access_token)
}

/// Apply a refresh outcome to the store and raise the matching signal,
/// unless the identity epoch moved while the refresh was in flight.
async fn settle_refresh(
    outcome: AuthResult<String>,
    epoch: u64,
    tokens: &TokenStore,
    events: &EventBus,
) -> AuthResult<String> {
    match outcome {
        Ok(token) => {
            if !tokens.set_if_epoch(epoch, Some(token.clone())) {
                warn!(epoch, "Session changed during refresh, discarding new token");
                return Err(session_expired(
                    UNAUTHORIZED,
                    Some("Session changed during refresh".to_string()),
                ));
            }

            info!(epoch, token = %mask_token(&token), "Access token refreshed");
            publish(
                events,
                SignalEvent::new(
                    AuthSignal::TokenRefreshed {
                        access_token: token.clone(),
                    },
                    epoch,
                ),
            )
            .await;
            Ok(token)
        }
        Err(err) => {
            warn!(epoch, error = %err, "Token refresh failed");
            if tokens.set_if_epoch(epoch, None) {
                publish(events, SignalEvent::new(AuthSignal::Logout, epoch)).await;
            } else {
                debug!(epoch, "Session changed during failed refresh, no logout signal");
            }
            Err(err)
        }
    }
}

async fn publish(events: &EventBus, event: SignalEvent) {
    if let Err(e) = events.publish(event).await {
        error!(error = %e, "Failed to publish auth signal");
    }
}
