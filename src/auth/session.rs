//! Authenticated-user state machine.
//!
//! Owns `SessionState`, mediates every identity-changing operation and is the
//! canonical subscriber of the gateway's auth signals. State lives behind a
//! sync mutex that is never held across an await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ApiRequest, HttpGateway};
use crate::auth::navigation::Navigator;
use crate::auth::token::{self, now_epoch_ms};
use crate::auth::types::{AuthResponse, LoginCredentials, RegisterData, User};
use crate::config::{ClientConfig, LOGIN_ENDPOINT, LOGOUT_ENDPOINT, PROFILE_ENDPOINT, REGISTER_ENDPOINT};
use crate::core::{AuthSignal, SignalEvent};
use crate::error::{validation_failed, AuthError, AuthResult};

const LOGIN_FALLBACK_MESSAGE: &str = "An error occurred during login";
const REGISTER_FALLBACK_MESSAGE: &str = "An error occurred during registration";

/// Snapshot of the session.
///
/// `is_authenticated` is deliberately not a field: it is recomputed from
/// user, token and the token's expiry on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub user: Option<User>,
    pub token: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    fn loading() -> Self {
        Self {
            user: None,
            token: None,
            is_loading: true,
            error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(now_epoch_ms())
    }

    /// user present, token present, and token not expired at `now_ms`
    pub fn is_authenticated_at(&self, now_ms: i64) -> bool {
        self.user.is_some()
            && self
                .token
                .as_deref()
                .map_or(false, |token| !token::is_expired_at(token, now_ms))
    }
}

/// Session manager shared by forms, guards and the signal listener
pub struct AuthSessionManager {
    gateway: Arc<HttpGateway>,
    config: Arc<ClientConfig>,
    navigator: Arc<dyn Navigator>,
    state: Mutex<SessionState>,
    signals: Mutex<broadcast::Receiver<SignalEvent>>,
    bootstrapped: AtomicBool,
    ready: watch::Sender<bool>,
}

impl AuthSessionManager {
    /// Create a manager in the loading state and subscribe it to auth signals
    pub fn new(gateway: Arc<HttpGateway>, navigator: Arc<dyn Navigator>) -> Self {
        let config = Arc::clone(gateway.config());
        let signals = gateway.events().subscribe();
        let (ready, _) = watch::channel(false);

        Self {
            gateway,
            config,
            navigator,
            state: Mutex::new(SessionState::loading()),
            signals: Mutex::new(signals),
            bootstrapped: AtomicBool::new(false),
            ready,
        }
    }

    /// Current state, after applying every signal raised so far
    pub fn snapshot(&self) -> SessionState {
        self.process_pending_signals();
        self.lock_state().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    /// Fail-closed expiry check; malformed tokens count as expired
    pub fn is_expired(&self, token: &str) -> bool {
        token::is_expired(token)
    }

    /// Resolves once bootstrap has finished, successfully or not
    pub async fn wait_until_ready(&self) {
        let mut ready = self.ready.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Re-establish a session from the backend's session cookie.
    ///
    /// Runs once; later calls are ignored. Absence of a prior session is not
    /// an error and leaves the state cleared with no message.
    #[instrument(skip(self), level = "debug")]
    pub async fn bootstrap(&self) {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            warn!("Session bootstrap already ran, ignoring");
            return;
        }

        info!("Bootstrapping session");
        let tokens = self.gateway.tokens();
        let epoch = tokens.epoch();
        let restored = self.restore_session().await;

        self.process_pending_signals();
        if tokens.epoch() != epoch {
            debug!("Identity changed during bootstrap, keeping newer state");
        } else {
            match restored {
                Ok((user, token)) => {
                    info!(user_id = %user.id, "Restored existing session");
                    self.with_state(|state| {
                        state.user = Some(user);
                        state.token = Some(token);
                    });
                }
                Err(err) => {
                    info!(reason = %err, "Not authenticated or session expired");
                    tokens.set_if_epoch(epoch, None);
                    self.with_state(|state| {
                        state.user = None;
                        state.token = None;
                    });
                }
            }
        }

        // ready flips under the state lock, together with the loading flag
        self.with_state(|state| {
            state.is_loading = false;
            self.ready.send_replace(true);
        });
    }

    // refresh strictly before the profile fetch
    async fn restore_session(&self) -> AuthResult<(User, String)> {
        let token = self.gateway.refresh_session().await?;
        let user: User = self.gateway.get_json(PROFILE_ENDPOINT).await?;
        Ok((user, token))
    }

    /// Sign in and navigate to the landing path
    #[instrument(skip(self, credentials), fields(email = %credentials.email), level = "debug")]
    pub async fn login(&self, credentials: LoginCredentials) -> AuthResult<User> {
        require("email", &credentials.email)?;
        require("password", &credentials.password)?;

        self.begin_operation();
        let result = self
            .gateway
            .post_json::<_, AuthResponse>(LOGIN_ENDPOINT, &credentials)
            .await
            .map_err(rejected_on_unauthorized);
        self.complete_sign_in(result, LOGIN_FALLBACK_MESSAGE)
    }

    /// Create an account and navigate to the landing path
    #[instrument(skip(self, data), fields(email = %data.email), level = "debug")]
    pub async fn register(&self, data: RegisterData) -> AuthResult<User> {
        require("name", &data.name)?;
        require("email", &data.email)?;
        require("password", &data.password)?;

        self.begin_operation();
        let result = self
            .gateway
            .post_json::<_, AuthResponse>(REGISTER_ENDPOINT, &data)
            .await
            .map_err(rejected_on_unauthorized);
        self.complete_sign_in(result, REGISTER_FALLBACK_MESSAGE)
    }

    /// End the session. Local state is always cleared; the backend call is
    /// best effort.
    #[instrument(skip(self), level = "debug")]
    pub async fn logout(&self) {
        self.process_pending_signals();

        let tokens = self.gateway.tokens();
        let previous = tokens.get();
        // a new epoch first, so any refresh still in flight is discarded
        let epoch = tokens.advance_epoch();
        tokens.set_if_epoch(epoch, None);
        self.with_state(|state| {
            state.user = None;
            state.token = None;
            state.error = None;
            state.is_loading = true;
        });

        let mut request = ApiRequest::post(LOGOUT_ENDPOINT).without_refresh();
        if let Some(token) = previous {
            request = request.bearer(token);
        }
        if let Err(err) = self.gateway.send(request).await {
            warn!(error = %err, "Backend logout failed, clearing local session anyway");
        }

        self.process_pending_signals();
        self.with_state(|state| {
            if tokens.epoch() == epoch {
                state.user = None;
                state.token = None;
            }
            self.settle_loading(state);
        });
        info!("Signed out");
        self.navigator.navigate(&self.config.login_path);
    }

    pub fn clear_error(&self) {
        self.with_state(|state| state.error = None);
    }

    /// Refresh the access token on demand, sharing any refresh in flight
    pub async fn refresh(&self) -> AuthResult<String> {
        let result = self.gateway.refresh_session().await;
        self.process_pending_signals();
        result
    }

    /// Fetch the profile of the signed-in user and update the session
    pub async fn fetch_current_user(&self) -> AuthResult<User> {
        let epoch = self.gateway.tokens().epoch();
        let user: User = self.gateway.get_json(PROFILE_ENDPOINT).await?;

        self.process_pending_signals();
        if self.gateway.tokens().epoch() == epoch {
            self.with_state(|state| state.user = Some(user.clone()));
        }
        Ok(user)
    }

    /// Spawn a task that applies signals as soon as they are published.
    ///
    /// The task only uses its own receiver as a wake-up; signals are applied
    /// from the manager's receiver, so each is handled exactly once.
    pub fn spawn_signal_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let mut wake = self.gateway.events().subscribe();

        tokio::spawn(async move {
            loop {
                match wake.recv().await {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.process_pending_signals();
            }
            debug!("Auth signal listener stopped");
        })
    }

    /// Apply every queued signal. Returns how many were applied.
    pub fn process_pending_signals(&self) -> usize {
        let mut applied = 0;
        let mut destinations = Vec::new();
        {
            let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                match signals.try_recv() {
                    Ok(event) => {
                        applied += 1;
                        if let Some(path) = self.apply_signal(event) {
                            destinations.push(path);
                        }
                    }
                    Err(TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth signal receiver lagged, signals were lost");
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }

        // navigate outside every lock; navigators may read the session back
        for path in destinations {
            self.navigator.navigate(&path);
        }
        applied
    }

    fn apply_signal(&self, event: SignalEvent) -> Option<String> {
        let current = self.gateway.tokens().epoch();
        if event.epoch != current {
            debug!(
                signal = event.name(),
                signal_epoch = event.epoch,
                current_epoch = current,
                "Ignoring auth signal from a previous session"
            );
            return None;
        }

        match event.signal {
            AuthSignal::TokenRefreshed { access_token } => {
                debug!("Applying refreshed access token");
                self.with_state(|state| state.token = Some(access_token));
                None
            }
            AuthSignal::Logout => {
                let had_session = self.with_state(|state| {
                    let had_session = state.user.is_some() || state.token.is_some();
                    state.user = None;
                    state.token = None;
                    had_session
                });
                if had_session {
                    info!("Session expired, redirecting to login");
                    Some(self.config.login_path.clone())
                } else {
                    None
                }
            }
        }
    }

    fn begin_operation(&self) {
        self.with_state(|state| {
            state.is_loading = true;
            state.error = None;
        });
    }

    fn complete_sign_in(&self, result: AuthResult<AuthResponse>, fallback: &str) -> AuthResult<User> {
        self.process_pending_signals();

        match result {
            Ok(AuthResponse { user, access_token }) => {
                let tokens = self.gateway.tokens();
                let epoch = tokens.advance_epoch();
                tokens.set_if_epoch(epoch, Some(access_token.clone()));

                self.with_state(|state| {
                    state.user = Some(user.clone());
                    state.token = Some(access_token);
                    state.error = None;
                    self.settle_loading(state);
                });
                info!(user_id = %user.id, "Signed in");
                self.navigator.navigate(&self.config.landing_path);
                Ok(user)
            }
            Err(err) => {
                warn!(error = %err, "Sign-in failed");
                let message = err.user_message(fallback);
                self.with_state(|state| {
                    state.error = Some(message);
                    self.settle_loading(state);
                });
                Err(err)
            }
        }
    }

    /// End an operation's loading phase. While bootstrap is still running the
    /// flag stays raised; bootstrap clears it when it finishes.
    fn settle_loading(&self, state: &mut SessionState) {
        let bootstrapping = self.bootstrapped.load(Ordering::SeqCst) && !*self.ready.borrow();
        if bootstrapping {
            debug!("Bootstrap still running, leaving session in loading state");
        } else {
            state.is_loading = false;
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        f(&mut self.lock_state())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn require(field: &str, value: &str) -> AuthResult<()> {
    if value.trim().is_empty() {
        Err(validation_failed(field))
    } else {
        Ok(())
    }
}

/// A 401 from login/register means the credentials were refused
fn rejected_on_unauthorized(err: AuthError) -> AuthError {
    match err {
        AuthError::Http {
            status: 401,
            message,
        } => AuthError::Rejected { message },
        other => other,
    }
}
