//! Navigation guards.
//!
//! A guard is a pure function of a `SessionState` snapshot. While the session
//! is still loading a guard answers `Pending` and nothing protected may be
//! shown.

use tracing::trace;

use crate::auth::session::SessionState;
use crate::auth::token::now_epoch_ms;
use crate::config::ClientConfig;

/// Verdict for a navigation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Verdict not known yet; render nothing route-specific
    Pending,
    Allow,
    Redirect { to: String },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Who may enter a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    /// Signed-in users only; everyone else goes to `fallback`
    Protected { fallback: String },
    /// Signed-out users only; signed-in users go to `landing`
    GuestOnly { landing: String },
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    access: RouteAccess,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::protected("/login")
    }
}

impl RouteGuard {
    pub fn protected(fallback: impl Into<String>) -> Self {
        Self {
            access: RouteAccess::Protected {
                fallback: fallback.into(),
            },
        }
    }

    pub fn guest_only(landing: impl Into<String>) -> Self {
        Self {
            access: RouteAccess::GuestOnly {
                landing: landing.into(),
            },
        }
    }

    pub fn public() -> Self {
        Self {
            access: RouteAccess::Public,
        }
    }

    pub fn access(&self) -> &RouteAccess {
        &self.access
    }

    pub fn evaluate(&self, state: &SessionState) -> GuardDecision {
        self.evaluate_at(state, now_epoch_ms())
    }

    /// Evaluate against a fixed clock
    pub fn evaluate_at(&self, state: &SessionState, now_ms: i64) -> GuardDecision {
        if let RouteAccess::Public = self.access {
            return GuardDecision::Allow;
        }
        if state.is_loading {
            return GuardDecision::Pending;
        }

        let authenticated = state.is_authenticated_at(now_ms);
        match &self.access {
            RouteAccess::Protected { fallback } if !authenticated => GuardDecision::Redirect {
                to: fallback.clone(),
            },
            RouteAccess::GuestOnly { landing } if authenticated => GuardDecision::Redirect {
                to: landing.clone(),
            },
            _ => GuardDecision::Allow,
        }
    }
}

/// Ordered list of route patterns and their guards.
///
/// A pattern is either an exact path or `prefix/*`, which matches the prefix
/// itself and everything below it. The first matching entry wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(String, RouteGuard)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: impl Into<String>, guard: RouteGuard) -> Self {
        self.routes.push((pattern.into(), guard));
        self
    }

    /// Login and registration for guests, a public root, and everything
    /// under the landing path for signed-in users
    pub fn standard(config: &ClientConfig) -> Self {
        let landing = config.landing_path.trim_end_matches('/');
        Self::new()
            .route(config.login_path.clone(), RouteGuard::guest_only(landing))
            .route("/register", RouteGuard::guest_only(landing))
            .route("/", RouteGuard::public())
            .route(
                format!("{}/*", landing),
                RouteGuard::protected(config.login_path.clone()),
            )
    }

    pub fn guard_for(&self, path: &str) -> Option<&RouteGuard> {
        let path = normalize(path);
        self.routes
            .iter()
            .find(|(pattern, _)| matches_pattern(pattern, path))
            .map(|(_, guard)| guard)
    }

    /// Decide a navigation to `path`. Paths with no route are public.
    pub fn resolve(&self, path: &str, state: &SessionState) -> GuardDecision {
        let decision = match self.guard_for(path) {
            Some(guard) => guard.evaluate(state),
            None => GuardDecision::Allow,
        };
        trace!(path = %path, ?decision, "Route resolved");
        decision
    }
}

fn normalize(path: &str) -> &str {
    let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

fn matches_pattern(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .map_or(false, |rest| rest.starts_with('/'))
        }
        None => normalize(pattern) == path,
    }
}
