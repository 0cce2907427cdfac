mod guard;
mod navigation;
mod session;
pub(crate) mod store;
pub(crate) mod token;
mod types;

pub use guard::{GuardDecision, RouteAccess, RouteGuard, RouteTable};
pub use navigation::{Navigator, RecordingNavigator, TracingNavigator};
pub use session::{AuthSessionManager, SessionState};
pub use store::TokenStore;
pub use token::{is_expired, mask_token, Token};
pub use types::{AuthResponse, LoginCredentials, RefreshResponse, RegisterData, User};
