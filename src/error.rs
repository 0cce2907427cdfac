use std::fmt;
use thiserror::Error;

/// Error type for every fallible operation in the auth client.
///
/// `Clone` is required: one refresh outcome is shared by every request
/// that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Required input was missing; never reaches the network layer
    #[error("Missing required field: {field}")]
    Validation { field: String },

    /// Credentials were refused by the backend (401 on login/register)
    #[error("Authentication rejected{}", fmt_message(.message))]
    Rejected { message: Option<String> },

    /// The refresh endpoint refused to issue a new token
    #[error("Session expired (refresh status {status}){}", fmt_message(.message))]
    SessionExpired { status: u16, message: Option<String> },

    /// Non-2xx response propagated verbatim
    #[error("Request failed with status {status}{}", fmt_message(.message))]
    Http { status: u16, message: Option<String> },

    /// Network level failure (connect, timeout, body read)
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// Malformed access token
    #[error("Failed to decode access token: {reason}")]
    Decode { reason: String },

    /// A 2xx response whose body did not match the expected shape
    #[error("Invalid response body: {reason}")]
    InvalidResponse { reason: String },

    #[error("Invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("Failed to publish auth signal: {reason}")]
    EventBusPublishFailed { reason: String },
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {}", message),
        None => String::new(),
    }
}

/// Type alias for auth results
pub type AuthResult<T> = Result<T, AuthError>;

/// Enumeration of error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Input errors
    ValidationFailed,

    // Authentication errors
    AuthRejected,
    AuthSessionExpired,
    AuthTokenInvalid,

    // API errors
    ApiRequestFailed,
    ApiResponseInvalid,

    // Network errors
    NetworkTransport,

    // General errors
    ConfigInvalid,
    EventBusPublishFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code_str = match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::AuthRejected => "AUTH_REJECTED",
            ErrorCode::AuthSessionExpired => "AUTH_SESSION_EXPIRED",
            ErrorCode::AuthTokenInvalid => "AUTH_TOKEN_INVALID",
            ErrorCode::ApiRequestFailed => "API_REQUEST_FAILED",
            ErrorCode::ApiResponseInvalid => "API_RESPONSE_INVALID",
            ErrorCode::NetworkTransport => "NETWORK_TRANSPORT",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::EventBusPublishFailed => "EVENT_BUS_PUBLISH_FAILED",
        };
        write!(f, "{}", code_str)
    }
}

/// Error category for filtering and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Handled at the form boundary
    Validation,
    /// Credential or session problems
    Authentication,
    /// Connection, timeout, DNS
    Network,
    /// Backend answered with an error
    Service,
    /// Configuration problems
    Configuration,
    /// Internal errors
    Internal,
}

impl AuthError {
    /// Programmatic code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Validation { .. } => ErrorCode::ValidationFailed,
            AuthError::Rejected { .. } => ErrorCode::AuthRejected,
            AuthError::SessionExpired { .. } => ErrorCode::AuthSessionExpired,
            AuthError::Decode { .. } => ErrorCode::AuthTokenInvalid,
            AuthError::Http { .. } => ErrorCode::ApiRequestFailed,
            AuthError::InvalidResponse { .. } => ErrorCode::ApiResponseInvalid,
            AuthError::Transport { .. } => ErrorCode::NetworkTransport,
            AuthError::Config { .. } => ErrorCode::ConfigInvalid,
            AuthError::EventBusPublishFailed { .. } => ErrorCode::EventBusPublishFailed,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AuthError::Validation { .. } => ErrorCategory::Validation,
            AuthError::Rejected { .. }
            | AuthError::SessionExpired { .. }
            | AuthError::Decode { .. } => ErrorCategory::Authentication,
            AuthError::Transport { .. } => ErrorCategory::Network,
            AuthError::Http { .. } | AuthError::InvalidResponse { .. } => ErrorCategory::Service,
            AuthError::Config { .. } => ErrorCategory::Configuration,
            AuthError::EventBusPublishFailed { .. } => ErrorCategory::Internal,
        }
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Rejected { .. } => Some(401),
            AuthError::SessionExpired { status, .. } | AuthError::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// True when the session can no longer be used and a re-login is needed.
    /// A malformed token is treated exactly like an expired one.
    pub fn is_session_expired(&self) -> bool {
        matches!(
            self,
            AuthError::SessionExpired { .. } | AuthError::Decode { .. }
        )
    }

    /// The single message shown to a user for this error.
    ///
    /// Backend-provided messages win; everything else collapses to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            AuthError::Rejected { message: Some(message) }
            | AuthError::Http { message: Some(message), .. } => message.clone(),
            AuthError::Validation { field } => format!("Please enter your {}", field),
            _ => fallback.to_string(),
        }
    }
}

// Helper functions to create standard errors

/// Create a validation error for a missing field
pub fn validation_failed(field: &str) -> AuthError {
    AuthError::Validation {
        field: field.to_string(),
    }
}

/// Create a transport error from any displayable cause
pub fn transport_failed(error: impl fmt::Display) -> AuthError {
    AuthError::Transport {
        reason: error.to_string(),
    }
}

/// Create a session expired error for a refused refresh
pub fn session_expired(status: u16, message: Option<String>) -> AuthError {
    AuthError::SessionExpired { status, message }
}

/// Create a decode error for a malformed token
pub fn token_decode_failed(reason: impl fmt::Display) -> AuthError {
    AuthError::Decode {
        reason: reason.to_string(),
    }
}

/// Create an invalid response error
pub fn invalid_response(error: impl fmt::Display) -> AuthError {
    AuthError::InvalidResponse {
        reason: error.to_string(),
    }
}

/// Create a configuration error
pub fn config_invalid(key: &str, reason: &str) -> AuthError {
    AuthError::Config {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// Create an event bus publish failed error
pub fn event_bus_publish_failed(error: impl fmt::Display) -> AuthError {
    AuthError::EventBusPublishFailed {
        reason: error.to_string(),
    }
}
