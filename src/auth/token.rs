use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

use crate::error::{token_decode_failed, AuthResult};

/// Access token with its expiry decoded from the embedded claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The opaque bearer string
    pub value: String,
    /// Expiration in milliseconds since the UNIX epoch
    pub expires_at_epoch_ms: i64,
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: Option<f64>,
}

impl Token {
    /// Decode the token's payload segment and read its `exp` claim.
    ///
    /// The signature is not checked; the backend remains the authority.
    pub fn decode(value: &str) -> AuthResult<Self> {
        let mut segments = value.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(token_decode_failed("expected three dot-separated segments")),
        };

        // some issuers keep the base64 padding
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(token_decode_failed)?;
        let claims: ExpiryClaims = serde_json::from_slice(&bytes).map_err(token_decode_failed)?;
        let exp = claims
            .exp
            .filter(|exp| exp.is_finite())
            .ok_or_else(|| token_decode_failed("missing exp claim"))?;

        Ok(Self {
            value: value.to_string(),
            expires_at_epoch_ms: (exp * 1000.0) as i64,
        })
    }

    /// Expired when the expiry is at or before `now_ms`
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_epoch_ms <= now_ms
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_epoch_ms())
    }
}

pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Whether `token` is expired at `now_ms`. Undecodable tokens count as expired.
pub fn is_expired_at(token: &str, now_ms: i64) -> bool {
    Token::decode(token).map_or(true, |token| token.is_expired_at(now_ms))
}

/// Whether `token` is expired now. Undecodable tokens count as expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, now_epoch_ms())
}

/// Short form of a token for log lines
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(6);
    format!("***{}", chars[start..].iter().collect::<String>())
}
