//! Read-only inspection of application token claims.
//!
//! The signature is not verified. This is for showing an operator who the
//! token was issued to and how long it has left, nothing more.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error decoding a token's payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token is not a JWT (expected 3 segments, found {segments})")]
    NotJwt { segments: usize },

    #[error("token payload is not valid base64url: {message}")]
    Encoding { message: String },

    #[error("token payload is not valid JSON: {message}")]
    Payload { message: String },
}

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Audience::One(aud) => write!(f, "{}", aud),
            Audience::Many(auds) => write!(f, "{}", auds.join(", ")),
        }
    }
}

/// The registered and provider-specific claims worth displaying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl TokenClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        if segments.len() != 3 {
            return Err(ClaimsError::NotJwt {
                segments: segments.len(),
            });
        }

        let payload = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| ClaimsError::Encoding {
                message: e.to_string(),
            })?;

        serde_json::from_slice(&payload).map_err(|e| ClaimsError::Payload {
            message: e.to_string(),
        })
    }

    /// `user_id` if present, otherwise `sub`.
    pub fn subject(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.sub.as_deref())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| DateTime::from_timestamp(iat, 0))
    }

    /// Time left before expiry, negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at().map(|exp| exp - now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_some_and(|left| left <= Duration::zero())
    }
}
