//! The credential record a pipeline run builds up.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for token values that prevents accidental logging
//! - [`CredentialRecord`] - The flat record persisted after every stage
//! - [`AppToken`] - The application-issued token produced by the last stage
//!
//! Fields are only ever filled in stage order. The mutators on
//! [`CredentialRecord`] refuse to set a field whose predecessors are missing,
//! and [`CredentialRecord::validate`] checks the same ordering for records
//! read back from disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// A short, log-safe preview of the value (first `len` characters).
    pub fn preview(&self, len: usize) -> String {
        let shown: String = self.0.chars().take(len).collect();
        if shown.len() < self.0.len() {
            format!("{}...", shown)
        } else {
            shown
        }
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// A field was set, or found set, before the fields it depends on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("record field {field} requires {requires}")]
pub struct RecordError {
    /// The field that is out of order.
    pub field: &'static str,

    /// The missing predecessor.
    pub requires: &'static str,
}

/// Token issued by the application's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppToken {
    /// The application access token (usually a JWT).
    pub access_token: Secret,

    /// Rotated refresh token, when the endpoint returns one.
    pub refresh_token: Option<Secret>,

    /// Lifetime of the access token in seconds.
    pub expires_in: Option<u64>,

    /// Token type (usually "Bearer").
    pub token_type: Option<String>,
}

/// Credentials gathered by one registration run.
///
/// Serialized as a flat camelCase JSON document. Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// The email address being registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// When the provider last accepted a request to email a sign-in code.
    ///
    /// The code itself is never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_requested_at: Option<DateTime<Utc>>,

    /// Identity-provider user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,

    /// Short-lived identity token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<Secret>,

    /// Long-lived identity refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,

    /// Identity token lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<u64>,

    /// When sign-in completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_in_at: Option<DateTime<Utc>>,

    /// When the application account was activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,

    /// Application access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_token: Option<Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_refresh_token: Option<Secret>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_token_expiry: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_token_issued_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Create an empty record for an email address.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    /// Whether a sign-in code has been requested and not yet given up on.
    pub fn is_code_requested(&self) -> bool {
        self.code_requested_at.is_some()
    }

    /// Record that the provider accepted a sign-in code request.
    pub fn mark_code_requested(&mut self) -> Result<(), RecordError> {
        if self.email.is_none() {
            return Err(RecordError {
                field: "codeRequestedAt",
                requires: "email",
            });
        }
        self.code_requested_at = Some(Utc::now());
        Ok(())
    }

    /// Forget an outstanding code request, so the next run sends a new one.
    pub fn clear_code_request(&mut self) {
        self.code_requested_at = None;
    }

    /// Whether identity tokens have been obtained.
    pub fn is_signed_in(&self) -> bool {
        self.id_token.is_some() && self.refresh_token.is_some()
    }

    /// Whether the application account has been activated.
    pub fn is_activated(&self) -> bool {
        self.activated_at.is_some()
    }

    /// Whether the application token has been issued.
    pub fn has_application_token(&self) -> bool {
        self.application_token.is_some()
    }

    /// Record the result of a successful sign-in.
    ///
    /// Clears anything from later stages, since a fresh sign-in supersedes it.
    pub fn mark_signed_in(
        &mut self,
        local_id: Option<String>,
        id_token: Secret,
        refresh_token: Secret,
        token_expiry: Option<u64>,
    ) -> Result<(), RecordError> {
        if self.email.is_none() {
            return Err(RecordError {
                field: "idToken",
                requires: "email",
            });
        }

        self.local_id = local_id;
        self.id_token = Some(id_token);
        self.refresh_token = Some(refresh_token);
        self.token_expiry = token_expiry;
        self.signed_in_at = Some(Utc::now());
        self.activated_at = None;
        self.clear_application_token();
        Ok(())
    }

    /// Record account activation.
    pub fn mark_activated(&mut self) -> Result<(), RecordError> {
        if !self.is_signed_in() {
            return Err(RecordError {
                field: "activatedAt",
                requires: "idToken and refreshToken",
            });
        }
        self.activated_at = Some(Utc::now());
        Ok(())
    }

    /// Record the application token.
    pub fn set_application_token(&mut self, token: AppToken) -> Result<(), RecordError> {
        if !self.is_signed_in() {
            return Err(RecordError {
                field: "applicationToken",
                requires: "idToken and refreshToken",
            });
        }
        self.application_token = Some(token.access_token);
        self.application_refresh_token = token.refresh_token;
        self.application_token_expiry = token.expires_in;
        self.application_token_type = token.token_type;
        self.application_token_issued_at = Some(Utc::now());
        Ok(())
    }

    fn clear_application_token(&mut self) {
        self.application_token = None;
        self.application_refresh_token = None;
        self.application_token_expiry = None;
        self.application_token_type = None;
        self.application_token_issued_at = None;
    }

    /// Check that populated fields respect stage ordering.
    pub fn validate(&self) -> Result<(), RecordError> {
        if (self.id_token.is_some() || self.refresh_token.is_some()) && self.email.is_none() {
            return Err(RecordError {
                field: "idToken",
                requires: "email",
            });
        }
        if self.is_activated() && !self.is_signed_in() {
            return Err(RecordError {
                field: "activatedAt",
                requires: "idToken and refreshToken",
            });
        }
        if self.has_application_token() && !self.is_signed_in() {
            return Err(RecordError {
                field: "applicationToken",
                requires: "idToken and refreshToken",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_in(email: &str) -> CredentialRecord {
        let mut record = CredentialRecord::new(email);
        record
            .mark_signed_in(
                Some("u1".to_string()),
                Secret::new("t1"),
                Secret::new("r1"),
                Some(3600),
            )
            .unwrap();
        record
    }

    #[test]
    fn test_secret_redacted() {
        let secret = Secret::new("my-super-secret");
        assert_eq!(format!("{:?}", secret), "Secret([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(secret.expose(), "my-super-secret");
    }

    #[test]
    fn test_secret_preview() {
        let secret = Secret::new("abcdefgh");
        assert_eq!(secret.preview(4), "abcd...");
        assert_eq!(secret.preview(20), "abcdefgh");
    }

    #[test]
    fn test_application_token_requires_sign_in() {
        let mut record = CredentialRecord::new("a@b.com");
        let result = record.set_application_token(AppToken {
            access_token: Secret::new("jwt"),
            refresh_token: None,
            expires_in: None,
            token_type: None,
        });
        assert_eq!(
            result,
            Err(RecordError {
                field: "applicationToken",
                requires: "idToken and refreshToken",
            })
        );
        assert!(record.application_token.is_none());
    }

    #[test]
    fn test_activation_requires_sign_in() {
        let mut record = CredentialRecord::new("a@b.com");
        assert!(record.mark_activated().is_err());

        let mut record = signed_in("a@b.com");
        record.mark_activated().unwrap();
        assert!(record.is_activated());
    }

    #[test]
    fn test_sign_in_resets_later_stages() {
        let mut record = signed_in("a@b.com");
        record.mark_activated().unwrap();
        record
            .set_application_token(AppToken {
                access_token: Secret::new("jwt"),
                refresh_token: None,
                expires_in: Some(3600),
                token_type: Some("Bearer".to_string()),
            })
            .unwrap();

        record
            .mark_signed_in(None, Secret::new("t2"), Secret::new("r2"), None)
            .unwrap();

        assert!(!record.is_activated());
        assert!(!record.has_application_token());
        assert_eq!(record.id_token.as_ref().unwrap().expose(), "t2");
    }

    #[test]
    fn test_serialized_shape_is_flat_camel_case() {
        let record = signed_in("a@b.com");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["email"], "a@b.com");
        assert_eq!(json["localId"], "u1");
        assert_eq!(json["idToken"], "t1");
        assert_eq!(json["refreshToken"], "r1");
        assert_eq!(json["tokenExpiry"], 3600);
        assert!(json.get("applicationToken").is_none());
    }

    #[test]
    fn test_code_request_marker() {
        let mut record = CredentialRecord::new("a@b.com");
        assert!(!record.is_code_requested());

        record.mark_code_requested().unwrap();
        assert!(record.is_code_requested());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("codeRequestedAt").is_some());

        record.clear_code_request();
        assert!(!record.is_code_requested());

        let mut anonymous = CredentialRecord::default();
        assert!(anonymous.mark_code_requested().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_order_record() {
        let json = r#"{"email":"a@b.com","applicationToken":"jwt"}"#;
        let record: CredentialRecord = serde_json::from_str(json).unwrap();
        assert!(record.validate().is_err());

        let json = r#"{"email":"a@b.com","idToken":"t","refreshToken":"r","applicationToken":"jwt"}"#;
        let record: CredentialRecord = serde_json::from_str(json).unwrap();
        assert!(record.validate().is_ok());
    }
}
