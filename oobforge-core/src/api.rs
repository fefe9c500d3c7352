//! Wire types for the identity provider and the application.
//!
//! Request bodies borrow from the pipeline; response bodies are parsed
//! leniently, since the providers are inconsistent about whether lifetimes
//! are JSON numbers or strings.

use serde::{Deserialize, Deserializer, Serialize};

use crate::record::{AppToken, Secret};

/// Body of `accounts:sendOobCode`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOobCodeRequest<'a> {
    pub request_type: &'static str,
    pub email: &'a str,
    pub client_type: &'static str,
    pub continue_url: &'a str,
    pub can_handle_code_in_app: bool,
}

impl<'a> SendOobCodeRequest<'a> {
    pub fn email_sign_in(email: &'a str, continue_url: &'a str) -> Self {
        Self {
            request_type: "EMAIL_SIGNIN",
            email,
            client_type: "CLIENT_TYPE_WEB",
            continue_url,
            can_handle_code_in_app: true,
        }
    }
}

/// Response of `accounts:sendOobCode`.
#[derive(Debug, Default, Deserialize)]
pub struct SendOobCodeResponse {
    #[serde(default)]
    pub email: Option<String>,
}

/// Body of `accounts:signInWithEmailLink`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest<'a> {
    pub email: &'a str,
    pub oob_code: &'a str,
}

/// Response of `accounts:signInWithEmailLink`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub local_id: Option<String>,

    pub id_token: Secret,

    pub refresh_token: Secret,

    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

/// Body of the application's onboarding call.
#[derive(Debug, Serialize)]
pub struct ActivationRequest {
    pub accepted_tos: bool,
    pub accepted_privacy_policy: bool,
    pub accepted_community_guidelines: bool,
}

impl ActivationRequest {
    pub fn accept_all() -> Self {
        Self {
            accepted_tos: true,
            accepted_privacy_policy: true,
            accepted_community_guidelines: true,
        }
    }
}

/// Response of the application's token endpoint.
#[derive(Debug, Deserialize)]
pub struct AppTokenResponse {
    pub access_token: Secret,

    #[serde(default)]
    pub refresh_token: Option<Secret>,

    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub token_type: Option<String>,
}

impl From<AppTokenResponse> for AppToken {
    fn from(response: AppTokenResponse) -> Self {
        AppToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            token_type: response.token_type,
        }
    }
}

/// How an upstream rejection should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The code's validity window has passed; a fresh code is needed.
    Expired,
    /// The code was mistyped or already used; the operator must re-enter it.
    Invalid,
    /// The provider does not know the email address.
    EmailNotFound,
    /// Anything else.
    Other,
}

impl RejectionKind {
    /// Classify a provider error code.
    ///
    /// Codes are matched by substring, so decorated messages such as
    /// `"INVALID_OOB_CODE : The action code is invalid."` classify too.
    /// Only an invalid *code* counts as [`Invalid`](Self::Invalid); other
    /// `INVALID_*` errors such as `INVALID_EMAIL` cannot be fixed by typing
    /// the code again.
    pub fn classify(code: &str) -> Self {
        let upper = code.to_ascii_uppercase();
        if upper.contains("EXPIRED") {
            RejectionKind::Expired
        } else if upper.contains("INVALID") && upper.contains("CODE") {
            RejectionKind::Invalid
        } else if upper.contains("EMAIL_NOT_FOUND") {
            RejectionKind::EmailNotFound
        } else {
            RejectionKind::Other
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::Expired => write!(f, "expired"),
            RejectionKind::Invalid => write!(f, "invalid"),
            RejectionKind::EmailNotFound => write!(f, "email not found"),
            RejectionKind::Other => write!(f, "rejected"),
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed { message: String },
    Code(String),
}

/// Pull the machine-readable error code out of an error response body.
///
/// Understands `{"error": {"message": "CODE"}}` (identity provider) and
/// `{"error": "code"}` (OAuth-style token endpoints).
pub fn provider_error_code(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let code = match envelope.error {
        ErrorBody::Detailed { message } => message,
        ErrorBody::Code(code) => code,
    };
    let code = code.trim().to_string();
    (!code.is_empty()).then_some(code)
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
