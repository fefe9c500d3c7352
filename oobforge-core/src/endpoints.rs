//! Endpoint configuration for the identity provider and the application.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Default identity-provider REST base.
pub const DEFAULT_IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Where each stage sends its request.
///
/// # Example
///
/// ```
/// use oobforge_core::Endpoints;
///
/// let endpoints = Endpoints::new(
///     "https://api.example.com/v1/auth/onboarding",
///     "https://app.example.com/proxy/token",
/// );
/// let url = endpoints.send_oob_code_url("key-a").unwrap();
/// assert_eq!(url.path(), "/v1/accounts:sendOobCode");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Identity-provider REST base; `accounts:*` methods are appended.
    #[serde(default = "default_identity_base_url")]
    pub identity_base_url: String,

    /// Application account-activation endpoint.
    pub activation_url: String,

    /// Application token-exchange endpoint.
    pub token_url: String,

    /// Append `?key=<api key>` to the token endpoint.
    #[serde(default = "default_true")]
    pub token_url_api_key: bool,

    /// Extra headers sent with the token exchange.
    #[serde(default)]
    pub token_headers: BTreeMap<String, String>,
}

fn default_identity_base_url() -> String {
    DEFAULT_IDENTITY_BASE_URL.to_string()
}

fn default_true() -> bool {
    true
}

impl Endpoints {
    /// Create endpoints using the default identity-provider base.
    pub fn new(activation_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            identity_base_url: default_identity_base_url(),
            activation_url: activation_url.into(),
            token_url: token_url.into(),
            token_url_api_key: true,
            token_headers: BTreeMap::new(),
        }
    }

    /// Override the identity-provider base.
    pub fn with_identity_base_url(mut self, url: impl Into<String>) -> Self {
        self.identity_base_url = url.into();
        self
    }

    /// Whether to append the API key to the token endpoint.
    pub fn with_token_url_api_key(mut self, enabled: bool) -> Self {
        self.token_url_api_key = enabled;
        self
    }

    /// Add a header to the token exchange.
    pub fn with_token_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.token_headers.insert(name.into(), value.into());
        self
    }

    /// Check every URL parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse("identity_base_url", &self.identity_base_url)?;
        parse("activation_url", &self.activation_url)?;
        parse("token_url", &self.token_url)?;
        Ok(())
    }

    pub fn send_oob_code_url(&self, api_key: &str) -> Result<Url, ConfigError> {
        self.identity_method("accounts:sendOobCode", api_key)
    }

    pub fn sign_in_url(&self, api_key: &str) -> Result<Url, ConfigError> {
        self.identity_method("accounts:signInWithEmailLink", api_key)
    }

    pub fn activation_url(&self) -> Result<Url, ConfigError> {
        parse("activation_url", &self.activation_url)
    }

    /// Token endpoint, with the API key appended when configured.
    pub fn token_url(&self, api_key: &str) -> Result<Url, ConfigError> {
        let mut url = parse("token_url", &self.token_url)?;
        if self.token_url_api_key {
            url.query_pairs_mut().append_pair("key", api_key);
        }
        Ok(url)
    }

    fn identity_method(&self, method: &str, api_key: &str) -> Result<Url, ConfigError> {
        let base = self.identity_base_url.trim_end_matches('/');
        let mut url = parse("identity_base_url", &format!("{}/{}", base, method))?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

fn parse(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_string(),
        message: format!("{}: {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new(
            "https://api.example.com/v1/auth/onboarding",
            "https://app.example.com/proxy/token",
        )
    }

    #[test]
    fn test_identity_urls_carry_key() {
        let url = endpoints().sign_in_url("key-b").unwrap();
        assert_eq!(
            url.as_str(),
            "https://identitytoolkit.googleapis.com/v1/accounts:signInWithEmailLink?key=key-b"
        );
    }

    #[test]
    fn test_identity_base_trailing_slash() {
        let endpoints = endpoints().with_identity_base_url("http://127.0.0.1:9000/v1/");
        let url = endpoints.send_oob_code_url("k").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/v1/accounts:sendOobCode?key=k");
    }

    #[test]
    fn test_token_url_key_optional() {
        let with_key = endpoints().token_url("k").unwrap();
        assert_eq!(with_key.query(), Some("key=k"));

        let without_key = endpoints().with_token_url_api_key(false).token_url("k").unwrap();
        assert_eq!(without_key.query(), None);
    }

    #[test]
    fn test_validate_reports_field() {
        let mut bad = endpoints();
        bad.activation_url = "not a url".to_string();

        match bad.validate() {
            Err(ConfigError::InvalidUrl { field, .. }) => assert_eq!(field, "activation_url"),
            other => panic!("expected invalid URL, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_defaults() {
        let endpoints: Endpoints = from_json(
            r#"{"activation_url":"https://a.example.com/on","token_url":"https://a.example.com/t"}"#,
        );
        assert_eq!(endpoints.identity_base_url, DEFAULT_IDENTITY_BASE_URL);
        assert!(endpoints.token_url_api_key);
        assert!(endpoints.token_headers.is_empty());
    }

    fn from_json(json: &str) -> Endpoints {
        serde_json::from_str(json).unwrap()
    }
}
