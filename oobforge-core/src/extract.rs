//! Verification-link extraction from raw email bodies.
//!
//! Sign-in emails arrive in a handful of shapes: an HTML anchor pointing at
//! the identity provider's action handler, a link to the application's own
//! verification page, or a bare URL in a plain-text part. [`LinkExtractor`]
//! tries a fixed, ordered list of strategies and returns the first candidate
//! whose query string carries a non-empty code parameter.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Default query parameter carrying the one-time code.
pub const DEFAULT_CODE_PARAM: &str = "oobCode";

/// Default identity-provider email-action domain.
pub const DEFAULT_ACTION_DOMAIN: &str = "firebaseapp.com";

/// Settings for [`LinkExtractor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Domain suffix of the identity provider's action handler.
    pub action_domain: String,

    /// URL prefix of the application's own verification page.
    pub app_verify_prefix: Option<String>,

    /// Query parameter holding the code.
    pub code_param: String,

    /// Log every candidate link at debug level.
    pub debug: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            action_domain: DEFAULT_ACTION_DOMAIN.to_string(),
            app_verify_prefix: None,
            code_param: DEFAULT_CODE_PARAM.to_string(),
            debug: false,
        }
    }
}

/// Matching strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// `href` links under the identity provider's action domain.
    ActionDomain,
    /// `href` links under the application's verification prefix.
    AppVerifyPath,
    /// Any link whose query string names the code parameter.
    CodeParameter,
    /// Any identity-provider `__/auth/action` URL.
    AuthActionUrl,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ActionDomain => "action-domain",
            Strategy::AppVerifyPath => "app-verify-path",
            Strategy::CodeParameter => "code-parameter",
            Strategy::AuthActionUrl => "auth-action-url",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A verification link found in an email.
///
/// The code has a provider-side TTL that cannot be checked locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationLink {
    /// The decoded link.
    pub url: String,

    /// The one-time code from the link's query string.
    pub code: String,

    /// The strategy that found it.
    pub strategy: Strategy,
}

/// Finds verification codes in email bodies.
///
/// # Example
///
/// ```
/// use oobforge_core::extract::{ExtractorConfig, LinkExtractor};
///
/// let extractor = LinkExtractor::new(&ExtractorConfig::default()).unwrap();
/// let body = r#"<a href="https://demo.firebaseapp.com/__/auth/action?mode=signIn&amp;oobCode=ABC123">Sign in</a>"#;
///
/// let link = extractor.extract(body).unwrap();
/// assert_eq!(link.code, "ABC123");
/// ```
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    patterns: Vec<(Strategy, Regex)>,
    code_param: String,
    debug: bool,
}

impl LinkExtractor {
    /// Compile the strategies for a configuration.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ConfigError> {
        let param = regex::escape(&config.code_param);
        let domain = regex::escape(&config.action_domain);

        let mut sources = vec![(
            Strategy::ActionDomain,
            format!(r#"(?i)href=["'](https://[^"']*{domain}[^"']*)["']"#),
        )];

        if let Some(prefix) = config.app_verify_prefix.as_deref().filter(|p| !p.is_empty()) {
            let prefix = regex::escape(prefix);
            sources.push((
                Strategy::AppVerifyPath,
                format!(r#"(?i)href=["']({prefix}[^"']*{param}[^"']*)["']"#),
            ));
        }

        sources.push((
            Strategy::CodeParameter,
            format!(r#"(?i)(https://[^\s<>"']+\?[^\s<>"']*{param}=[^\s<>"']+)"#),
        ));
        sources.push((
            Strategy::AuthActionUrl,
            r#"(?i)(https://[^"'\s<>]*__/auth/action[^"'\s<>]*)"#.to_string(),
        ));

        let patterns = sources
            .into_iter()
            .map(|(strategy, source)| {
                Regex::new(&source)
                    .map(|re| (strategy, re))
                    .map_err(|e| ConfigError::InvalidPattern {
                        strategy: strategy.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            patterns,
            code_param: config.code_param.clone(),
            debug: config.debug,
        })
    }

    /// The active strategies, in order.
    pub fn strategies(&self) -> impl Iterator<Item = Strategy> + '_ {
        self.patterns.iter().map(|(strategy, _)| *strategy)
    }

    /// Find the first usable verification code in `body`.
    ///
    /// Returns `None` when no strategy yields a link with a non-empty code.
    pub fn extract(&self, body: &str) -> Option<VerificationLink> {
        for (strategy, pattern) in &self.patterns {
            for captures in pattern.captures_iter(body) {
                let Some(raw) = captures.get(1) else {
                    continue;
                };

                let url = clean_link(raw.as_str());
                if self.debug {
                    tracing::debug!(%strategy, candidate = %url, "candidate link");
                }

                if let Some(code) = self.code_from(&url) {
                    tracing::debug!(%strategy, "verification code found");
                    return Some(VerificationLink {
                        url,
                        code,
                        strategy: *strategy,
                    });
                }
            }
        }

        tracing::debug!("no verification link found");
        None
    }

    fn code_from(&self, link: &str) -> Option<String> {
        let parsed = Url::parse(link).ok()?;
        parsed
            .query_pairs()
            .find(|(name, _)| name == self.code_param.as_str())
            .map(|(_, value)| value.trim().to_string())
            .filter(|code| !code.is_empty())
    }
}

/// Decode HTML entities, including doubly-escaped ampersands.
fn clean_link(raw: &str) -> String {
    html_escape::decode_html_entities(raw).replace("&amp;", "&")
}
