//! Configuration errors shared across oobforge components.

use thiserror::Error;

/// Configuration problems detected while building components.
///
/// These are fatal at startup: nothing in the pipeline retries past them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The API key pool has no usable keys.
    #[error("API key pool is empty")]
    EmptyKeyPool,

    /// A proxy is required by configuration but none was given.
    #[error("proxy is required but no proxy URL is configured")]
    ProxyRequired,

    /// A configured URL does not parse.
    #[error("invalid URL for {field}: {message}")]
    InvalidUrl { field: String, message: String },

    /// A configured pattern could not be compiled.
    #[error("invalid extractor pattern for {strategy}: {message}")]
    InvalidPattern { strategy: String, message: String },

    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {message}")]
    HttpClient { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_field() {
        let err = ConfigError::InvalidUrl {
            field: "proxy_url".to_string(),
            message: "relative URL without a base".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid URL for proxy_url: relative URL without a base"
        );
        assert_eq!(ConfigError::EmptyKeyPool.to_string(), "API key pool is empty");
    }
}
