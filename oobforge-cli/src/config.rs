//! CLI configuration handling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use oobforge_core::http::DEFAULT_TIMEOUT_SECS;
use oobforge_core::pipeline::DEFAULT_CODE_WAIT_SECS;
use oobforge_core::{
    Endpoints, ExtractorConfig, HttpOptions, JsonFileStore, KeyRotator, PipelineConfig,
    PipelineContext, ResilientHttpClient,
};
use serde::{Deserialize, Serialize};

/// Replaces `http.proxy_url`.
pub const PROXY_ENV: &str = "OOBFORGE_PROXY_URL";

/// Replaces `api_keys`; comma-separated.
pub const API_KEYS_ENV: &str = "OOBFORGE_API_KEYS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity-provider API keys, used round-robin.
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Where the emailed sign-in link continues to.
    #[serde(default)]
    pub continue_url: Option<String>,

    /// How long to wait for a verification code; 0 waits forever.
    #[serde(default = "default_code_wait_timeout_secs")]
    pub code_wait_timeout_secs: u64,

    /// Where the credential record lives.
    #[serde(default)]
    pub record_path: Option<PathBuf>,

    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub http: HttpSection,

    #[serde(default)]
    pub endpoints: Option<Endpoints>,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub tls_verify: bool,
    pub proxy_url: Option<String>,
    pub proxy_required: bool,
    pub debug: bool,
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            tls_verify: false,
            proxy_url: None,
            proxy_required: false,
            debug: false,
            user_agent: None,
        }
    }
}

impl HttpSection {
    pub fn to_options(&self) -> HttpOptions {
        HttpOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            tls_verify: self.tls_verify,
            proxy_url: self.proxy_url.clone(),
            proxy_required: self.proxy_required,
            debug: self.debug,
            user_agent: self.user_agent.clone(),
        }
    }
}

fn default_code_wait_timeout_secs() -> u64 {
    DEFAULT_CODE_WAIT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            continue_url: None,
            code_wait_timeout_secs: default_code_wait_timeout_secs(),
            record_path: None,
            log_level: default_log_level(),
            http: HttpSection::default(),
            endpoints: None,
            extractor: ExtractorConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Parse a configuration document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config")
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(proxy) = lookup(PROXY_ENV).filter(|p| !p.trim().is_empty()) {
            self.http.proxy_url = Some(proxy.trim().to_string());
        }

        if let Some(keys) = lookup(API_KEYS_ENV) {
            let keys: Vec<String> = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            if !keys.is_empty() {
                self.api_keys = keys;
            }
        }
    }

    /// The record file, defaulting to the platform data directory.
    pub fn record_path(&self) -> Result<PathBuf> {
        match &self.record_path {
            Some(path) => Ok(path.clone()),
            None => JsonFileStore::default_path().context("Failed to locate data directory"),
        }
    }

    /// Extractor settings, with body logging following `http.debug`.
    pub fn extractor_config(&self) -> ExtractorConfig {
        let mut extractor = self.extractor.clone();
        extractor.debug |= self.http.debug;
        extractor
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let continue_url = self
            .continue_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .with_context(|| format!("continue_url is not set in {:?}", self.config_path))?;

        let timeout = (self.code_wait_timeout_secs > 0)
            .then(|| Duration::from_secs(self.code_wait_timeout_secs));

        Ok(PipelineConfig::new(continue_url).with_code_wait_timeout(timeout))
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        let Some(endpoints) = &self.endpoints else {
            bail!(
                "[endpoints] section with activation_url and token_url is missing from {:?}",
                self.config_path
            );
        };
        endpoints.validate()?;
        Ok(endpoints.clone())
    }

    /// Build everything a pipeline needs. Fails on any configuration error.
    pub fn pipeline_context(&self) -> Result<PipelineContext> {
        let keys = KeyRotator::new(self.api_keys.iter().cloned()).with_context(|| {
            format!("No API keys: set api_keys in config or {}", API_KEYS_ENV)
        })?;

        let http = ResilientHttpClient::new(&self.http.to_options())
            .context("Failed to build HTTP client")?;

        Ok(PipelineContext::new(
            Arc::new(http),
            Arc::new(keys),
            self.endpoints()?,
            self.pipeline_config()?,
        ))
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("oobforge.toml"))
}

/// Load configuration from `explicit`, or from the default location.
///
/// A missing default file yields defaults; a missing explicit file is an
/// error.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        AppConfig::from_toml(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else if explicit.is_some() {
        bail!("Config file {:?} does not exist", config_path);
    } else {
        AppConfig::default()
    };

    config.config_path = config_path;
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "oobforge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const FULL: &str = r#"
api_keys = ["key-1", "key-2"]
continue_url = "https://app.example.com/login"
code_wait_timeout_secs = 120
record_path = "/tmp/oobforge/credentials.json"
log_level = "debug"

[http]
timeout_secs = 10
proxy_url = "http://127.0.0.1:7890"
debug = true

[endpoints]
activation_url = "https://api.example.com/v1/auth/onboarding"
token_url = "https://app.example.com/proxy/token"
token_url_api_key = false

[endpoints.token_headers]
"x-client-version" = "1.0"

[extractor]
app_verify_prefix = "https://app.example.com/auth/verify"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml(FULL).unwrap();

        assert_eq!(config.api_keys, vec!["key-1", "key-2"]);
        assert_eq!(config.code_wait_timeout_secs, 120);
        assert_eq!(config.http.timeout_secs, 10);
        assert!(!config.http.tls_verify);

        let endpoints = config.endpoints().unwrap();
        assert_eq!(
            endpoints.identity_base_url,
            "https://identitytoolkit.googleapis.com/v1"
        );
        assert!(!endpoints.token_url_api_key);
        assert_eq!(
            endpoints.token_headers.get("x-client-version").map(String::as_str),
            Some("1.0")
        );

        assert_eq!(config.extractor.action_domain, "firebaseapp.com");
        assert!(config.extractor_config().debug);

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.code_wait_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_defaults_for_empty_config() {
        let config = AppConfig::from_toml("").unwrap();

        assert!(config.api_keys.is_empty());
        assert_eq!(config.code_wait_timeout_secs, DEFAULT_CODE_WAIT_SECS);
        assert_eq!(config.log_level, "info");
        assert!(config.endpoints().is_err());
        assert!(config.pipeline_config().is_err());
        assert!(config.pipeline_context().is_err());
    }

    #[test]
    fn test_zero_wait_means_no_timeout() {
        let config = AppConfig::from_toml(
            "continue_url = \"https://app.example.com\"\ncode_wait_timeout_secs = 0",
        )
        .unwrap();
        assert_eq!(config.pipeline_config().unwrap().code_wait_timeout, None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::from_toml(FULL).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            (PROXY_ENV, "http://10.0.0.1:3128"),
            (API_KEYS_ENV, " env-a, ,env-b "),
        ]);

        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.http.proxy_url.as_deref(), Some("http://10.0.0.1:3128"));
        assert_eq!(config.api_keys, vec!["env-a", "env-b"]);
    }

    #[test]
    fn test_blank_env_keys_keep_file_keys() {
        let mut config = AppConfig::from_toml(FULL).unwrap();
        config.apply_env(|name| (name == API_KEYS_ENV).then(|| " , ".to_string()));
        assert_eq!(config.api_keys, vec!["key-1", "key-2"]);
    }

    #[test]
    fn test_pipeline_context_from_full_config() {
        let config = AppConfig::from_toml(FULL).unwrap();
        let ctx = config.pipeline_context().unwrap();

        assert_eq!(ctx.keys.len(), 2);
        assert!(ctx.http.has_proxy());
    }

    #[test]
    fn test_invalid_endpoint_url() {
        let mut config = AppConfig::from_toml(FULL).unwrap();
        if let Some(endpoints) = config.endpoints.as_mut() {
            endpoints.activation_url = "not a url".to_string();
        }
        assert!(config.endpoints().is_err());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("absent.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, FULL).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.log_level, "debug");
    }
}
