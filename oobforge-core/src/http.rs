//! HTTP transport with a single direct-then-proxy fallback.
//!
//! This module provides:
//! - [`HttpRequest`] / [`HttpResponse`] - Buffered request and response values
//! - [`Transport`] - Trait for one route to the network
//! - [`ReqwestTransport`] - reqwest-backed transport (direct or via proxy)
//! - [`ResilientHttpClient`] - Direct attempt, then one proxy attempt
//! - [`RequestOutcome`] - Tagged result of a send
//!
//! HTTP error statuses are not failures at this layer. A 4xx or 5xx response
//! is returned as [`RequestOutcome::Success`] with its raw status and body;
//! only network-level failures (refused, timed out, TLS handshake, a response
//! cut off mid-body) trigger the proxy attempt. Exactly one proxy attempt is made. Anything beyond that
//! is the caller's business.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ConfigError;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Transport options shared by every request a client sends.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Deadline for each individual attempt.
    pub timeout: Duration,

    /// Whether to validate peer certificates.
    ///
    /// Off by default so the pipeline works behind intercepting proxies.
    pub tls_verify: bool,

    /// Forward proxy used for the fallback attempt.
    pub proxy_url: Option<String>,

    /// Fail construction when no proxy is configured.
    pub proxy_required: bool,

    /// Log request and response bodies at debug level, with token fields
    /// masked.
    pub debug: bool,

    /// User-Agent header value.
    pub user_agent: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            tls_verify: false,
            proxy_url: None,
            proxy_required: false,
            debug: false,
            user_agent: None,
        }
    }
}

impl HttpOptions {
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }
}

/// Which route an attempt took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Direct => write!(f, "direct"),
            Route::Proxy => write!(f, "proxy"),
        }
    }
}

/// A fully buffered HTTP request.
///
/// The body is held as bytes so the same request can be replayed verbatim
/// on the proxy route.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a header. Later values for the same name are sent in addition.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Set a JSON body and content type.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self.header("Content-Type", "application/json"))
    }

    /// Set a form-encoded body and content type.
    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        self.body = Some(encoded.into_bytes());
        self.header("Content-Type", "application/x-www-form-urlencoded")
    }

    /// Look up the first header with the given name (case-insensitive).
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &display_url(&self.url))
            .field("headers", &header_names)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .finish()
    }
}

/// A buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub route: Route,
}

impl HttpResponse {
    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not connect (refused, DNS, TLS handshake).
    Connect,

    /// The attempt exceeded its deadline.
    Timeout,

    /// The request failed in flight.
    Request,

    /// The response body could not be read.
    Body,

    /// The request could not be built; no route can succeed.
    Build,
}

/// A failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether this failure may succeed on another route.
    ///
    /// Everything except a request that could not be built is network-level,
    /// including a connection dropped while the body was being read.
    pub fn allows_fallback(&self) -> bool {
        self.kind != TransportErrorKind::Build
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_builder() {
            TransportErrorKind::Build
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Request
        };
        Self::new(kind, err.to_string())
    }
}

/// Tagged result of [`ResilientHttpClient::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A response was received, whatever its status.
    Success(HttpResponse),

    /// Connection-level failure on every available route.
    TransientFailure(TransportError),

    /// The request itself is unusable.
    PermanentFailure(TransportError),
}

/// A single route to the network.
///
/// Implementations perform exactly one attempt; fallback policy lives in
/// [`ResilientHttpClient`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one attempt.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed [`Transport`].
pub struct ReqwestTransport {
    client: reqwest::Client,
    route: Route,
}

impl ReqwestTransport {
    /// A transport that never uses a proxy, including proxies from the
    /// environment.
    pub fn direct(options: &HttpOptions) -> Result<Self, ConfigError> {
        let client = base_builder(options)?
            .no_proxy()
            .build()
            .map_err(|e| ConfigError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            route: Route::Direct,
        })
    }

    /// A transport that sends every request through `proxy_url`.
    pub fn via_proxy(options: &HttpOptions, proxy_url: &str) -> Result<Self, ConfigError> {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| ConfigError::InvalidUrl {
            field: "proxy_url".to_string(),
            message: e.to_string(),
        })?;

        let client = base_builder(options)?
            .proxy(proxy)
            .build()
            .map_err(|e| ConfigError::HttpClient {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            route: Route::Proxy,
        })
    }
}

fn base_builder(options: &HttpOptions) -> Result<reqwest::ClientBuilder, ConfigError> {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );

    let user_agent = options
        .user_agent
        .clone()
        .unwrap_or_else(|| format!("oobforge/{}", env!("CARGO_PKG_VERSION")));

    Ok(reqwest::Client::builder()
        .timeout(options.timeout)
        .danger_accept_invalid_certs(!options.tls_verify)
        .user_agent(user_agent)
        .default_headers(headers))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::new(TransportErrorKind::Build, format!("header {}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::new(TransportErrorKind::Build, format!("header {}: {}", name, e))
            })?;
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        Ok(HttpResponse {
            status,
            body,
            route: self.route,
        })
    }
}

/// HTTP client that tries direct first and falls back to a proxy once.
///
/// # Example
///
/// ```rust,no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use oobforge_core::http::{HttpOptions, HttpRequest, RequestOutcome, ResilientHttpClient};
///
/// let options = HttpOptions::default().with_proxy("http://127.0.0.1:7890");
/// let client = ResilientHttpClient::new(&options)?;
///
/// let request = HttpRequest::post("https://example.com/api".parse()?)
///     .json(&serde_json::json!({"hello": "world"}))?;
///
/// match client.send(&request).await {
///     RequestOutcome::Success(response) => println!("HTTP {}", response.status),
///     RequestOutcome::TransientFailure(e) => eprintln!("network: {}", e),
///     RequestOutcome::PermanentFailure(e) => eprintln!("bad request: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResilientHttpClient {
    direct: Box<dyn Transport>,
    proxy: Option<Box<dyn Transport>>,
    debug: bool,
}

impl ResilientHttpClient {
    /// Build a client from options, using reqwest for both routes.
    pub fn new(options: &HttpOptions) -> Result<Self, ConfigError> {
        let proxy_url = options
            .proxy_url
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());

        if options.proxy_required && proxy_url.is_none() {
            return Err(ConfigError::ProxyRequired);
        }

        let direct = ReqwestTransport::direct(options)?;
        let proxy = proxy_url
            .map(|url| ReqwestTransport::via_proxy(options, url))
            .transpose()?;

        Ok(Self {
            direct: Box::new(direct),
            proxy: proxy.map(|p| Box::new(p) as Box<dyn Transport>),
            debug: options.debug,
        })
    }

    /// Build a client from explicit transports.
    pub fn with_transports(
        direct: impl Transport + 'static,
        proxy: Option<Box<dyn Transport>>,
    ) -> Self {
        Self {
            direct: Box::new(direct),
            proxy,
            debug: false,
        }
    }

    /// Whether a proxy fallback is configured.
    pub fn has_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Send a request: direct first, then once through the proxy on a
    /// network-level failure.
    pub async fn send(&self, request: &HttpRequest) -> RequestOutcome {
        let url = display_url(&request.url);
        tracing::debug!(method = %request.method, %url, "sending request");
        if self.debug {
            if let Some(body) = &request.body {
                let body = String::from_utf8_lossy(body);
                tracing::debug!(%url, body = %redact_body(&body), "request body");
            }
        }

        let direct_err = match self.direct.execute(request).await {
            Ok(response) => return self.received(&url, response),
            Err(err) => err,
        };

        if !direct_err.allows_fallback() {
            tracing::error!(%url, error = %direct_err, "request cannot be sent");
            return RequestOutcome::PermanentFailure(direct_err);
        }

        let Some(proxy) = &self.proxy else {
            tracing::warn!(%url, error = %direct_err, "direct attempt failed, no proxy configured");
            return RequestOutcome::TransientFailure(direct_err);
        };

        tracing::warn!(%url, error = %direct_err, "direct attempt failed, retrying through proxy");

        match proxy.execute(request).await {
            Ok(response) => self.received(&url, response),
            Err(err) if err.allows_fallback() => {
                tracing::error!(%url, error = %err, "proxy attempt failed");
                RequestOutcome::TransientFailure(err)
            }
            Err(err) => {
                tracing::error!(%url, error = %err, "proxy request cannot be sent");
                RequestOutcome::PermanentFailure(err)
            }
        }
    }

    fn received(&self, url: &str, response: HttpResponse) -> RequestOutcome {
        tracing::debug!(
            %url,
            status = response.status,
            route = %response.route,
            "received response"
        );
        if self.debug {
            tracing::debug!(%url, body = %redact_body(&response.body), "response body");
        }
        RequestOutcome::Success(response)
    }
}

impl std::fmt::Debug for ResilientHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientHttpClient")
            .field("has_proxy", &self.has_proxy())
            .field("debug", &self.debug)
            .finish()
    }
}

/// Field names whose values are masked in logged bodies.
const SENSITIVE_FIELDS: &[&str] = &[
    "oobCode",
    "idToken",
    "refreshToken",
    "accessToken",
    "id_token",
    "refresh_token",
    "access_token",
];

const MASK: &str = "[REDACTED]";

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

fn mask_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (name, inner) in map.iter_mut() {
                if is_sensitive(name) {
                    *inner = serde_json::Value::String(MASK.to_string());
                } else {
                    mask_json(inner);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(mask_json),
        _ => {}
    }
}

/// Render a JSON or form body for logging with token fields masked.
///
/// Bodies in neither format are reduced to their length.
pub fn redact_body(body: &str) -> String {
    if let Ok(mut value) = serde_json::from_str::<serde_json::Value>(body) {
        mask_json(&mut value);
        return value.to_string();
    }

    let looks_like_form = !body.is_empty()
        && !body.contains(char::is_whitespace)
        && body.split('&').all(|pair| pair.contains('='));
    if looks_like_form {
        let pairs = url::form_urlencoded::parse(body.as_bytes()).map(|(name, value)| {
            let value = if is_sensitive(&name) {
                MASK.into()
            } else {
                value
            };
            (name, value)
        });
        return url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
    }

    format!("<{} bytes>", body.len())
}

/// Render a URL without its query string, which may carry an API key.
pub fn display_url(url: &Url) -> String {
    let mut shown = format!("{}://", url.scheme());
    if let Some(host) = url.host_str() {
        shown.push_str(host);
    }
    if let Some(port) = url.port() {
        shown.push_str(&format!(":{}", port));
    }
    shown.push_str(url.path());
    shown
}
