#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP fetch layer shared by every parking data source.
//!
//! A [`Fetcher`] is created once per pool and scrape cycle. It throttles
//! its requests with a [`RateLimiter`], optionally serves and stores
//! responses through a [`ResponseCache`], and turns unexpected status codes
//! and undecodable bodies into descriptive [`FetchError`]s that carry the
//! request and a preview of the response body.
//!
//! This crate has no knowledge of any particular source.

pub mod cache;
pub mod rate_limit;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;

pub use cache::{CacheMode, CachedResponse, ResponseCache};
pub use rate_limit::RateLimiter;

/// Maximum length of the response body preview included in errors.
pub const BODY_PREVIEW_LEN: usize = 500;

/// Default throttling rate.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by the fetch layer.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure (connect, timeout, TLS, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a status other than the expected one.
    #[error("Unexpected status {status} for request {method} {url} {params}\n\nResponse: {body}")]
    UnexpectedStatus {
        /// HTTP method.
        method: String,
        /// Requested URL.
        url: String,
        /// Query/body parameters of the request.
        params: String,
        /// Received status code.
        status: u16,
        /// Preview of the response body.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Could not decode response of {url}: {message}\n\nResponse: {body}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Decoder error.
        message: String,
        /// Preview of the response body.
        body: String,
    },

    /// Reading or writing the response cache failed.
    #[error("Cache error at {}: {message}", path.display())]
    Cache {
        /// Cache file involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The request could not be built (e.g. an invalid header).
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What is wrong with the request.
        message: String,
    },
}

/// Truncates a response body for inclusion in error messages.
#[must_use]
pub fn body_preview(body: &str) -> String {
    if body.chars().count() > BODY_PREVIEW_LEN {
        let mut preview: String = body.chars().take(BODY_PREVIEW_LEN).collect();
        preview.push_str("...");
        preview
    } else {
        body.to_string()
    }
}

/// Settings shared by every [`Fetcher`] of a batch run.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// `User-Agent` header.
    pub user_agent: String,
    /// Throttling rate per fetcher.
    pub requests_per_second: f64,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Root of the response cache.
    pub cache_dir: PathBuf,
    /// Cache direction.
    pub cache_mode: CacheMode,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("park_api/{}", env!("CARGO_PKG_VERSION")),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            timeout: DEFAULT_TIMEOUT,
            cache_dir: std::env::temp_dir().join("park_api-scraper"),
            cache_mode: CacheMode::Disabled,
            headers: BTreeMap::new(),
        }
    }
}

impl FetchConfig {
    /// Sets the throttling rate.
    #[must_use]
    pub const fn with_requests_per_second(mut self, requests_per_second: f64) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    /// Sets the cache mode.
    #[must_use]
    pub const fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    /// Sets the cache directory.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Adds an HTTP header sent with every request.
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_owned(), value.to_owned());
        self
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// JSON document.
    Json(serde_json::Value),
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    body: Option<RequestBody>,
    expected_status: Option<u16>,
}

impl FetchRequest {
    /// Creates a request expecting status 200.
    #[must_use]
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_owned(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            expected_status: Some(200),
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a POST request.
    #[must_use]
    pub fn post(url: &str) -> Self {
        Self::new(Method::POST, url)
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Adds a header for this request only.
    #[must_use]
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the expected status; `None` accepts any status.
    #[must_use]
    pub const fn expect_status(mut self, status: Option<u16>) -> Self {
        self.expected_status = status;
        self
    }

    /// The requested URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parameters rendered for logs and error messages.
    fn display_params(&self) -> String {
        let mut parts = Vec::new();
        if !self.query.is_empty() {
            parts.push(format!("query={:?}", self.query));
        }
        match &self.body {
            Some(RequestBody::Form(fields)) => parts.push(format!("form={fields:?}")),
            Some(RequestBody::Json(value)) => parts.push(format!("json={value}")),
            None => {}
        }
        parts.join(" ")
    }

    /// Cache key covering method, URL and parameters.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!(
            "{} {} {} {:?}",
            self.method,
            self.url,
            self.display_params(),
            self.headers
        )
    }
}

/// A received (or cached) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// Response body.
    pub body: String,
}

impl FetchedResponse {
    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Decode`] with a body preview if the body is not
    /// valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|e| FetchError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
            body: body_preview(&self.body),
        })
    }
}

impl From<CachedResponse> for FetchedResponse {
    fn from(cached: CachedResponse) -> Self {
        Self {
            status: cached.status,
            url: cached.url,
            body: cached.body,
        }
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| FetchError::InvalidRequest {
            message: format!("header name '{key}': {e}"),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidRequest {
            message: format!("header value for '{key}': {e}"),
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Rate-limited, optionally cached HTTP client for one pool.
#[derive(Debug)]
pub struct Fetcher {
    pool_id: String,
    client: reqwest::Client,
    limiter: RateLimiter,
    cache: ResponseCache,
}

impl Fetcher {
    /// Creates a fetcher for `pool_id`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] for invalid configured headers
    /// and [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(pool_id: &str, config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .default_headers(header_map(&config.headers)?)
            .build()?;

        Ok(Self {
            pool_id: pool_id.to_owned(),
            client,
            limiter: RateLimiter::new(config.requests_per_second),
            cache: ResponseCache::new(&config.cache_dir, pool_id, config.cache_mode),
        })
    }

    /// The pool this fetcher belongs to.
    #[must_use]
    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    /// Sends a request, consulting the cache and the rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure, on a status other than
    /// the expected one, or on cache I/O failure.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        let key = request.cache_key();

        let response = if let Some(cached) = self.cache.load(&key).await? {
            FetchedResponse::from(cached)
        } else {
            let response = self.send(request).await?;
            if check_status(request, &response).is_ok() {
                self.cache
                    .store(
                        &key,
                        &CachedResponse {
                            status: response.status,
                            url: response.url.clone(),
                            body: response.body.clone(),
                        },
                    )
                    .await?;
            }
            response
        };

        check_status(request, &response)?;
        Ok(response)
    }

    async fn send(&self, request: &FetchRequest) -> Result<FetchedResponse, FetchError> {
        self.limiter.wait().await;

        log::info!(
            "requesting {} {} {}",
            request.method,
            request.url,
            request.display_params()
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(header_map(&request.headers)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            Some(RequestBody::Form(fields)) => builder.form(fields),
            Some(RequestBody::Json(value)) => builder.json(value),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;

        Ok(FetchedResponse { status, url, body })
    }

    /// GETs `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// See [`Fetcher::fetch`].
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        Ok(self.fetch(&FetchRequest::get(url)).await?.body)
    }

    /// GETs `url` with `Accept: application/json` and decodes the body.
    ///
    /// # Errors
    ///
    /// See [`Fetcher::fetch`]; additionally [`FetchError::Decode`] if the
    /// body is not valid JSON for `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        self.fetch_json(FetchRequest::get(url)).await
    }

    /// Sends `request` with `Accept: application/json` and decodes the body.
    ///
    /// # Errors
    ///
    /// See [`Fetcher::get_json`].
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: FetchRequest,
    ) -> Result<T, FetchError> {
        let request = request.header("Accept", "application/json");
        self.fetch(&request).await?.json()
    }
}

fn check_status(request: &FetchRequest, response: &FetchedResponse) -> Result<(), FetchError> {
    match request.expected_status {
        Some(expected) if expected != response.status => Err(FetchError::UnexpectedStatus {
            method: request.method.to_string(),
            url: request.url.clone(),
            params: request.display_params(),
            status: response.status,
            body: body_preview(&response.body),
        }),
        _ => Ok(()),
    }
}
