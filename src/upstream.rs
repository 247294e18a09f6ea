//! Upstream recipe API client
//!
//! # Security
//!
//! The API key is injected into the query string at the last moment:
//! - `ApiKey` never prints its value through `Debug` or `Serialize`
//! - URLs are logged only through [`redact_url`]
//! - reqwest errors are stripped of their URL before they are logged or wrapped

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::{Error, Result};

/// Query parameter carrying the API key
pub const API_KEY_PARAM: &str = "apiKey";

/// Placeholder written in place of the API key
pub const REDACTED: &str = "***HIDDEN***";

/// Secret API key for the upstream recipe API
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    /// Raw key value, only for building the outbound request
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the key is blank
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl Serialize for ApiKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

/// One outbound call: a path below the API base plus ordered query parameters
///
/// The API key is not part of the request; it is added by [`UpstreamRequest::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    path: String,
    params: Vec<(String, String)>,
}

impl UpstreamRequest {
    /// Start a request for `path` (e.g. `/recipes/complexSearch`)
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Append a query parameter
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Append a parameter only if it is not already present
    #[must_use]
    pub fn param_or_default(self, name: &str, value: &str) -> Self {
        if self.has(name) {
            self
        } else {
            self.param(name, value)
        }
    }

    /// Forward client parameters named in `allowed`, in allow-list order
    ///
    /// Names outside the allow-list and empty values are dropped.
    #[must_use]
    pub fn forward<'a>(
        mut self,
        allowed: &[&str],
        lookup: impl Fn(&str) -> Option<&'a str>,
    ) -> Self {
        for name in allowed {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                self.params.push(((*name).to_string(), value.to_string()));
            }
        }
        self
    }

    /// Whether a parameter with this name has been added
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

    /// Parameters in the order they were added
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Build the fully resolved URL: base + path, API key first, then params
    #[must_use]
    pub fn resolve(&self, base: &Url, key: &ApiKey) -> Url {
        let mut url = base.clone();
        let path = format!("{}{}", base.path().trim_end_matches('/'), self.path);
        url.set_path(&path);
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(API_KEY_PARAM, key.expose());
            for (name, value) in &self.params {
                query.append_pair(name, value);
            }
        }
        url
    }
}

/// Render a URL for logs with the API key replaced
#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == API_KEY_PARAM {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();

    if pairs.is_empty() {
        return redacted.to_string();
    }

    redacted.set_query(None);
    redacted.query_pairs_mut().extend_pairs(pairs);
    redacted.to_string()
}

/// Source of upstream JSON documents
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue a single GET for a fully resolved URL and return the parsed body
    async fn fetch(&self, url: &Url) -> Result<Value>;
}

/// reqwest-backed client for the recipe API
pub struct RecipeApiClient {
    client: Client,
}

impl RecipeApiClient {
    /// Create a new client
    ///
    /// No request timeout is configured; calls run until the network gives up.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("recipe-proxy/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for RecipeApiClient {
    async fn fetch(&self, url: &Url) -> Result<Value> {
        debug!(url = %redact_url(url), "Fetching from recipe API");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let result = match response.bytes().await {
            Ok(body) => interpret_response(status, &body),
            // The status is already known, so a lost body only loses the message
            Err(e) if !status.is_success() => {
                let e = e.without_url();
                debug!(error = %e, "Failed to read error body");
                interpret_response(status, &[])
            }
            Err(e) => Err(transport_error(e)),
        };
        if let Err(e) = &result {
            warn!(
                url = %redact_url(url),
                status = status.as_u16(),
                error = %e,
                "Recipe API returned an error"
            );
        }
        result
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    // The URL carries the API key
    let e = e.without_url();
    warn!(error = %e, "Recipe API unreachable");
    Error::Transport(e.to_string())
}

/// Turn an upstream status and raw body into a JSON value or an error
///
/// - success + JSON: the document
/// - success + unparseable body: an empty object
/// - failure: the body's `message` field if present, else a status template
pub fn interpret_response(status: StatusCode, body: &[u8]) -> Result<Value> {
    let parsed = serde_json::from_slice::<Value>(body).ok();

    if status.is_success() {
        return Ok(parsed.unwrap_or_else(|| Value::Object(Map::new())));
    }

    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map_or_else(
            || format!("Recipe API error {}", status.as_u16()),
            str::to_string,
        );

    Err(Error::upstream(status, message))
}
