//! Request proxy for the recipe endpoints
//!
//! Every endpoint runs the same pipeline:
//!
//! ```text
//! validate ──▶ build upstream URL ──▶ cache lookup ──┬─ hit ──▶ respond
//!                                                    └─ miss ─▶ fetch ──┬─ ok ──▶ cache ──▶ respond
//!                                                                       └─ err ─────────▶ respond
//! ```
//!
//! Failed fetches are never cached, so the next request retries upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::ResponseCache;
use crate::config::{CacheConfig, Config};
use crate::upstream::{ApiKey, RecipeApiClient, Upstream, UpstreamRequest, redact_url};
use crate::{Error, Result};

/// Client parameters forwarded to the search endpoint
pub const SEARCH_PARAMS: &[&str] = &[
    "query",
    "includeIngredients",
    "excludeIngredients",
    "cuisine",
    "diet",
    "type",
    "maxReadyTime",
    "intolerances",
    "sort",
    "sortDirection",
    "offset",
    "number",
];

/// Client parameters forwarded to the autocomplete endpoint
pub const AUTOCOMPLETE_PARAMS: &[&str] = &["query", "number"];

/// Results per search page when the client does not ask for a count
pub const DEFAULT_SEARCH_NUMBER: &str = "12";

/// Suggestions per autocomplete call when the client does not ask for a count
pub const DEFAULT_AUTOCOMPLETE_NUMBER: &str = "5";

/// Message returned when the recipe id is absent or malformed
pub const INVALID_RECIPE_ID: &str = "Valid Recipe ID parameter is required";

/// Logical operations exposed to the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Complex multi-filter recipe search
    Search,
    /// Recipe detail by id, nutrition included
    Detail,
    /// Ingredient name autocomplete
    Autocomplete,
}

impl Endpoint {
    /// Short name for logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Detail => "detail",
            Self::Autocomplete => "autocomplete",
        }
    }

    /// Client parameter names forwarded upstream
    #[must_use]
    pub const fn allowed_params(self) -> &'static [&'static str] {
        match self {
            Self::Search => SEARCH_PARAMS,
            Self::Detail => &[],
            Self::Autocomplete => AUTOCOMPLETE_PARAMS,
        }
    }

    /// Cache TTL for this endpoint
    #[must_use]
    pub fn ttl(self, policy: &CacheConfig) -> Duration {
        match self {
            Self::Search => policy.search_ttl,
            Self::Detail => policy.detail_ttl,
            Self::Autocomplete => policy.autocomplete_ttl,
        }
    }
}

/// Caching proxy in front of the recipe API
pub struct RecipeProxy {
    upstream: Arc<dyn Upstream>,
    cache: Arc<ResponseCache>,
    base_url: Url,
    api_key: ApiKey,
    policy: CacheConfig,
}

impl RecipeProxy {
    /// Assemble a proxy from its parts
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cache: Arc<ResponseCache>,
        base_url: Url,
        api_key: ApiKey,
        policy: CacheConfig,
    ) -> Self {
        Self {
            upstream,
            cache,
            base_url,
            api_key,
            policy,
        }
    }

    /// Build a proxy backed by the reqwest client and a fresh cache
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the API key is missing or the base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.upstream.require_api_key()?;
        let base_url = config.upstream.base_url()?;
        let cache = Arc::new(ResponseCache::with_capacity(config.cache.max_entries));

        Ok(Self::new(
            Arc::new(RecipeApiClient::new()?),
            cache,
            base_url,
            api_key,
            config.cache.clone(),
        ))
    }

    /// Shared response cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// `GET /api/recipes`: complex search, every filter optional
    pub async fn search(&self, query: &HashMap<String, String>) -> Result<Value> {
        let request = UpstreamRequest::new("/recipes/complexSearch")
            .param("addRecipeInformation", "true")
            .param("fillIngredients", "true")
            .forward(Endpoint::Search.allowed_params(), |name| {
                query.get(name).map(String::as_str)
            })
            .param_or_default("number", DEFAULT_SEARCH_NUMBER);

        self.fetch_cached(Endpoint::Search, &request).await
    }

    /// `GET /api/recipe/:id`: full recipe information including nutrition
    pub async fn recipe(&self, id: Option<&str>) -> Result<Value> {
        let id = parse_recipe_id(id)?;

        let request = UpstreamRequest::new(format!("/recipes/{id}/information"))
            .param("includeNutrition", "true");

        self.fetch_cached(Endpoint::Detail, &request).await
    }

    /// `GET /api/ingredient-autocomplete`: ingredient name suggestions
    pub async fn autocomplete(&self, query: &HashMap<String, String>) -> Result<Value> {
        if query.get("query").is_none_or(String::is_empty) {
            return Err(Error::validation(
                "Autocomplete query parameter is required",
            ));
        }

        let request = UpstreamRequest::new("/food/ingredients/autocomplete")
            .forward(Endpoint::Autocomplete.allowed_params(), |name| {
                query.get(name).map(String::as_str)
            })
            .param_or_default("number", DEFAULT_AUTOCOMPLETE_NUMBER);

        self.fetch_cached(Endpoint::Autocomplete, &request).await
    }

    /// Serve from cache, or fetch upstream and cache on success
    async fn fetch_cached(&self, endpoint: Endpoint, request: &UpstreamRequest) -> Result<Value> {
        let url = request.resolve(&self.base_url, &self.api_key);
        let key = ResponseCache::build_key(&url, self.policy.canonical_keys);

        if let Some(cached) = self.cache.get(&key) {
            debug!(endpoint = endpoint.name(), key = %key, "Cache hit");
            return Ok(cached);
        }
        debug!(endpoint = endpoint.name(), url = %redact_url(&url), "Cache miss");

        let value = self.upstream.fetch(&url).await?;

        let ttl = endpoint.ttl(&self.policy);
        if self.cache.set(&key, value.clone(), ttl) {
            debug!(endpoint = endpoint.name(), ttl_secs = ttl.as_secs(), "Cached response");
        }

        Ok(value)
    }
}

/// Validate a recipe id path segment: a positive integer
fn parse_recipe_id(raw: Option<&str>) -> Result<u64> {
    raw.map(str::trim)
        .and_then(|id| id.parse::<u64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| Error::validation(INVALID_RECIPE_ID))
}
