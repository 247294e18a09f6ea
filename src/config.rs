//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::upstream::ApiKey;
use crate::{Error, Result};

/// Environment variable holding the upstream API key
pub const API_KEY_ENV: &str = "SPOONACULAR_API_KEY";

/// Prefix for structured environment overrides (`RECIPE_PROXY_CACHE__SEARCH_TTL=2m`)
pub const ENV_PREFIX: &str = "RECIPE_PROXY_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving the API key.
    /// Paths support ~ expansion. Loaded in order, later files do not
    /// override variables that are already set.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream recipe API configuration
    pub upstream: UpstreamConfig,
    /// Cache configuration
    pub cache: CacheConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Origins allowed by CORS (empty = any origin)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

/// Upstream recipe API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the recipe API
    pub base_url: String,
    /// API key injected into every upstream call
    pub api_key: Option<ApiKey>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.spoonacular.com".to_string(),
            api_key: None,
        }
    }
}

impl UpstreamConfig {
    /// Parse and check the base URL
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid upstream base_url: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Upstream base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }
        Ok(url)
    }

    /// The API key, or a configuration error if it is missing
    pub fn require_api_key(&self) -> Result<ApiKey> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{API_KEY_ENV} not set (env, .env file, or upstream.api_key in config)"
                ))
            })
    }
}

/// Per-endpoint cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for search results (`0` disables caching)
    #[serde(with = "humantime_serde")]
    pub search_ttl: Duration,
    /// TTL for recipe details
    #[serde(with = "humantime_serde")]
    pub detail_ttl: Duration,
    /// TTL for ingredient autocomplete suggestions
    #[serde(with = "humantime_serde")]
    pub autocomplete_ttl: Duration,
    /// Maximum number of entries before eviction (`0` = unbounded)
    pub max_entries: usize,
    /// Interval of the background sweep of expired entries (`0` = disabled)
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Sort query parameters before deriving cache keys
    pub canonical_keys: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(5 * 60),
            detail_ttl: Duration::from_secs(30 * 60),
            autocomplete_ttl: Duration::from_secs(60),
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
            canonical_keys: true,
        }
    }
}

impl CacheConfig {
    /// Longest accepted TTL or sweep interval
    pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

    /// Reject durations too large to schedule
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first out-of-range setting.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("search_ttl", self.search_ttl),
            ("detail_ttl", self.detail_ttl),
            ("autocomplete_ttl", self.autocomplete_ttl),
            ("sweep_interval", self.sweep_interval),
        ];

        for (name, value) in durations {
            if value > Self::MAX_DURATION {
                return Err(Error::Config(format!(
                    "cache.{name} must not exceed {}s (got {}s)",
                    Self::MAX_DURATION.as_secs(),
                    value.as_secs()
                )));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and the environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }

        let config = Self::from_figment(Self::figment(path))?;

        // env_files may provide the API key, so extract again once they are loaded
        if config.load_env_files() > 0 {
            return Self::from_figment(Self::figment(path));
        }
        Ok(config)
    }

    /// Layered sources, lowest priority first
    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&[API_KEY_ENV])
                    .map(|_| "upstream.api_key".into()),
            )
    }

    /// Extract and validate a configuration
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.upstream.base_url()?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    /// Returns the number of files loaded.
    fn load_env_files(&self) -> usize {
        let mut loaded = 0;
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
        loaded
    }
}

/// Duration serde helper accepting "500ms", "30s", "5m", "1h" or bare seconds
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize a Duration as milliseconds or whole seconds (e.g. "300s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse(&s).map_err(serde::de::Error::custom),
        }
    }

    /// Parse a duration string
    ///
    /// # Errors
    ///
    /// Returns a message naming the rejected input.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let whole = |n: &str, unit: u64| {
            n.trim()
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(unit))
                .map(Duration::from_secs)
        };

        let parsed = if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            whole(secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            whole(mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            whole(hours, 3600)
        } else {
            whole(s, 1)
        };

        parsed.ok_or_else(|| format!("invalid duration: {s:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn from_yaml(yaml: &str) -> Result<Config> {
        Config::from_figment(
            Figment::from(Serialized::defaults(Config::default())).merge(Yaml::string(yaml)),
        )
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upstream.base_url, "https://api.spoonacular.com");
        assert_eq!(config.cache.search_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.detail_ttl, Duration::from_secs(1800));
        assert_eq!(config.cache.autocomplete_ttl, Duration::from_secs(60));
        assert!(config.cache.canonical_keys);
    }

    #[test]
    fn test_yaml_overrides() {
        let config = from_yaml(
            r#"
server:
  port: 8080
  cors_origins: ["http://localhost:5173"]
upstream:
  base_url: "http://127.0.0.1:9999"
  api_key: "abc123"
cache:
  search_ttl: 2m
  autocomplete_ttl: 0
  max_entries: 50
"#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.upstream.require_api_key().unwrap().expose(), "abc123");
        assert_eq!(config.cache.search_ttl, Duration::from_secs(120));
        assert_eq!(config.cache.autocomplete_ttl, Duration::ZERO);
        assert_eq!(config.cache.detail_ttl, Duration::from_secs(1800));
        assert_eq!(config.cache.max_entries, 50);
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let config = Config::default();
        let err = config.upstream.require_api_key().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(API_KEY_ENV));

        let blank = UpstreamConfig {
            api_key: Some(ApiKey::new("  ")),
            ..Default::default()
        };
        assert!(blank.require_api_key().is_err());
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(from_yaml("upstream:\n  base_url: \"not a url\"\n").is_err());
        assert!(from_yaml("upstream:\n  base_url: \"ftp://example.com\"\n").is_err());
    }

    #[test]
    fn test_serialized_config_redacts_key() {
        let mut config = Config::default();
        config.upstream.api_key = Some(ApiKey::new("topsecret"));

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("topsecret"));
        assert!(yaml.contains("***HIDDEN***"));
        assert!(yaml.contains("search_ttl: 300s"));
    }

    #[test]
    fn test_duration_parse() {
        use humantime_serde::parse;

        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse("45").unwrap(), Duration::from_secs(45));
        assert!(parse("five minutes").is_err());
    }

    #[test]
    fn test_duration_parse_rejects_overflow() {
        use humantime_serde::parse;

        let err = parse("307445734561825861m").unwrap_err();
        assert!(err.contains("invalid duration"));
        assert!(parse("5124095576030432h").is_err());
    }

    #[test]
    fn test_oversized_cache_durations_rejected() {
        let err = from_yaml("cache:\n  search_ttl: 18446744073709551615\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("cache.search_ttl"));

        let err = from_yaml("cache:\n  sweep_interval: 9000h\n").unwrap_err();
        assert!(err.to_string().contains("cache.sweep_interval"));

        let config = from_yaml("cache:\n  detail_ttl: 8760h\n").unwrap();
        assert_eq!(config.cache.detail_ttl, CacheConfig::MAX_DURATION);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/recipe-proxy.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "RECIPE_PROXY_TEST_ENV_FILE_VALUE=from_env_file").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        assert_eq!(config.load_env_files(), 1);
        assert_eq!(
            std::env::var("RECIPE_PROXY_TEST_ENV_FILE_VALUE").unwrap(),
            "from_env_file"
        );
    }

    #[test]
    fn test_load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        assert_eq!(config.load_env_files(), 0);
    }
}
