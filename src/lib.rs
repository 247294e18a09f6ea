//! Recipe Proxy Library
//!
//! Thin server-side proxy in front of a third-party recipe API. It keeps the
//! API key out of the browser and caches upstream responses per endpoint.
//!
//! # Endpoints
//!
//! - `GET /api/recipes` - complex search with allow-listed filters
//! - `GET /api/recipe/{id}` - recipe detail including nutrition
//! - `GET /api/ingredient-autocomplete` - ingredient name suggestions
//! - `GET /health` - liveness and cache statistics
//!
//! Errors are always returned as `{"error": "<message>"}` with the upstream
//! status passed through when there is one.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod proxy;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
