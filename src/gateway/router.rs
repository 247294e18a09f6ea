//! HTTP router and handlers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::{HeaderValue, Method, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::config::ServerConfig;
use crate::proxy::INVALID_RECIPE_ID;
use crate::{Error, Result};
use crate::proxy::RecipeProxy;

/// Shared application state
pub struct AppState {
    /// Caching proxy serving every recipe endpoint
    pub proxy: RecipeProxy,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/recipes", get(search_handler))
        .route("/api/recipe", get(missing_recipe_id_handler))
        .route("/api/recipe/", get(missing_recipe_id_handler))
        .route("/api/recipe/{id}", get(recipe_handler))
        .route("/api/ingredient-autocomplete", get(autocomplete_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

/// CORS policy for browser callers
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    if config.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Client parameters, with extractor failures rendered as `{"error": ..}`
fn client_params(
    query: std::result::Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<HashMap<String, String>> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| Error::validation(rejection.body_text()))
}

/// GET /api/recipes
async fn search_handler(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Json<Value>> {
    let query = client_params(query)?;
    state
        .proxy
        .search(&query)
        .await
        .inspect_err(|e| warn!(route = "/api/recipes", error = %e, "Search failed"))
        .map(Json)
}

/// GET /api/recipe/{id}
async fn recipe_handler(
    State(state): State<Arc<AppState>>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> Result<Json<Value>> {
    let Ok(Path(id)) = id else {
        return Err(Error::validation(INVALID_RECIPE_ID));
    };
    state
        .proxy
        .recipe(Some(&id))
        .await
        .inspect_err(|e| {
            warn!(route = "/api/recipe", id = %id, error = %e, "Recipe lookup failed");
        })
        .map(Json)
}

/// GET /api/recipe without an id
async fn missing_recipe_id_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    state.proxy.recipe(None).await.map(Json)
}

/// GET /api/ingredient-autocomplete
async fn autocomplete_handler(
    State(state): State<Arc<AppState>>,
    query: std::result::Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Json<Value>> {
    let query = client_params(query)?;
    state
        .proxy
        .autocomplete(&query)
        .await
        .inspect_err(|e| {
            warn!(route = "/api/ingredient-autocomplete", error = %e, "Autocomplete failed");
        })
        .map(Json)
}

/// Health check handler with cache statistics
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": state.proxy.cache().stats(),
    }))
}
