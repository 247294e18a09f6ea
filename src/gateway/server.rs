//! Proxy server lifecycle

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::router::{AppState, cors_layer, create_router};
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::proxy::RecipeProxy;
use crate::upstream::redact_url;
use crate::{Error, Result};

/// Recipe proxy server
pub struct Server {
    /// Configuration
    config: Config,
    /// Caching proxy shared by all handlers
    proxy: RecipeProxy,
}

impl Server {
    /// Create a new server
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Config`] when the API key is missing; the process
    /// must not start without one.
    pub fn new(config: Config) -> Result<Self> {
        let proxy = RecipeProxy::from_config(&config)?;
        Ok(Self { config, proxy })
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        let cache = Arc::clone(self.proxy.cache());
        let cors = cors_layer(&self.config.server);
        let state = Arc::new(AppState { proxy: self.proxy });
        let app = create_router(state, cors);

        let listener = TcpListener::bind(addr).await?;

        let base_url = self.config.upstream.base_url()?;
        let cache_config = &self.config.cache;
        info!("============================================================");
        info!("RECIPE PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(upstream = %redact_url(&base_url), "Upstream recipe API");
        info!(
            search_ttl_secs = cache_config.search_ttl.as_secs(),
            detail_ttl_secs = cache_config.detail_ttl.as_secs(),
            autocomplete_ttl_secs = cache_config.autocomplete_ttl.as_secs(),
            max_entries = cache_config.max_entries,
            "Response cache"
        );
        info!("  GET /api/recipes");
        info!("  GET /api/recipe/{{id}}");
        info!("  GET /api/ingredient-autocomplete");
        info!("============================================================");

        spawn_sweeper(cache, cache_config.sweep_interval, shutdown_tx.subscribe());

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Periodically drop expired cache entries until shutdown
fn spawn_sweeper(
    cache: Arc<ResponseCache>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let start = tokio::time::Instant::now().checked_add(interval);
    let Some(start) = start.filter(|_| !interval.is_zero()) else {
        return;
    };

    let mut ticker = tokio::time::interval_at(start, interval);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.evict_expired();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
