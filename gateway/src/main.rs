//! Gateway binary: loads configuration, builds the shared application
//! state, starts the route cache and invalidation listener, and serves the
//! gateway router until a shutdown signal arrives.

use gateway_core::config::Config;
use gateway_core::handler::gateway_router;
use gateway_core::listener::NotifyListener;
use gateway_core::observability::{init_tracing, shutdown_tracing};
use gateway_core::server::Server;
use gateway_core::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    let state = AppState::new(config).await?;
    state.cache.start(state.config.refresh.interval()).await?;

    let listener = NotifyListener::new(state.pool.clone(), state.config.refresh.debounce());
    let cache_for_listener = state.cache.clone();
    let _listener_task = listener.connect(move |event| {
        let cache = cache_for_listener.clone();
        async move {
            tracing::debug!(
                synthetic = event.synthetic,
                key = ?event.debounce_key,
                "invalidation event received"
            );
            if let Err(e) = cache.force_refresh().await {
                tracing::error!(error = %e, "cache refresh triggered by invalidation failed");
            }
        }
    });

    let app = gateway_router(state.clone());
    let result = Server::new(state.config.clone()).serve(app).await;

    listener.stop();
    state.cache.stop();
    shutdown_tracing();

    result.map_err(Into::into)
}
