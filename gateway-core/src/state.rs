//! Application state: the handler's dependencies, wired together once at
//! startup and shared (behind `Arc`) across every inbound request.

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwksManager;
use crate::cache::RouteCache;
use crate::config::Config;
use crate::error::Result;
use crate::execution::ExecutionClient;
use crate::store::ConfigStore;

/// Everything a request handler needs: the routing cache, the outbound
/// client to the execution service, the JWKS manager, and the resolved
/// configuration. The database pool is kept here too, so the binary crate
/// can hand the same pool to the notify listener without opening a second
/// connection set.
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub cache: Arc<RouteCache>,
    pub execution: ExecutionClient,
    pub jwks: JwksManager,
}

impl AppState {
    /// Build every collaborator from `config`: the database pool, the
    /// config-store-backed route cache (not yet started — call
    /// `cache.start()` separately), the execution client, and the JWKS
    /// manager.
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let pool = crate::database::create_pool(&config.database).await?;
        let store = ConfigStore::new(pool.clone());
        let cache = Arc::new(RouteCache::new(store));

        let internal_gateway_secret = config.internal_gateway_secret().map(|s| s.to_string());
        let execution = ExecutionClient::new(&config.execution, internal_gateway_secret);

        let jwks = JwksManager::new(
            config.jwks.cache_max_age(),
            config.jwks.cache_max_entries,
            config.jwks.rate_limit_per_minute,
        );

        Ok(Arc::new(Self {
            config,
            pool,
            cache,
            execution,
            jwks,
        }))
    }
}
