//! Route Cache (§4.C): holds the compiled snapshot behind an atomic pointer
//! swap so reads never lock. Rebuilds are serialized — only one refresh in
//! flight at a time, with overlapping triggers collapsing into one.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{CacheState, ResolvedRoute};
use crate::store::{normalize_hostname, ConfigStore};

/// Lock-free-read cache of the gateway's routing table.
pub struct RouteCache {
    state: Arc<ArcSwap<CacheState>>,
    store: Arc<ConfigStore>,
    rebuild_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl RouteCache {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            state: Arc::new(ArcSwap::from_pointee(CacheState::default())),
            store: Arc::new(store),
            rebuild_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Initial load, then a periodic refresh timer for the lifetime of the
    /// cache. Listener-driven refreshes call [`Self::force_refresh`] directly.
    pub async fn start(self: &Arc<Self>, refresh_interval: Duration) -> Result<()> {
        self.force_refresh().await?;

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.tick().await; // first tick fires immediately; skip it, we just loaded
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = this.force_refresh().await {
                            tracing::error!(error = %e, "periodic cache refresh failed; retaining previous snapshot");
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Rebuild the cache from the config store. Idempotent: overlapping
    /// calls collapse onto a single in-flight rebuild via `rebuild_lock`.
    /// On failure, the previous snapshot is retained and the error is
    /// returned to the caller for logging.
    pub async fn force_refresh(&self) -> Result<()> {
        let _guard = self.rebuild_lock.lock().await;
        match self.store.load_snapshot().await {
            Ok(new_state) => {
                self.state.store(Arc::new(new_state));
                tracing::info!("route cache rebuilt");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "cache snapshot load failed, retaining previous cache");
                Err(e)
            }
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolve a (hostname, path) pair to a route, per the §4.C algorithm.
    pub fn resolve(&self, hostname: &str, path: &str) -> Option<ResolvedRoute> {
        let state = self.state.load_full();
        let host = normalize_hostname(hostname);

        let (project, path_to_match) = if let Some(project) = state.by_custom_domain.get(&host) {
            (project.clone(), path.to_string())
        } else if state.default_gateway_domain.as_deref() == Some(host.as_str()) {
            let trimmed = path.trim_start_matches('/');
            let slug = match trimmed.split('/').next() {
                Some(s) if !s.is_empty() => s,
                _ => return None,
            };
            let project = state.by_slug.get(slug)?.clone();
            let remainder = trimmed.splitn(2, '/').nth(1).unwrap_or("");
            let path_to_match = if remainder.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", remainder)
            };
            (project, path_to_match)
        } else {
            return None;
        };

        for route in project.routes.iter() {
            if let Some((path_params, path_suffix)) = route.compiled_matcher.match_prefix(&path_to_match) {
                return Some(ResolvedRoute {
                    project: project.clone(),
                    route: route.clone(),
                    path_params,
                    path_suffix,
                });
            }
        }

        None
    }
}
